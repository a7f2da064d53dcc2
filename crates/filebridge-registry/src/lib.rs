//! The client registry (C2): tracks connected peers by stable client id,
//! pending (not-yet-registered) connections, and liveness.
//!
//! Holds only a handle id per peer, never the transport itself — the
//! transport hub (C3) owns the actual channel. This keeps the two crates
//! from referencing each other's connection objects (see SPEC_FULL §9,
//! "avoid cycles"), the same way the teacher's `Dispatcher` keeps a
//! `conn_id` alongside a channel rather than letting other code reach
//! back into the connection task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use filebridge_types::{ClientStatus, ClientView};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct ClientRecord {
    client_id: String,
    handle_id: Uuid,
    connected_at: chrono::DateTime<Utc>,
    last_heartbeat_at: chrono::DateTime<Utc>,
    metadata: HashMap<String, String>,
}

/// Outcome of [`ClientRegistry::promote`].
#[derive(Debug, PartialEq, Eq)]
pub enum PromoteOutcome {
    Registered,
    Duplicate,
}

#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    pending: RwLock<HashMap<Uuid, chrono::DateTime<Utc>>>,
    clients: RwLock<HashMap<String, ClientRecord>>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: RwLock::new(HashMap::new()),
                clients: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a freshly-opened transport as pending, before `Register`
    /// arrives. Returns the handle id the caller should use for
    /// [`ClientRegistry::promote`].
    pub async fn attach(&self) -> Uuid {
        let handle_id = Uuid::new_v4();
        self.inner.pending.write().await.insert(handle_id, Utc::now());
        handle_id
    }

    /// Move a pending connection into the registered map under `client_id`.
    /// Does not displace an existing holder of the same id — the caller
    /// decides whether to call [`ClientRegistry::displace`] first.
    pub async fn promote(
        &self,
        handle_id: Uuid,
        client_id: String,
        metadata: HashMap<String, String>,
    ) -> PromoteOutcome {
        let mut clients = self.inner.clients.write().await;
        if clients.contains_key(&client_id) {
            return PromoteOutcome::Duplicate;
        }
        self.inner.pending.write().await.remove(&handle_id);
        let now = Utc::now();
        clients.insert(
            client_id.clone(),
            ClientRecord {
                client_id,
                handle_id,
                connected_at: now,
                last_heartbeat_at: now,
                metadata,
            },
        );
        PromoteOutcome::Registered
    }

    /// Remove whatever record currently holds `client_id`, regardless of
    /// handle. Used when policy is "new registration displaces the old".
    /// Returns the displaced handle id, if any, so the caller can close
    /// that transport.
    pub async fn displace(&self, client_id: &str) -> Option<Uuid> {
        self.inner
            .clients
            .write()
            .await
            .remove(client_id)
            .map(|r| r.handle_id)
    }

    /// Remove a record, but only if it is still owned by `handle_id` — a
    /// stale disconnect from a connection that has since been displaced
    /// must not clobber the newer registration.
    pub async fn detach(&self, client_id: &str, handle_id: Uuid) {
        let mut clients = self.inner.clients.write().await;
        if clients.get(client_id).map(|r| r.handle_id) == Some(handle_id) {
            clients.remove(client_id);
        }
        self.inner.pending.write().await.remove(&handle_id);
    }

    pub async fn lookup(&self, client_id: &str) -> Option<ClientView> {
        self.inner.clients.read().await.get(client_id).map(to_view)
    }

    /// True if `client_id` is currently registered under `handle_id`.
    pub async fn is_current(&self, client_id: &str, handle_id: Uuid) -> bool {
        self.inner
            .clients
            .read()
            .await
            .get(client_id)
            .map(|r| r.handle_id == handle_id)
            .unwrap_or(false)
    }

    pub async fn list(&self) -> Vec<ClientView> {
        self.inner.clients.read().await.values().map(to_view).collect()
    }

    pub async fn touch_heartbeat(&self, client_id: &str) {
        if let Some(record) = self.inner.clients.write().await.get_mut(client_id) {
            record.last_heartbeat_at = Utc::now();
        }
    }

    /// Clients whose last heartbeat is older than `max_age`. The caller
    /// (the transport hub's liveness loop) is responsible for closing
    /// their transports and calling [`ClientRegistry::detach`].
    pub async fn stale_clients(&self, max_age: chrono::Duration) -> Vec<(String, Uuid)> {
        let cutoff = Utc::now() - max_age;
        self.inner
            .clients
            .read()
            .await
            .values()
            .filter(|r| r.last_heartbeat_at < cutoff)
            .map(|r| (r.client_id.clone(), r.handle_id))
            .collect()
    }
}

fn to_view(record: &ClientRecord) -> ClientView {
    ClientView {
        client_id: record.client_id.clone(),
        status: ClientStatus::Connected,
        connected_at: record.connected_at,
        last_heartbeat_at: record.last_heartbeat_at,
        metadata: record.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn promote_rejects_duplicate_then_displace_allows_it() {
        let registry = ClientRegistry::new();
        let h1 = registry.attach().await;
        assert_eq!(
            registry.promote(h1, "A".into(), HashMap::new()).await,
            PromoteOutcome::Registered
        );

        let h2 = registry.attach().await;
        assert_eq!(
            registry.promote(h2, "A".into(), HashMap::new()).await,
            PromoteOutcome::Duplicate
        );

        let displaced = registry.displace("A").await;
        assert_eq!(displaced, Some(h1));
        assert_eq!(
            registry.promote(h2, "A".into(), HashMap::new()).await,
            PromoteOutcome::Registered
        );
        assert!(registry.is_current("A", h2).await);
    }

    #[tokio::test]
    async fn stale_detach_does_not_clobber_newer_registration() {
        let registry = ClientRegistry::new();
        let h1 = registry.attach().await;
        registry.promote(h1, "A".into(), HashMap::new()).await;
        registry.displace("A").await;
        let h2 = registry.attach().await;
        registry.promote(h2, "A".into(), HashMap::new()).await;

        // A disconnect notification for the old handle arrives late.
        registry.detach("A", h1).await;

        assert!(registry.lookup("A").await.is_some());
        assert!(registry.is_current("A", h2).await);
    }

    #[tokio::test]
    async fn heartbeat_and_staleness() {
        let registry = ClientRegistry::new();
        let h1 = registry.attach().await;
        registry.promote(h1, "A".into(), HashMap::new()).await;
        registry.touch_heartbeat("A").await;
        assert!(registry.stale_clients(chrono::Duration::seconds(60)).await.is_empty());
        assert_eq!(
            registry.stale_clients(chrono::Duration::seconds(-1)).await.len(),
            1
        );
    }
}
