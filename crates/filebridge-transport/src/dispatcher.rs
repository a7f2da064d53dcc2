use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use filebridge_types::{Message, MessageSender, SendError};
use uuid::Uuid;

/// Owns the per-peer outbound channels. This is the `MessageSender`
/// implementation the transfer manager (C4) reaches through the trait
/// object defined in `filebridge-types`, never through a direct crate
/// dependency — see SPEC_FULL §2 on the acyclic crate graph.
///
/// Shaped after the teacher's `Dispatcher`: a cloneable handle around a
/// single `Arc<Inner>`, guarding the per-client map behind one `RwLock`.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    channels: RwLock<HashMap<String, (Uuid, tokio::sync::mpsc::UnboundedSender<Message>)>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register the outbound channel for a newly-registered peer. Returns a
    /// receiver the connection's writer task should drain.
    pub fn register(
        &self,
        client_id: String,
        handle_id: Uuid,
    ) -> tokio::sync::mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.inner
            .channels
            .write()
            .unwrap()
            .insert(client_id, (handle_id, tx));
        rx
    }

    /// Remove a peer's channel, but only if `handle_id` still owns it —
    /// mirrors the registry's own stale-disconnect guard.
    pub fn unregister(&self, client_id: &str, handle_id: Uuid) {
        let mut channels = self.inner.channels.write().unwrap();
        if channels.get(client_id).map(|(h, _)| *h) == Some(handle_id) {
            channels.remove(client_id);
        }
    }

    pub fn all_client_ids(&self) -> Vec<String> {
        self.inner.channels.read().unwrap().keys().cloned().collect()
    }
}

impl MessageSender for Dispatcher {
    fn send(&self, client_id: &str, message: Message) -> Result<(), SendError> {
        let channels = self.inner.channels.read().unwrap();
        match channels.get(client_id) {
            Some((_, tx)) => tx
                .send(message)
                .map_err(|_| SendError::NotConnected(client_id.to_string())),
            None => Err(SendError::NotConnected(client_id.to_string())),
        }
    }
}
