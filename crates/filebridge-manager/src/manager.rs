use std::collections::HashMap;
use std::sync::Arc;

use filebridge_registry::ClientRegistry;
use filebridge_types::{
    DomainError, ErrorKind, InboundHandler, Message, MessageSender, SessionState, SessionView,
};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::session::{spawn_session, SessionEvent, SessionHandle};

/// The transfer manager (C4): owns every `TransferSession`, the core of the
/// core per SPEC_FULL §2. A single `Arc<Inner>` behind a `RwLock<HashMap>`
/// tracks sessions by `request_id` — the registry-style single-owner
/// pattern used throughout this design.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<Inner>,
}

struct Inner {
    registry: ClientRegistry,
    sender: Arc<dyn MessageSender>,
    config: ManagerConfig,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    /// request_id -> (client_id, file_path), used to reject a second
    /// concurrent download of the same file from the same peer.
    active_by_key: RwLock<HashMap<(String, String), String>>,
}

impl TransferManager {
    pub fn new(registry: ClientRegistry, sender: Arc<dyn MessageSender>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                sender,
                config,
                sessions: RwLock::new(HashMap::new()),
                active_by_key: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn start(&self, client_id: String, file_path: String) -> Result<String, DomainError> {
        if self.inner.registry.lookup(&client_id).await.is_none() {
            return Err(DomainError::new(
                ErrorKind::ClientNotConnected,
                format!("client {client_id} is not connected"),
            ));
        }

        let key = (client_id.clone(), file_path.clone());
        {
            let active = self.inner.active_by_key.read().await;
            if let Some(existing) = active.get(&key) {
                if let Some(session) = self.inner.sessions.read().await.get(existing) {
                    if !session.is_terminal().await {
                        return Err(DomainError::new(
                            ErrorKind::DownloadInProgress,
                            format!("a transfer for {file_path} from {client_id} is already in progress"),
                        ));
                    }
                }
            }
        }

        let request_id = Uuid::new_v4().to_string();
        let handle = spawn_session(
            request_id.clone(),
            client_id.clone(),
            file_path.clone(),
            self.inner.sender.clone(),
            self.inner.config.clone(),
        );

        self.inner.sessions.write().await.insert(request_id.clone(), handle);
        self.inner.active_by_key.write().await.insert(key, request_id.clone());

        let _ = self.inner.sender.send(
            &client_id,
            Message::DownloadRequest {
                request_id: request_id.clone(),
                file_path,
            },
        );

        Ok(request_id)
    }

    pub async fn get(&self, request_id: &str) -> Option<SessionView> {
        match self.inner.sessions.read().await.get(request_id) {
            Some(h) => Some(h.view().await),
            None => None,
        }
    }

    pub async fn list(&self, status: Option<SessionState>) -> Vec<SessionView> {
        let sessions = self.inner.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for handle in sessions.values() {
            let view = handle.view().await;
            if status.is_none_or(|s| s == view.state) {
                out.push(view);
            }
        }
        out
    }

    pub async fn cancel(&self, request_id: &str, reason: String) -> Result<SessionView, DomainError> {
        let handle = self
            .inner
            .sessions
            .read()
            .await
            .get(request_id)
            .cloned()
            .ok_or_else(|| DomainError::new(ErrorKind::FileNotFound, format!("no such transfer {request_id}")))?;

        if handle.is_terminal().await {
            return Err(DomainError::new(
                ErrorKind::DownloadInProgress,
                "transfer already reached a terminal state".into(),
            ));
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let _ = handle.events.send(SessionEvent::Cancel {
            reason,
            respond_to: Some(tx),
        });
        match rx.await {
            Ok(view) => Ok(view),
            Err(_) => Ok(handle.view().await),
        }
    }

    /// Evict terminal sessions older than the configured retention window.
    /// Mirrors the teacher's `cleanup::run_cleanup_loop` shape.
    pub async fn run_retention_loop(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.retention_window / 4);
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(self.inner.config.retention_window).unwrap();
            let mut sessions = self.inner.sessions.write().await;
            let mut active = self.inner.active_by_key.write().await;
            let mut evicted = 0usize;
            sessions.retain(|request_id, handle| {
                let keep = match handle.try_view() {
                    Some(view) => !(view.state.is_terminal() && view.updated_at < cutoff),
                    None => true,
                };
                if !keep {
                    active.retain(|_, v| v != request_id);
                    evicted += 1;
                }
                keep
            });
            if evicted > 0 {
                tracing::info!(evicted, "retention: pruned terminal transfer sessions");
            }
        }
    }
}

impl InboundHandler for TransferManager {
    fn handle_inbound(&self, client_id: &str, message: Message) {
        let this = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            this.route_inbound(&client_id, message).await;
        });
    }

    fn client_disconnected(&self, client_id: &str) {
        let this = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let sessions = this.inner.sessions.read().await;
            for handle in sessions.values() {
                let view = handle.view().await;
                if view.client_id == client_id && !view.state.is_terminal() {
                    let _ = handle.events.send(SessionEvent::ClientDisconnected);
                }
            }
        });
    }
}

impl TransferManager {
    async fn route_inbound(&self, client_id: &str, message: Message) {
        let request_id = match &message {
            Message::DownloadAck { request_id, .. }
            | Message::Chunk { request_id, .. }
            | Message::CancelDownload { request_id, .. } => Some(request_id.clone()),
            Message::Error { .. } | Message::Register { .. } | Message::RegisterAck { .. } | Message::Ping | Message::Pong => {
                None
            }
        };
        let Some(request_id) = request_id else {
            return;
        };

        let Some(handle) = self.inner.sessions.read().await.get(&request_id).cloned() else {
            warn!(%request_id, "inbound message for unknown transfer");
            return;
        };

        if handle.view().await.client_id != client_id {
            warn!(%request_id, %client_id, "inbound message from non-owning peer");
            return;
        }

        let event = match message {
            Message::DownloadAck {
                success,
                file_size,
                total_chunks,
                file_checksum,
                message,
                ..
            } => SessionEvent::DownloadAck {
                success,
                file_size,
                total_chunks,
                file_checksum,
                message,
            },
            Message::Chunk {
                chunk_index,
                payload,
                checksum,
                is_last,
                ..
            } => SessionEvent::Chunk {
                chunk_index,
                payload,
                checksum,
                is_last,
            },
            Message::CancelDownload { reason, .. } => SessionEvent::Cancel {
                reason,
                respond_to: None,
            },
            _ => return,
        };

        let _ = handle.events.send(event);
    }
}
