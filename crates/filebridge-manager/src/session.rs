use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use filebridge_types::{
    DomainError, ErrorKind, Message, MessageSender, Progress, RetryStats, SessionErrorView,
    SessionState, SessionView,
};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Pending,
    Verified,
}

#[derive(Debug, Clone)]
struct ChunkRecord {
    state: ChunkState,
    retry_count: u32,
}

/// The mutable half of a `TransferSession`. Exclusively owned by the one
/// task running [`run_session_loop`]; readers (`get`/`list`) only ever take
/// a read lock on the surrounding `RwLock`, so there is exactly one writer,
/// matching the single-owner-per-map design note in SPEC_FULL §9.
struct SessionData {
    request_id: String,
    client_id: String,
    file_path: String,
    state: SessionState,
    total_chunks: u32,
    file_checksum: String,
    chunks: Vec<ChunkRecord>,
    assembly: Vec<u8>,
    bytes_verified: u64,
    chunks_verified: u32,
    retry_stats: RetryStats,
    started_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    completed_at: Option<chrono::DateTime<Utc>>,
    error: Option<DomainError>,
}

impl SessionData {
    fn to_view(&self) -> SessionView {
        let percentage = if self.total_chunks == 0 {
            0.0
        } else {
            (self.chunks_verified as f64 / self.total_chunks as f64) * 100.0
        };
        SessionView {
            request_id: self.request_id.clone(),
            client_id: self.client_id.clone(),
            file_path: self.file_path.clone(),
            state: self.state,
            progress: Progress {
                chunks_received: self.chunks_verified,
                total_chunks: self.total_chunks,
                percentage,
                bytes_received: self.bytes_verified,
                retried_chunks: self
                    .retry_stats
                    .per_chunk_retries
                    .values()
                    .filter(|&&n| n > 0)
                    .count() as u32,
            },
            retry_stats: self.retry_stats.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            error: self.error.clone().map(SessionErrorView::from),
        }
    }
}

/// Events fed into a session's serial event loop. Replaces the
/// callback-nested retry scheduling the original had (SPEC_FULL §9):
/// every timer fire and every inbound message becomes one event on this
/// channel, processed strictly in arrival order.
pub enum SessionEvent {
    DownloadAck {
        success: bool,
        file_size: u64,
        total_chunks: u32,
        file_checksum: String,
        message: Option<String>,
    },
    Chunk {
        chunk_index: u32,
        payload: String,
        checksum: String,
        is_last: bool,
    },
    PeerError {
        code: ErrorKind,
        message: String,
    },
    ClientDisconnected,
    Cancel {
        reason: String,
        respond_to: Option<tokio::sync::oneshot::Sender<SessionView>>,
    },
    AckTimeout,
    ChunkRetryTimeout {
        chunk_index: u32,
    },
    SessionDeadline,
}

/// Shared, read-accessible handle to a running session. The event loop in
/// [`run_session_loop`] is the sole writer to `data_store`; everything else
/// only ever takes a read lock.
pub struct SessionHandle {
    data_store: RwLock<SessionData>,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub async fn view(&self) -> SessionView {
        self.data_store.read().await.to_view()
    }

    pub async fn is_terminal(&self) -> bool {
        self.data_store.read().await.state.is_terminal()
    }

    /// Non-blocking snapshot used by the retention sweep, which runs inside
    /// a synchronous `HashMap::retain` closure.
    pub fn try_view(&self) -> Option<SessionView> {
        self.data_store.try_read().ok().map(|d| d.to_view())
    }
}

pub fn spawn_session(
    request_id: String,
    client_id: String,
    file_path: String,
    sender: Arc<dyn MessageSender>,
    config: ManagerConfig,
) -> Arc<SessionHandle> {
    let (tx, rx) = mpsc::unbounded_channel();
    let now = Utc::now();
    let data = SessionData {
        request_id: request_id.clone(),
        client_id: client_id.clone(),
        file_path,
        state: SessionState::Requested,
        total_chunks: 0,
        file_checksum: String::new(),
        chunks: Vec::new(),
        assembly: Vec::new(),
        bytes_verified: 0,
        chunks_verified: 0,
        retry_stats: RetryStats::default(),
        started_at: now,
        updated_at: now,
        completed_at: None,
        error: None,
    };

    let handle = Arc::new(SessionHandle {
        data_store: RwLock::new(data),
        events: tx.clone(),
    });

    let loop_handle = handle.clone();
    tokio::spawn(async move {
        run_session_loop(loop_handle, rx, sender, config, request_id, client_id).await;
    });

    handle
}

async fn run_session_loop(
    handle: Arc<SessionHandle>,
    mut rx: mpsc::UnboundedReceiver<SessionEvent>,
    sender: Arc<dyn MessageSender>,
    config: ManagerConfig,
    request_id: String,
    client_id: String,
) {
    let mut chunk_retry_timers: HashMap<u32, tokio::task::JoinHandle<()>> = HashMap::new();
    let mut ack_timer = spawn_timer(handle.events.clone(), SessionEvent::AckTimeout, config.ack_timeout);
    let mut deadline_timer: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(event) = rx.recv().await {
        let mut data = handle.data_store.write().await;
        if data.state.is_terminal() {
            continue;
        }

        match event {
            SessionEvent::DownloadAck {
                success,
                file_size,
                total_chunks,
                file_checksum,
                message,
            } => {
                ack_timer.abort();
                if !success {
                    fail(&mut data, ErrorKind::FileNotFound, message.unwrap_or_default());
                } else {
                    data.total_chunks = total_chunks;
                    data.file_checksum = file_checksum;
                    data.chunks = (0..total_chunks)
                        .map(|_| ChunkRecord {
                            state: ChunkState::Pending,
                            retry_count: 0,
                        })
                        .collect();
                    data.assembly = vec![0u8; file_size as usize];
                    data.state = SessionState::Acknowledged;
                    data.updated_at = Utc::now();
                    deadline_timer = Some(spawn_timer(
                        handle.events.clone(),
                        SessionEvent::SessionDeadline,
                        config.session_deadline,
                    ));
                }
            }

            SessionEvent::Chunk {
                chunk_index,
                payload,
                checksum,
                is_last,
            } => {
                handle_chunk(
                    &mut data,
                    &handle,
                    &sender,
                    &config,
                    &mut chunk_retry_timers,
                    chunk_index,
                    &payload,
                    &checksum,
                    is_last,
                )
                .await;
            }

            SessionEvent::ChunkRetryTimeout { chunk_index } => {
                escalate_chunk_retry(
                    &mut data,
                    &handle,
                    &sender,
                    &config,
                    &mut chunk_retry_timers,
                    chunk_index,
                    &client_id,
                    &request_id,
                );
            }

            SessionEvent::PeerError { code, message } => {
                fail(&mut data, code, message);
            }

            SessionEvent::ClientDisconnected => {
                fail(&mut data, ErrorKind::ClientNotConnected, "peer disconnected".into());
            }

            SessionEvent::Cancel { reason, respond_to } => {
                data.state = SessionState::Cancelled;
                data.updated_at = Utc::now();
                data.completed_at = Some(Utc::now());
                let _ = sender.send(
                    &client_id,
                    Message::CancelDownload {
                        request_id: request_id.clone(),
                        reason,
                    },
                );
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(data.to_view());
                }
            }

            SessionEvent::AckTimeout => {
                fail(&mut data, ErrorKind::DownloadTimeout, "no ack within timeout".into());
            }

            SessionEvent::SessionDeadline => {
                fail(&mut data, ErrorKind::DownloadTimeout, "session deadline exceeded".into());
                let _ = sender.send(
                    &client_id,
                    Message::CancelDownload {
                        request_id: request_id.clone(),
                        reason: "deadline exceeded".into(),
                    },
                );
            }
        }

        if data.state.is_terminal() {
            for (_, t) in chunk_retry_timers.drain() {
                t.abort();
            }
            if let Some(t) = deadline_timer.take() {
                t.abort();
            }
            info!(%request_id, state = ?data.state, "session reached terminal state");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_chunk(
    data: &mut SessionData,
    handle: &Arc<SessionHandle>,
    sender: &Arc<dyn MessageSender>,
    config: &ManagerConfig,
    chunk_retry_timers: &mut HashMap<u32, tokio::task::JoinHandle<()>>,
    chunk_index: u32,
    payload: &str,
    checksum: &str,
    is_last: bool,
) {
    if !matches!(data.state, SessionState::Acknowledged | SessionState::Streaming) {
        return;
    }
    if chunk_index as usize >= data.chunks.len() {
        warn!(request_id = %data.request_id, chunk_index, "chunk index out of range");
        let _ = sender.send(
            &data.client_id,
            Message::Error {
                code: ErrorKind::ChunkTransferFailed,
                message: "chunk index out of range".into(),
                details: serde_json::json!({ "chunkIndex": chunk_index }),
            },
        );
        return;
    }

    if data.chunks[chunk_index as usize].state == ChunkState::Verified {
        debug!(request_id = %data.request_id, chunk_index, "duplicate chunk ignored");
        return;
    }

    let payload_owned = payload.to_string();
    let checksum_owned = checksum.to_string();
    let verified = tokio::task::spawn_blocking(move || verify_chunk(&payload_owned, &checksum_owned))
        .await
        .unwrap_or((false, Vec::new()));
    let (matches, bytes) = verified;

    if data.state == SessionState::Acknowledged {
        data.state = SessionState::Streaming;
    }

    if !matches {
        let chunk = &mut data.chunks[chunk_index as usize];
        chunk.retry_count += 1;
        data.retry_stats.total_retries += 1;
        *data.retry_stats.per_chunk_retries.entry(chunk_index).or_insert(0) += 1;

        if chunk.retry_count > config.max_chunk_retry_attempts {
            fail(data, ErrorKind::ChunkChecksumFailed, format!("chunk {chunk_index} exceeded retry budget"));
            return;
        }

        let attempt = chunk.retry_count;
        let delay = config.base_retry_delay * 2u32.pow(attempt.saturating_sub(1));
        let timer = spawn_timer(
            handle.events.clone(),
            SessionEvent::ChunkRetryTimeout { chunk_index },
            delay,
        );
        if let Some(old) = chunk_retry_timers.insert(chunk_index, timer) {
            old.abort();
        }
        return;
    }

    let offset = chunk_index as u64 * config.chunk_size;
    let end = (offset + bytes.len() as u64).min(data.assembly.len() as u64);
    if (offset as usize) < data.assembly.len() {
        data.assembly[offset as usize..end as usize]
            .copy_from_slice(&bytes[..(end - offset) as usize]);
    }
    data.chunks[chunk_index as usize].state = ChunkState::Verified;
    data.chunks_verified += 1;
    data.bytes_verified += bytes.len() as u64;
    data.updated_at = Utc::now();

    if let Some(t) = chunk_retry_timers.remove(&chunk_index) {
        t.abort();
    }

    let _ = is_last; // final-chunk flag is informational only; completion is driven by the verified count
    if data.chunks_verified as usize == data.chunks.len() {
        data.state = SessionState::Verifying;
        let mut hasher = Sha256::new();
        hasher.update(&data.assembly);
        let digest = hex::encode(hasher.finalize());
        if digest == data.file_checksum {
            match std::fs::write(config.download_dir.join(&data.request_id), &data.assembly) {
                Ok(()) => {
                    data.state = SessionState::Completed;
                    data.completed_at = Some(Utc::now());
                    data.updated_at = Utc::now();
                }
                Err(e) => fail(data, ErrorKind::FileReadError, e.to_string()),
            }
        } else {
            fail(data, ErrorKind::ChunkChecksumFailed, "full-file checksum mismatch".into());
        }
    }
}

/// Fired when a chunk's retry timer elapses without the chunk having been
/// verified since it was armed. Each firing counts as one scheduled retry;
/// once the budget is exhausted the session fails with
/// `ChunkTransferFailed` rather than sitting idle until the session
/// deadline. Distinct from the immediate-failure path in [`handle_chunk`],
/// which fails with `ChunkChecksumFailed` when a chunk keeps arriving but
/// never passes its checksum.
#[allow(clippy::too_many_arguments)]
fn escalate_chunk_retry(
    data: &mut SessionData,
    handle: &Arc<SessionHandle>,
    sender: &Arc<dyn MessageSender>,
    config: &ManagerConfig,
    chunk_retry_timers: &mut HashMap<u32, tokio::task::JoinHandle<()>>,
    chunk_index: u32,
    client_id: &str,
    request_id: &str,
) {
    let Some(chunk) = data.chunks.get_mut(chunk_index as usize) else {
        return;
    };
    if chunk.state == ChunkState::Verified {
        return;
    }

    chunk.retry_count += 1;
    data.retry_stats.total_retries += 1;
    *data.retry_stats.per_chunk_retries.entry(chunk_index).or_insert(0) += 1;
    let attempt = chunk.retry_count;

    if attempt > config.max_chunk_retry_attempts {
        chunk_retry_timers.remove(&chunk_index);
        fail(
            data,
            ErrorKind::ChunkTransferFailed,
            format!("chunk {chunk_index} was not verified after {attempt} scheduled retries"),
        );
        return;
    }

    let _ = sender.send(
        client_id,
        Message::RetryChunk {
            request_id: request_id.to_string(),
            chunk_index,
        },
    );

    let delay = config.base_retry_delay * 2u32.pow(attempt.saturating_sub(1));
    let timer = spawn_timer(
        handle.events.clone(),
        SessionEvent::ChunkRetryTimeout { chunk_index },
        delay,
    );
    if let Some(old) = chunk_retry_timers.insert(chunk_index, timer) {
        old.abort();
    }
}

fn verify_chunk(payload_b64: &str, checksum: &str) -> (bool, Vec<u8>) {
    use base64::Engine;
    let bytes = match base64::engine::general_purpose::STANDARD.decode(payload_b64) {
        Ok(b) => b,
        Err(_) => return (false, Vec::new()),
    };
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let digest = hex::encode(hasher.finalize());
    (digest.eq_ignore_ascii_case(checksum), bytes)
}

fn fail(data: &mut SessionData, kind: ErrorKind, message: String) {
    data.state = SessionState::Failed;
    data.error = Some(DomainError::new(kind, message));
    data.updated_at = Utc::now();
    data.completed_at = Some(Utc::now());
}

fn spawn_timer(
    events: mpsc::UnboundedSender<SessionEvent>,
    event: SessionEvent,
    delay: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(event);
    })
}
