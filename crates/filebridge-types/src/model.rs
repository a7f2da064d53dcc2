use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{DomainError, ErrorKind};

/// Read-only snapshot of a `ClientRecord`, the shape returned by the
/// registry's `list`/`lookup` and re-exposed by the control adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientView {
    pub client_id: String,
    pub status: ClientStatus,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Acknowledged,
    Streaming,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub percentage: f64,
    pub bytes_received: u64,
    pub retried_chunks: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryStats {
    pub total_retries: u32,
    pub per_chunk_retries: HashMap<u32, u32>,
}

/// Read-only snapshot of a `TransferSession`, the control adapter's `GET`
/// response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub request_id: String,
    pub client_id: String,
    pub file_path: String,
    pub state: SessionState,
    pub progress: Progress,
    pub retry_stats: RetryStats,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionErrorView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorView {
    pub code: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl From<DomainError> for SessionErrorView {
    fn from(e: DomainError) -> Self {
        Self {
            code: e.kind,
            message: e.message,
            details: e.details,
        }
    }
}
