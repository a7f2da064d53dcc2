use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error taxonomy shared by every layer: a session failure, a
/// protocol `Error` message, and an HTTP error response all carry one of
/// these. Kept as a flat enum (not a `#[non_exhaustive]` one) because the
/// external contract in the design's error-mapping table is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ClientNotFound,
    ClientNotConnected,
    FileNotFound,
    FileReadError,
    PermissionDenied,
    DownloadInProgress,
    DownloadTimeout,
    ChunkChecksumFailed,
    ChunkTransferFailed,
    InvalidRequest,
}

impl ErrorKind {
    /// HTTP status mapping from the design's §6 table.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::ClientNotFound => 404,
            ErrorKind::ClientNotConnected => 503,
            ErrorKind::FileNotFound => 404,
            ErrorKind::FileReadError => 500,
            ErrorKind::PermissionDenied => 403,
            ErrorKind::DownloadInProgress => 409,
            ErrorKind::DownloadTimeout => 408,
            ErrorKind::ChunkChecksumFailed => 422,
            ErrorKind::ChunkTransferFailed => 500,
            ErrorKind::InvalidRequest => 400,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::ClientNotFound => "CLIENT_NOT_FOUND",
            ErrorKind::ClientNotConnected => "CLIENT_NOT_CONNECTED",
            ErrorKind::FileNotFound => "FILE_NOT_FOUND",
            ErrorKind::FileReadError => "FILE_READ_ERROR",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::DownloadInProgress => "DOWNLOAD_IN_PROGRESS",
            ErrorKind::DownloadTimeout => "DOWNLOAD_TIMEOUT",
            ErrorKind::ChunkChecksumFailed => "CHUNK_CHECKSUM_FAILED",
            ErrorKind::ChunkTransferFailed => "CHUNK_TRANSFER_FAILED",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
        };
        f.write_str(s)
    }
}

/// Errors from codec-level encode/decode (C1). Never reaches the operator;
/// the transport hub turns a `Decode` failure into an `Error{INVALID_REQUEST}`
/// sent back to the peer.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A fully-formed, session- or peer-scoped failure, carrying enough detail
/// to populate both a protocol `Error` message and the HTTP error envelope.
#[derive(Debug, Error, Clone)]
#[error("{kind}: {message}")]
pub struct DomainError {
    pub kind: ErrorKind,
    pub message: String,
    pub details: serde_json::Value,
}

impl DomainError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
