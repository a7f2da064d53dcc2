use serde::{Deserialize, Serialize};

/// Messages exchanged over the peer gateway channel.
///
/// Mirrors the wire shape a `DownloadRequest`/`Chunk` pair takes in §4.1 of
/// the design: a `type` tag plus type-specific `data`, so a malformed or
/// unknown message is rejected by serde before it ever reaches a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum Message {
    /// Peer announces itself to the registry.
    Register {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },

    /// Server's reply to `Register`.
    RegisterAck { success: bool, message: String },

    /// Liveness probe, either direction.
    Ping,

    /// Liveness reply, either direction.
    Pong,

    /// Server asks a peer to begin producing a file.
    DownloadRequest { request_id: String, file_path: String },

    /// Peer's reply to `DownloadRequest`, carrying file metadata.
    DownloadAck {
        request_id: String,
        success: bool,
        #[serde(default)]
        file_size: u64,
        #[serde(default)]
        total_chunks: u32,
        #[serde(default)]
        file_checksum: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// One chunk of file content, base64-encoded.
    Chunk {
        request_id: String,
        chunk_index: u32,
        payload: String,
        checksum: String,
        is_last: bool,
    },

    /// Server asks the peer to resend a chunk.
    RetryChunk { request_id: String, chunk_index: u32 },

    /// Either side aborts a transfer.
    CancelDownload { request_id: String, reason: String },

    /// Protocol-level error, either direction.
    Error {
        code: crate::error::ErrorKind,
        message: String,
        #[serde(default)]
        details: serde_json::Value,
    },
}

impl Message {
    pub fn encode(&self) -> Result<String, crate::error::FormatError> {
        serde_json::to_string(self).map_err(crate::error::FormatError::Encode)
    }

    pub fn decode(raw: &str) -> Result<Self, crate::error::FormatError> {
        serde_json::from_str(raw).map_err(crate::error::FormatError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_chunk() {
        let msg = Message::Chunk {
            request_id: "r1".into(),
            chunk_index: 3,
            payload: "aGVsbG8=".into(),
            checksum: "abc123".into(),
            is_last: false,
        };
        let encoded = msg.encode().unwrap();
        let decoded = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Chunk { chunk_index, .. } => assert_eq!(chunk_index, 3),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Message::decode(r#"{"type":"Bogus","data":{}}"#).unwrap_err();
        assert!(matches!(err, crate::error::FormatError::Decode(_)));
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = Message::decode(r#"{"type":"Chunk","data":{"requestId":"r1"}}"#).unwrap_err();
        assert!(matches!(err, crate::error::FormatError::Decode(_)));
    }
}
