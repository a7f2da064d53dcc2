use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use filebridge_manager::{ManagerConfig, TransferManager};
use filebridge_registry::ClientRegistry;
use filebridge_types::{ErrorKind, InboundHandler, Message, MessageSender, SendError, SessionState};
use sha2::{Digest, Sha256};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, Message)>>,
}

impl MessageSender for RecordingSender {
    fn send(&self, client_id: &str, message: Message) -> Result<(), SendError> {
        self.sent.lock().unwrap().push((client_id.to_string(), message));
        Ok(())
    }
}

impl RecordingSender {
    fn sent(&self) -> Vec<(String, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

fn chunk_message(request_id: &str, index: u32, data: &[u8], is_last: bool) -> Message {
    let payload = base64::engine::general_purpose::STANDARD.encode(data);
    let checksum = hex::encode(Sha256::digest(data));
    Message::Chunk {
        request_id: request_id.to_string(),
        chunk_index: index,
        payload,
        checksum,
        is_last,
    }
}

fn file_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

async fn setup(download_dir: &std::path::Path) -> (TransferManager, Arc<RecordingSender>, ClientRegistry) {
    let registry = ClientRegistry::new();
    let handle_id = registry.attach().await;
    registry
        .promote(handle_id, "peer-a".into(), Default::default())
        .await;

    let sender = Arc::new(RecordingSender::default());
    let mut config = ManagerConfig::default();
    config.download_dir = download_dir.to_path_buf();
    config.chunk_size = 7;
    let manager = TransferManager::new(registry.clone(), sender.clone(), config);
    (manager, sender, registry)
}

#[tokio::test]
async fn happy_path_single_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, sender, _registry) = setup(dir.path()).await;

    let request_id = manager.start("peer-a".into(), "/f".into()).await.unwrap();

    let data = b"HELLOOK";
    manager.handle_inbound(
        "peer-a",
        Message::DownloadAck {
            request_id: request_id.clone(),
            success: true,
            file_size: data.len() as u64,
            total_chunks: 1,
            file_checksum: file_checksum(data),
            message: None,
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.handle_inbound("peer-a", chunk_message(&request_id, 0, data, true));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let view = manager.get(&request_id).await.unwrap();
    assert_eq!(view.state, SessionState::Completed);
    assert_eq!(view.progress.percentage, 100.0);
    assert_eq!(view.progress.bytes_received, data.len() as u64);
    assert!(dir.path().join(&request_id).exists());
    let _ = sender.sent();
}

#[tokio::test]
async fn checksum_mismatch_then_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, sender, _registry) = setup(dir.path()).await;
    let request_id = manager.start("peer-a".into(), "/f".into()).await.unwrap();

    let data = b"HELLOOK";
    manager.handle_inbound(
        "peer-a",
        Message::DownloadAck {
            request_id: request_id.clone(),
            success: true,
            file_size: data.len() as u64,
            total_chunks: 1,
            file_checksum: file_checksum(data),
            message: None,
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Bad checksum first.
    manager.handle_inbound(
        "peer-a",
        Message::Chunk {
            request_id: request_id.clone(),
            chunk_index: 0,
            payload: base64::engine::general_purpose::STANDARD.encode(data),
            checksum: "0000".into(),
            is_last: true,
        },
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.get(&request_id).await.unwrap().state, SessionState::Streaming);

    // Wait for the scheduled retry (base delay 1s) then resend correctly.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(sender
        .sent()
        .iter()
        .any(|(_, m)| matches!(m, Message::RetryChunk { chunk_index: 0, .. })));

    manager.handle_inbound("peer-a", chunk_message(&request_id, 0, data, true));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let view = manager.get(&request_id).await.unwrap();
    assert_eq!(view.state, SessionState::Completed);
    assert_eq!(view.retry_stats.total_retries, 1);
}

#[tokio::test]
async fn checksum_exhaustion_fails_session() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, sender, _registry) = setup(dir.path()).await;
    let request_id = manager.start("peer-a".into(), "/f".into()).await.unwrap();

    let data = b"HELLOOK";
    manager.handle_inbound(
        "peer-a",
        Message::DownloadAck {
            request_id: request_id.clone(),
            success: true,
            file_size: data.len() as u64,
            total_chunks: 1,
            file_checksum: file_checksum(data),
            message: None,
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    for _ in 0..4 {
        manager.handle_inbound(
            "peer-a",
            Message::Chunk {
                request_id: request_id.clone(),
                chunk_index: 0,
                payload: base64::engine::general_purpose::STANDARD.encode(data),
                checksum: "bad".into(),
                is_last: true,
            },
        );
        tokio::time::sleep(Duration::from_millis(1100)).await;
    }

    let view = manager.get(&request_id).await.unwrap();
    assert_eq!(view.state, SessionState::Failed);
    assert_eq!(view.error.unwrap().code, ErrorKind::ChunkChecksumFailed);

    let retry_sends = sender
        .sent()
        .iter()
        .filter(|(_, m)| matches!(m, Message::RetryChunk { .. }))
        .count();
    assert!(retry_sends <= 3, "must not exceed the retry budget");
}

#[tokio::test]
async fn cancel_mid_transfer_drops_late_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, sender, _registry) = setup(dir.path()).await;
    let request_id = manager.start("peer-a".into(), "/f".into()).await.unwrap();

    manager.handle_inbound(
        "peer-a",
        Message::DownloadAck {
            request_id: request_id.clone(),
            success: true,
            file_size: 70,
            total_chunks: 10,
            file_checksum: "irrelevant".into(),
            message: None,
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    for i in 0..3u32 {
        manager.handle_inbound("peer-a", chunk_message(&request_id, i, b"AAAAAAA", false));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    manager.cancel(&request_id, "operator cancelled".into()).await.unwrap();

    // Late chunk after cancellation must be dropped.
    manager.handle_inbound("peer-a", chunk_message(&request_id, 4, b"AAAAAAA", false));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let view = manager.get(&request_id).await.unwrap();
    assert_eq!(view.state, SessionState::Cancelled);
    assert_eq!(view.progress.bytes_received, 21);

    let cancel_sends = sender
        .sent()
        .iter()
        .filter(|(_, m)| matches!(m, Message::CancelDownload { .. }))
        .count();
    assert_eq!(cancel_sends, 1);
}

#[tokio::test]
async fn duplicate_registration_displaces_old_record() {
    let registry = ClientRegistry::new();
    let h1 = registry.attach().await;
    registry.promote(h1, "peer-a".into(), Default::default()).await;
    let h2 = registry.attach().await;

    use filebridge_registry::PromoteOutcome;
    assert_eq!(
        registry.promote(h2, "peer-a".into(), Default::default()).await,
        PromoteOutcome::Duplicate
    );
    registry.displace("peer-a").await;
    assert_eq!(
        registry.promote(h2, "peer-a".into(), Default::default()).await,
        PromoteOutcome::Registered
    );
    assert!(registry.is_current("peer-a", h2).await);
    assert_eq!(registry.list().await.len(), 1);
}
