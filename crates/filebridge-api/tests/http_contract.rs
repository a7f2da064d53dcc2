use axum::body::Body;
use axum::http::{Request, StatusCode};
use filebridge_api::{router, AppState};
use filebridge_manager::{ManagerConfig, TransferManager};
use filebridge_registry::ClientRegistry;
use filebridge_types::{Message, MessageSender, SendError};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;

struct NullSender;
impl MessageSender for NullSender {
    fn send(&self, _client_id: &str, _message: Message) -> Result<(), SendError> {
        Ok(())
    }
}

async fn app(dir: &std::path::Path) -> (axum::Router, ClientRegistry) {
    let registry = ClientRegistry::new();
    let mut config = ManagerConfig::default();
    config.download_dir = dir.to_path_buf();
    let manager = TransferManager::new(registry.clone(), Arc::new(NullSender), config);
    let state = AppState { manager, registry: registry.clone() };
    (router(state), registry)
}

#[tokio::test]
async fn start_against_unconnected_client_returns_503() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _registry) = app(dir.path()).await;

    let body = serde_json::json!({ "clientId": "ghost", "filePath": "/etc/passwd" });
    let req = Request::builder()
        .method("POST")
        .uri("/downloads")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "CLIENT_NOT_CONNECTED");
}

#[tokio::test]
async fn unknown_transfer_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _registry) = app(dir.path()).await;

    let req = Request::builder()
        .uri("/downloads/does-not-exist")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn happy_path_start_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let (app, registry) = app(dir.path()).await;

    let handle_id = registry.attach().await;
    registry.promote(handle_id, "peer-a".into(), Default::default()).await;

    let body = serde_json::json!({ "clientId": "peer-a", "filePath": "/f" });
    let req = Request::builder()
        .method("POST")
        .uri("/downloads")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "requested");

    let req = Request::builder().uri("/downloads").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 1);
}
