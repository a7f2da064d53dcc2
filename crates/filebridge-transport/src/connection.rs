use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use filebridge_registry::{ClientRegistry, PromoteOutcome};
use filebridge_types::{InboundHandler, Message};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use crate::dispatcher::Dispatcher;

/// How long a freshly-opened transport has to send `Register` before it is
/// dropped.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Malformed frames tolerated within `MALFORMED_WINDOW` before the
/// transport is closed outright (SPEC_FULL §4.3).
const MALFORMED_THRESHOLD: u32 = 5;
const MALFORMED_WINDOW: Duration = Duration::from_secs(10);

/// Drive one peer's WebSocket connection end to end: wait for `Register`,
/// hand off to the registry and dispatcher, then pump inbound frames to
/// the manager and outbound frames from the dispatcher until either side
/// closes. Mirrors the teacher's `handle_connection` shape (split socket,
/// spawn a writer task, drive the reader on the calling task, race them
/// with `tokio::select!`).
pub async fn handle_connection(
    socket: WebSocket,
    registry: ClientRegistry,
    dispatcher: Dispatcher,
    inbound: Arc<dyn InboundHandler>,
) {
    let (mut sender, mut receiver) = socket.split();
    let handle_id = registry.attach().await;

    let (client_id, metadata) = match wait_for_register(&mut receiver).await {
        Some(reg) => reg,
        None => {
            warn!(%handle_id, "peer failed to register in time, closing");
            registry.detach("", handle_id).await;
            return;
        }
    };

    if registry.promote(handle_id, client_id.clone(), metadata.clone()).await == PromoteOutcome::Duplicate
    {
        if let Some(old_handle) = registry.displace(&client_id).await {
            dispatcher.unregister(&client_id, old_handle);
        }
        registry.promote(handle_id, client_id.clone(), metadata).await;
    }

    let mut outbound_rx = dispatcher.register(client_id.clone(), handle_id);
    info!(%client_id, %handle_id, "peer registered");

    let ack = Message::RegisterAck {
        success: true,
        message: "registered".into(),
    };
    if send_one(&mut sender, &ack).await.is_err() {
        registry.detach(&client_id, handle_id).await;
        dispatcher.unregister(&client_id, handle_id);
        return;
    }

    let mut writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if send_one(&mut sender, &message).await.is_err() {
                break;
            }
        }
    });

    let reader_inbound = inbound.clone();
    let reader_client_id = client_id.clone();
    let reader_registry = registry.clone();
    let mut reader_task = tokio::spawn(async move {
        let mut malformed_count = 0u32;
        let mut window_start = tokio::time::Instant::now();
        while let Some(Ok(frame)) = receiver.next().await {
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            match Message::decode(&text) {
                Ok(Message::Register { .. }) => {
                    // Already registered; a second Register on the same
                    // transport is not meaningful.
                }
                Ok(Message::Ping) => {
                    reader_registry.touch_heartbeat(&reader_client_id).await;
                }
                Ok(Message::Pong) => {
                    reader_registry.touch_heartbeat(&reader_client_id).await;
                }
                Ok(message) => {
                    reader_registry.touch_heartbeat(&reader_client_id).await;
                    reader_inbound.handle_inbound(&reader_client_id, message);
                }
                Err(err) => {
                    warn!(%reader_client_id, %err, "malformed frame");
                    if window_start.elapsed() > MALFORMED_WINDOW {
                        malformed_count = 0;
                        window_start = tokio::time::Instant::now();
                    }
                    malformed_count += 1;
                    if malformed_count > MALFORMED_THRESHOLD {
                        warn!(%reader_client_id, "too many malformed frames, closing");
                        break;
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = &mut writer_task => reader_task.abort(),
        _ = &mut reader_task => writer_task.abort(),
    }

    registry.detach(&client_id, handle_id).await;
    dispatcher.unregister(&client_id, handle_id);
    inbound.client_disconnected(&client_id);
    info!(%client_id, "peer disconnected");
}

async fn send_one(
    sender: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>,
    message: &Message,
) -> Result<(), ()> {
    let text = message.encode().map_err(|_| ())?;
    sender.send(WsMessage::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_register(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<(String, HashMap<String, String>)> {
    let wait = tokio::time::timeout(REGISTRATION_TIMEOUT, async {
        while let Some(Ok(frame)) = receiver.next().await {
            if let WsMessage::Text(text) = frame {
                if let Ok(Message::Register {
                    client_id,
                    version,
                    hostname,
                    platform,
                }) = Message::decode(&text)
                {
                    let mut metadata = HashMap::new();
                    if let Some(v) = version {
                        metadata.insert("version".to_string(), v);
                    }
                    if let Some(h) = hostname {
                        metadata.insert("hostname".to_string(), h);
                    }
                    if let Some(p) = platform {
                        metadata.insert("platform".to_string(), p);
                    }
                    return Some((client_id, metadata));
                }
            }
        }
        None
    });

    wait.await.ok().flatten()
}
