use std::time::Duration;

use filebridge_registry::ClientRegistry;
use filebridge_types::{Message, MessageSender};
use tracing::info;

use crate::dispatcher::Dispatcher;

/// Background liveness loop (SPEC_FULL §4.2): probes every connected peer
/// once per `heartbeat_interval` and evicts anyone who missed the
/// *previous* probe, the same cadence the teacher's own retention timer
/// uses (`cleanup.rs`'s periodic `tokio::time::interval`).
pub async fn run(registry: ClientRegistry, dispatcher: Dispatcher, heartbeat_interval: Duration) {
    let mut ticker = tokio::time::interval(heartbeat_interval);
    // Skip the immediate first tick so freshly-connected peers get a full
    // interval before being probed.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let stale = registry
            .stale_clients(chrono::Duration::from_std(heartbeat_interval * 2).unwrap())
            .await;
        for (client_id, handle_id) in stale {
            info!(%client_id, "evicting unresponsive peer");
            registry.detach(&client_id, handle_id).await;
            dispatcher.unregister(&client_id, handle_id);
        }

        for client_id in dispatcher.all_client_ids() {
            let _ = dispatcher.send(&client_id, Message::Ping);
        }
    }
}
