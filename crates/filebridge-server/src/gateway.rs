use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use filebridge_manager::TransferManager;
use filebridge_registry::ClientRegistry;
use filebridge_transport::{connection, Dispatcher};

#[derive(Clone)]
pub struct GatewayState {
    pub registry: ClientRegistry,
    pub dispatcher: Dispatcher,
    pub manager: TransferManager,
}

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/gateway", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.registry, state.dispatcher, Arc::new(state.manager))
    })
}
