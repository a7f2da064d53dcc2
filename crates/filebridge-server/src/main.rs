mod config;
mod gateway;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use filebridge_api::AppState;
use filebridge_manager::TransferManager;
use filebridge_registry::ClientRegistry;
use filebridge_transport::Dispatcher;
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filebridge=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env();

    let registry = ClientRegistry::new();
    let dispatcher = Dispatcher::new();
    let manager = TransferManager::new(
        registry.clone(),
        Arc::new(dispatcher.clone()),
        config.manager.clone(),
    );

    tokio::spawn({
        let manager = manager.clone();
        async move { manager.run_retention_loop().await }
    });
    tokio::spawn({
        let registry = registry.clone();
        let dispatcher = dispatcher.clone();
        let interval = config.heartbeat_interval;
        async move { filebridge_transport::liveness::run(registry, dispatcher, interval).await }
    });

    let cors = build_cors_layer(&config.cors_origins);

    let http_app = filebridge_api::router(AppState {
        manager: manager.clone(),
        registry: registry.clone(),
    })
    .layer(cors)
    .layer(TraceLayer::new_for_http());

    let ws_app = gateway::router(gateway::GatewayState {
        registry,
        dispatcher,
        manager,
    });

    let http_addr: SocketAddr = format!("{}:{}", config.host, config.http_port).parse()?;
    let ws_addr: SocketAddr = format!("{}:{}", config.host, config.ws_port).parse()?;

    let http_listener = bind_listener(http_addr)?;
    let ws_listener = bind_listener(ws_addr)?;

    info!("control adapter listening on {}", http_addr);
    info!("gateway listening on {}", ws_addr);

    let http_server = axum::serve(
        http_listener,
        http_app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    let ws_server = axum::serve(
        ws_listener,
        ws_app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(http_server, ws_server)?;

    Ok(())
}

/// Create a listener via socket2 for custom backlog, address reuse, and
/// TCP_NODELAY — the same construction the teacher's server uses.
fn bind_listener(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nodelay(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    Ok(tokio::net::TcpListener::from_std(socket.into())?)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C, shutting down...");
    }
}

fn build_cors_layer(extra_origins: &[String]) -> CorsLayer {
    let mut origins: Vec<HeaderValue> = vec!["http://localhost:3000".parse().unwrap()];
    for raw in extra_origins {
        match raw.parse::<HeaderValue>() {
            Ok(val) => origins.push(val),
            Err(_) => tracing::warn!(origin = %raw, "ignoring invalid CORS origin"),
        }
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .allow_credentials(false)
}
