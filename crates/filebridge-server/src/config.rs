use std::path::PathBuf;
use std::time::Duration;

use filebridge_manager::ManagerConfig;

/// Server-wide configuration loaded from the environment, the same
/// parse-with-fallback-and-warn idiom the teacher's `main.rs` uses for
/// `HAVEN_MAX_BODY_SIZE` and `HAVEN_CORS_ORIGINS`.
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
    pub cors_origins: Vec<String>,
    pub manager: ManagerConfig,
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let http_port = parse_env_or("PORT", 3000);
        let ws_port = parse_env_or("WS_PORT", 8080);

        let download_dir: PathBuf = std::env::var("DOWNLOAD_DIR")
            .unwrap_or_else(|_| "./downloads".into())
            .into();
        std::fs::create_dir_all(&download_dir).ok();
        let download_dir = std::fs::canonicalize(&download_dir).unwrap_or(download_dir);

        let cors_origins = std::env::var("CORS_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let manager = ManagerConfig {
            chunk_size: parse_env_or("CHUNK_SIZE", 1024 * 1024),
            max_chunk_retry_attempts: parse_env_or("MAX_CHUNK_RETRY_ATTEMPTS", 3),
            base_retry_delay: Duration::from_millis(parse_env_or("CHUNK_RETRY_DELAY", 1000)),
            ack_timeout: Duration::from_millis(parse_env_or("DOWNLOAD_ACK_TIMEOUT", 10_000)),
            session_deadline: Duration::from_millis(parse_env_or("DOWNLOAD_TIMEOUT", 300_000)),
            retention_window: Duration::from_secs(3600),
            download_dir,
        };

        Self {
            host,
            http_port,
            ws_port,
            cors_origins,
            manager,
            heartbeat_interval: Duration::from_millis(parse_env_or("HEARTBEAT_INTERVAL", 30_000)),
        }
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "invalid value for env var, using default");
            default
        }),
        Err(_) => default,
    }
}
