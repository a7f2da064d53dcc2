use std::time::Duration;

/// Protocol and retry-policy constants, defined the way the teacher names
/// its fast-transfer tuning knobs as plain `pub const`s rather than scattering
/// magic numbers through the code.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub chunk_size: u64,
    pub max_chunk_retry_attempts: u32,
    pub base_retry_delay: Duration,
    pub ack_timeout: Duration,
    pub session_deadline: Duration,
    pub retention_window: Duration,
    pub download_dir: std::path::PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_chunk_retry_attempts: 3,
            base_retry_delay: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(10),
            session_deadline: Duration::from_secs(300),
            retention_window: Duration::from_secs(3600),
            download_dir: std::path::PathBuf::from("downloads"),
        }
    }
}
