use std::time::Duration;

pub const DEFAULT_SYNC_PORT: u16 = 5908;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Disconnect window during which a remote node's data is kept. Zero
    /// means evict immediately on disconnect.
    pub gr_hold: Duration,
    /// Well-known port of the remote state-publishing service.
    pub sync_port: u16,
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            gr_hold: Duration::ZERO,
            sync_port: DEFAULT_SYNC_PORT,
            log_filter: "info".into(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let gr_hold_secs = std::env::var("FABRIC_SYNC_GR_HOLD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0u64);
        let sync_port = std::env::var("FABRIC_SYNC_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_SYNC_PORT);
        let log_filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,fabric_sync=debug".into());
        Self {
            gr_hold: Duration::from_secs(gr_hold_secs),
            sync_port,
            log_filter,
        }
    }
}
