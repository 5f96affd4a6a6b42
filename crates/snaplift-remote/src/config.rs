use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tuning knobs for peer HTTP transfers.
///
/// The download timeout for a file is derived from its size and the
/// low-speed limit, floored at `download_low_speed_time_secs`, so a stalled
/// transfer fails rather than hanging for the whole job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerTransferConfig {
    /// Minimum acceptable transfer rate in KB/s used to size download timeouts.
    pub download_low_speed_limit_kbps: u64,
    /// Floor for the per-file download timeout, in seconds.
    pub download_low_speed_time_secs: u64,
    /// Attempts per HTTP operation before the error is surfaced.
    pub max_retry: u32,
    /// Base backoff between retries, in seconds; attempt `n` waits `n * base`.
    pub retry_backoff_secs: u64,
    /// Timeout for directory listing requests, in seconds.
    pub list_timeout_secs: u64,
    /// Timeout for HEAD stat requests, in seconds.
    pub stat_timeout_secs: u64,
}

impl Default for PeerTransferConfig {
    fn default() -> Self {
        Self {
            download_low_speed_limit_kbps: 50,
            download_low_speed_time_secs: 300,
            max_retry: 3,
            retry_backoff_secs: 1,
            list_timeout_secs: 15,
            stat_timeout_secs: 10,
        }
    }
}

impl PeerTransferConfig {
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid peer transfer config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
