//! Request manager tuning for the hardware resource domains.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// WiFi request manager parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct WifiConfig {
    /// Delay before an on-demand scan rejected as busy is re-issued.
    #[serde(default = "default_scan_retry_backoff_ms")]
    #[validate(range(min = 1, max = 60000))]
    pub scan_retry_backoff_ms: u64,

    /// Number of re-issues allowed per on-demand scan request.
    #[serde(default = "default_scan_max_retries")]
    #[validate(range(max = 16))]
    pub scan_max_retries: u8,

    /// Time allowed between an accepted scan request and its results.
    #[serde(default = "default_scan_timeout_ms")]
    #[validate(range(min = 1))]
    pub scan_timeout_ms: u64,

    /// Time allowed between an accepted ranging request and its result.
    #[serde(default = "default_ranging_timeout_ms")]
    #[validate(range(min = 1))]
    pub ranging_timeout_ms: u64,
}

fn default_scan_retry_backoff_ms() -> u64 {
    1000
}

fn default_scan_max_retries() -> u8 {
    2
}

fn default_scan_timeout_ms() -> u64 {
    30_000
}

fn default_ranging_timeout_ms() -> u64 {
    10_000
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            scan_retry_backoff_ms: default_scan_retry_backoff_ms(),
            scan_max_retries: default_scan_max_retries(),
            scan_timeout_ms: default_scan_timeout_ms(),
            ranging_timeout_ms: default_ranging_timeout_ms(),
        }
    }
}

/// WWAN request manager parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct WwanConfig {
    /// Time allowed between an accepted cell info request and its result.
    #[serde(default = "default_cell_info_timeout_ms")]
    #[validate(range(min = 1))]
    pub cell_info_timeout_ms: u64,
}

fn default_cell_info_timeout_ms() -> u64 {
    10_000
}

impl Default for WwanConfig {
    fn default() -> Self {
        Self {
            cell_info_timeout_ms: default_cell_info_timeout_ms(),
        }
    }
}

/// GNSS manager parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct GnssConfig {
    /// Time allowed for the PAL to confirm a session state change.
    #[serde(default = "default_session_timeout_ms")]
    #[validate(range(min = 1))]
    pub session_timeout_ms: u64,
}

fn default_session_timeout_ms() -> u64 {
    5_000
}

impl Default for GnssConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}
