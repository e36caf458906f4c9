//! # nanohub configuration
//!
//! Layered configuration for the context hub runtime.
//!
//! ## Features
//! - **Unified Configuration**: one `HubConfig` sizes the event loop, timers, heap and managers
//! - **Validation**: range checks per field plus cross-field checks per section
//! - **Environment Awareness**: `NANOHUB_ENV` selects an override file, `NANOHUB_*` overrides fields

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod core;
mod error;
mod resources;
mod telemetry;
mod validation;

pub use core::{EventLoopConfig, MemoryConfig, TimerConfig};
pub use error::ConfigError;
pub use resources::{GnssConfig, WifiConfig, WwanConfig};
pub use telemetry::TelemetryConfig;

/// Top-level configuration container for the runtime.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct HubConfig {
    /// Event loop sizing.
    #[serde(default)]
    #[validate(nested)]
    pub event_loop: EventLoopConfig,

    /// Timer pool ceilings.
    #[serde(default)]
    #[validate(nested)]
    pub timers: TimerConfig,

    /// Heap accounting ceilings.
    #[serde(default)]
    #[validate(nested)]
    pub memory: MemoryConfig,

    /// WiFi request manager tuning.
    #[serde(default)]
    #[validate(nested)]
    pub wifi: WifiConfig,

    /// WWAN request manager tuning.
    #[serde(default)]
    #[validate(nested)]
    pub wwan: WwanConfig,

    /// GNSS manager tuning.
    #[serde(default)]
    #[validate(nested)]
    pub gnss: GnssConfig,

    /// Logging and metrics.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl HubConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/nanohub.yaml`, if present
    /// 3. `config/<NANOHUB_ENV>.yaml`, if present
    /// 4. `NANOHUB_*` environment variables (`__` separates sections)
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(HubConfig::default()));

        if Path::new("config/nanohub.yaml").exists() {
            figment = figment.merge(Yaml::file("config/nanohub.yaml"));
        }

        let env = std::env::var("NANOHUB_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed("NANOHUB_").split("__")))
    }

    /// Load configuration from a specific path, still honouring `NANOHUB_*` overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::extract(
            Figment::from(Serialized::defaults(HubConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("NANOHUB_").split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the effective configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl WifiConfig {
    pub fn scan_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.scan_retry_backoff_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn ranging_timeout(&self) -> Duration {
        Duration::from_millis(self.ranging_timeout_ms)
    }
}

impl WwanConfig {
    pub fn cell_info_timeout(&self) -> Duration {
        Duration::from_millis(self.cell_info_timeout_ms)
    }
}

impl GnssConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = HubConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn environment_override() {
        Jail::expect_with(|jail| {
            jail.set_env("NANOHUB_EVENT_LOOP__QUEUE_CAPACITY", "512");
            let config = HubConfig::load().expect("load");
            assert_eq!(config.event_loop.queue_capacity, 512);
            Ok(())
        });
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hub.yaml",
                "timers:\n  max_nanoapp_timers: 8\n  nanoapp_timer_floor: 2\nwifi:\n  scan_max_retries: 5\n",
            )?;
            let config = HubConfig::load_from_path("hub.yaml").expect("load");
            assert_eq!(config.timers.max_nanoapp_timers, 8);
            assert_eq!(config.timers.nanoapp_timer_floor, 2);
            assert_eq!(config.timers.max_timer_requests, 64);
            assert_eq!(config.wifi.scan_max_retries, 5);
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = HubConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn rejects_timer_floor_above_ceiling() {
        let mut config = HubConfig::default();
        config.timers.max_nanoapp_timers = 2;
        config.timers.nanoapp_timer_floor = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_reservation_covering_whole_pool() {
        let mut config = HubConfig::default();
        config.timers.reserved_nanoapp_timers = config.timers.max_timer_requests;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_allocation_larger_than_heap() {
        let mut config = HubConfig::default();
        config.memory.max_allocation_bytes = config.memory.max_total_bytes + 1;
        let err: ConfigError = config.validate().unwrap_err().into();
        assert!(err.to_string().contains("allocation_exceeds_total"));
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut config = HubConfig::default();
        config.telemetry.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn yaml_rendering_round_trips_sections() {
        let yaml = HubConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("queue_capacity: 96"));
        assert!(yaml.contains("scan_retry_backoff_ms: 1000"));
    }
}
