//! Cross-field validation functions for configuration.

use validator::ValidationError;

use crate::core::{MemoryConfig, TimerConfig};
use crate::telemetry::TelemetryConfig;

/// Timer ceilings must nest: nanoapp timers fit in the pool, system timers keep at least one slot,
/// and the per-app floor fits in the nanoapp ceiling.
pub fn validate_timer_limits(config: &TimerConfig) -> Result<(), ValidationError> {
    if config.max_nanoapp_timers > config.max_timer_requests {
        return Err(ValidationError::new("nanoapp_timers_exceed_pool"));
    }
    if config.reserved_nanoapp_timers >= config.max_timer_requests {
        return Err(ValidationError::new("no_system_timer_slots"));
    }
    if config.nanoapp_timer_floor > config.max_nanoapp_timers {
        return Err(ValidationError::new("timer_floor_exceeds_ceiling"));
    }
    Ok(())
}

/// A single allocation must be able to fit under the global ceiling.
pub fn validate_memory_limits(config: &MemoryConfig) -> Result<(), ValidationError> {
    if config.max_allocation_bytes > config.max_total_bytes {
        return Err(ValidationError::new("allocation_exceeds_total"));
    }
    Ok(())
}

/// Validate the default log level.
pub fn validate_log_level(config: &TelemetryConfig) -> Result<(), ValidationError> {
    let valid = ["trace", "debug", "info", "warn", "error", "off"]
        .contains(&config.log_level.to_lowercase().as_str());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_log_level"))
    }
}
