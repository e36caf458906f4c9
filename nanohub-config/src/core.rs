//! Kernel configuration parameters.
//!
//! Sizes the three shared resources every nanoapp competes for:
//! - Event loop queue depth
//! - Timer pool ceilings and the per-app fairness floor
//! - Heap accounting ceilings

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Event loop configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct EventLoopConfig {
    /// Maximum number of events and deferred callbacks waiting in the inbox.
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 8, max = 65536))]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    96
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Timer pool ceilings.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_timer_limits))]
pub struct TimerConfig {
    /// Hard ceiling on all active timers (nanoapp and system).
    #[serde(default = "default_max_timer_requests")]
    #[validate(range(min = 2, max = 4096))]
    pub max_timer_requests: usize,

    /// Ceiling on timers owned by nanoapps.
    #[serde(default = "default_max_nanoapp_timers")]
    #[validate(range(min = 1, max = 4096))]
    pub max_nanoapp_timers: usize,

    /// Slots of `max_timer_requests` that system timers may never consume.
    #[serde(default = "default_reserved_nanoapp_timers")]
    pub reserved_nanoapp_timers: usize,

    /// Number of timers every nanoapp can count on, however busy the others are.
    #[serde(default = "default_nanoapp_timer_floor")]
    pub nanoapp_timer_floor: usize,
}

fn default_max_timer_requests() -> usize {
    64
}

fn default_max_nanoapp_timers() -> usize {
    32
}

fn default_reserved_nanoapp_timers() -> usize {
    32
}

fn default_nanoapp_timer_floor() -> usize {
    4
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_timer_requests: default_max_timer_requests(),
            max_nanoapp_timers: default_max_nanoapp_timers(),
            reserved_nanoapp_timers: default_reserved_nanoapp_timers(),
            nanoapp_timer_floor: default_nanoapp_timer_floor(),
        }
    }
}

/// Heap accounting ceilings.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
#[validate(schema(function = validation::validate_memory_limits))]
pub struct MemoryConfig {
    /// Global ceiling on bytes accounted to nanoapps.
    #[serde(default = "default_max_total_bytes")]
    #[validate(range(min = 1024))]
    pub max_total_bytes: usize,

    /// Largest single allocation.
    #[serde(default = "default_max_allocation_bytes")]
    #[validate(range(min = 1))]
    pub max_allocation_bytes: usize,

    /// Ceiling on the number of live allocations.
    #[serde(default = "default_max_allocation_count")]
    #[validate(range(min = 1))]
    pub max_allocation_count: usize,

    /// Whether `max_total_bytes` is enforced (the per-allocation ceiling always is).
    #[serde(default = "default_true")]
    pub enforce_total_ceiling: bool,
}

fn default_max_total_bytes() -> usize {
    256 * 1024
}

fn default_max_allocation_bytes() -> usize {
    64 * 1024
}

fn default_max_allocation_count() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_total_bytes: default_max_total_bytes(),
            max_allocation_bytes: default_max_allocation_bytes(),
            max_allocation_count: default_max_allocation_count(),
            enforce_total_ceiling: default_true(),
        }
    }
}
