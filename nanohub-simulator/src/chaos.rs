//! Chaos module.
//!
//! Seeded fault injection for the self-completing PALs. Every draw comes from one
//! [`SmallRng`], so a seed fixes the whole fault sequence.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use nanohub_core::requests::ErrorCode;

/// Fault probabilities, each in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChaosConfig {
    /// The PAL acknowledges with a failure instead of starting the request.
    pub nack_probability: f64,
    /// The PAL acknowledges, then never completes.
    pub drop_probability: f64,
}

impl ChaosConfig {
    pub const DISABLED: Self = Self {
        nack_probability: 0.0,
        drop_probability: 0.0,
    };

    pub fn moderate() -> Self {
        Self {
            nack_probability: 0.2,
            drop_probability: 0.05,
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self::DISABLED
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    None,
    Nack(ErrorCode),
    Drop,
}

pub struct ChaosEngine {
    rng: SmallRng,
    nack_probability: f64,
    drop_probability: f64,
}

impl ChaosEngine {
    pub fn new(seed: u64, config: ChaosConfig) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            nack_probability: config.nack_probability.clamp(0.0, 1.0),
            drop_probability: config.drop_probability.clamp(0.0, 1.0),
        }
    }

    /// Decides how the next PAL request goes wrong, if at all.
    pub fn next_fault(&mut self) -> Fault {
        if self.rng.random_bool(self.nack_probability) {
            let code = if self.rng.random_bool(0.5) {
                ErrorCode::Busy
            } else {
                ErrorCode::RejectedRateLimit
            };
            return Fault::Nack(code);
        }
        if self.rng.random_bool(self.drop_probability) {
            return Fault::Drop;
        }
        Fault::None
    }

    /// Source for synthetic payloads.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
