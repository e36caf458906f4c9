use nanohub_core::RuntimeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Trace digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },
}
