use thiserror::Error;

use crate::types::InstanceId;

/// Nanoapp lifecycle failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Nanoapp 0x{0:016x} is already loaded")]
    DuplicateAppId(u64),

    #[error("No free nanoapp instance id")]
    InstanceIdsExhausted,

    #[error("Nanoapp 0x{0:016x} failed to start")]
    StartFailed(u64),

    #[error("No nanoapp with instance id {0}")]
    NanoappNotFound(InstanceId),

    #[error("Failed to start the hardware timer: {0}")]
    SystemTimer(#[from] std::io::Error),
}

/// Logs and halts: used only where continuing would break the runtime's own guarantees.
macro_rules! fatal_error {
    ($($arg:tt)+) => {{
        ::tracing::error!(fatal = true, $($arg)+);
        panic!($($arg)+)
    }};
}

pub(crate) use fatal_error;
