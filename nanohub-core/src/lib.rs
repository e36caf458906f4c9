//! # nanohub-core
//!
//! Scheduling and asynchronous-resource kernel of a low-power context hub.
//!
//! A single cooperative event loop runs every nanoapp handler and every request manager state
//! transition to completion, one at a time. Timer interrupts and PAL callback threads talk to it
//! only through the [`events::EventPoster`] inbox or through the mutex-guarded timer pool and
//! heap ledger.
//!
//! ### Key Submodules:
//! - `alloc`: per-nanoapp heap accounting with global and per-allocation ceilings
//! - `time`: clocks, the hardware timer seam, and the timer pool
//! - `events`: events, deferred system callbacks, the loop inbox and the event loop
//! - `nanoapp`: the nanoapp record, permissions, and the handler trait
//! - `pal`: asynchronous hardware interfaces driven by the request managers
//! - `requests`: WiFi, WWAN and GNSS request managers
//! - `runtime`: the runtime context tying it all together, and the nanoapp-facing API

pub mod alloc;
pub mod error;
pub mod events;
pub mod nanoapp;
pub mod pal;
pub mod requests;
pub mod runtime;
pub mod time;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub mod prelude {
    pub use crate::alloc::{HeapPtr, MemoryManager};
    pub use crate::error::RuntimeError;
    pub use crate::events::{Event, EventData, EventLoop, EventPoster, EventTarget, SystemCallback};
    pub use crate::nanoapp::{Nanoapp, NanoappHandler, NanoappPermissions};
    pub use crate::requests::{AsyncResult, ErrorCode};
    pub use crate::runtime::{NanoappApi, Runtime, RuntimeBuilder};
    pub use crate::time::{Clock, SystemTimer, TimerPool};
    pub use crate::types::{event_type, Cookie, InstanceId, TimerHandle, TimerEvent};
}

pub use error::RuntimeError;
