//! ## nanohub-core::events
//! **Events, deferred system callbacks and the event loop**
//!
//! ### Expectations:
//! - FIFO processing of everything posted through one [`EventPoster`]
//! - Posting is safe from any thread; dispatch happens on the loop thread only
//! - Every event's release callback runs exactly once, delivered or not
//!
//! ### Key Submodules:
//! - `event/`: event and system callback types
//! - `poster/`: the cross-thread posting handle
//! - `event_loop/`: the loop-owned queue and nanoapp registry
//! - `stats/`: loop counters

pub mod event;
pub mod event_loop;
pub mod poster;
pub mod stats;

pub use event::{
    Event, EventData, EventTarget, ReleaseCallback, SystemCallback, SystemCallbackType,
    SystemTimerCallback,
};
pub use event_loop::EventLoop;
pub use poster::EventPoster;
pub use stats::LoopStats;
