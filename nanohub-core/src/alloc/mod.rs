//! ## nanohub-core::alloc
//! **Per-nanoapp heap accounting**
//!
//! ### Expectations:
//! - Every block is attributed to exactly one owner
//! - Global byte and count ceilings hold at all times
//! - A nanoapp's outstanding blocks are reclaimed when it unloads
//!
//! ### Key Submodules:
//! - `memory_manager/`: the ledger and the allocation entry points
//! - `stats/`: per-owner usage snapshots

pub mod memory_manager;
pub mod stats;

pub use memory_manager::{AllocError, HeapPtr, MemoryLimits, MemoryManager};
pub use stats::OwnerUsage;
