//! ## nanohub-core::alloc::memory_manager
//! **Heap ledger wrapping the system allocator**
//!
//! Blocks are handed out as opaque [`HeapPtr`] ids. The ledger records the owner and size of
//! each block, so frees can be checked against the requester and an unloading nanoapp's blocks
//! can be reclaimed in one sweep.

use std::collections::HashMap;
use std::num::NonZeroU64;

use nanohub_config::MemoryConfig;
use parking_lot::Mutex;
use thiserror::Error;

use super::stats::OwnerUsage;
use crate::types::InstanceId;

/// Opaque reference to a live heap block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapPtr(NonZeroU64);

impl HeapPtr {
    pub fn id(self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    #[error("Zero-byte allocation")]
    ZeroSize,

    #[error("Allocation of {requested} bytes exceeds the per-allocation limit of {max}")]
    TooLarge { requested: usize, max: usize },

    #[error("Allocation of {requested} bytes exceeds remaining heap ({available} bytes)")]
    HeapExhausted { requested: usize, available: usize },

    #[error("Allocation count limit of {max} reached")]
    TooManyAllocations { max: usize },

    #[error("System allocator could not provide {0} bytes")]
    OutOfMemory(usize),
}

/// Ceilings enforced by the [`MemoryManager`].
#[derive(Clone, Copy, Debug)]
pub struct MemoryLimits {
    pub max_total_bytes: usize,
    pub max_allocation_bytes: usize,
    pub max_allocation_count: usize,
    pub enforce_total_ceiling: bool,
}

impl From<&MemoryConfig> for MemoryLimits {
    fn from(config: &MemoryConfig) -> Self {
        Self {
            max_total_bytes: config.max_total_bytes,
            max_allocation_bytes: config.max_allocation_bytes,
            max_allocation_count: config.max_allocation_count,
            enforce_total_ceiling: config.enforce_total_ceiling,
        }
    }
}

struct Block {
    owner: InstanceId,
    data: Box<[u8]>,
}

#[derive(Default)]
struct Ledger {
    blocks: HashMap<HeapPtr, Block>,
    usage: HashMap<InstanceId, OwnerUsage>,
    next_id: u64,
    total_bytes: usize,
    peak_bytes: usize,
}

pub struct MemoryManager {
    limits: MemoryLimits,
    ledger: Mutex<Ledger>,
}

impl MemoryManager {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            limits,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Allocates `bytes` on behalf of `requester`; `None` on any failure.
    pub fn alloc(&self, requester: InstanceId, bytes: u32) -> Option<HeapPtr> {
        match self.try_alloc(requester, bytes) {
            Ok(ptr) => Some(ptr),
            Err(err) => {
                tracing::debug!(%requester, bytes, error = %err, "Heap allocation refused");
                None
            }
        }
    }

    pub fn try_alloc(&self, requester: InstanceId, bytes: u32) -> Result<HeapPtr, AllocError> {
        let requested = bytes as usize;
        if requested == 0 {
            return Err(AllocError::ZeroSize);
        }
        if requested > self.limits.max_allocation_bytes {
            return Err(AllocError::TooLarge {
                requested,
                max: self.limits.max_allocation_bytes,
            });
        }

        let mut ledger = self.ledger.lock();
        if ledger.blocks.len() >= self.limits.max_allocation_count {
            return Err(AllocError::TooManyAllocations {
                max: self.limits.max_allocation_count,
            });
        }
        if self.limits.enforce_total_ceiling {
            let available = self.limits.max_total_bytes.saturating_sub(ledger.total_bytes);
            if requested > available {
                return Err(AllocError::HeapExhausted {
                    requested,
                    available,
                });
            }
        }

        let mut data = Vec::new();
        data.try_reserve_exact(requested)
            .map_err(|_| AllocError::OutOfMemory(requested))?;
        data.resize(requested, 0u8);

        ledger.next_id += 1;
        let id = NonZeroU64::new(ledger.next_id).ok_or(AllocError::OutOfMemory(requested))?;
        let ptr = HeapPtr(id);
        ledger.blocks.insert(
            ptr,
            Block {
                owner: requester,
                data: data.into_boxed_slice(),
            },
        );
        ledger.total_bytes += requested;
        ledger.peak_bytes = ledger.peak_bytes.max(ledger.total_bytes);
        ledger.usage.entry(requester).or_default().record_alloc(requested);
        Ok(ptr)
    }

    /// Returns a block to the heap. `None` is a no-op; a pointer that is unknown or owned by
    /// someone else is logged and ignored.
    pub fn free(&self, requester: InstanceId, ptr: Option<HeapPtr>) {
        let Some(ptr) = ptr else {
            return;
        };

        let mut ledger = self.ledger.lock();
        match ledger.blocks.get(&ptr) {
            None => {
                tracing::error!(%requester, ptr = ptr.id(), "Free of unknown heap block");
            }
            Some(block) if block.owner != requester => {
                tracing::error!(
                    %requester,
                    owner = %block.owner,
                    ptr = ptr.id(),
                    "Free of heap block owned by another nanoapp"
                );
            }
            Some(_) => {
                if let Some(block) = ledger.blocks.remove(&ptr) {
                    ledger.release_locked(block);
                }
            }
        }
    }

    /// Reclaims every block owned by `owner`, returning what was outstanding.
    pub fn free_all_owned_by(&self, owner: InstanceId) -> OwnerUsage {
        let mut ledger = self.ledger.lock();
        let owned: Vec<HeapPtr> = ledger
            .blocks
            .iter()
            .filter(|(_, block)| block.owner == owner)
            .map(|(ptr, _)| *ptr)
            .collect();

        let outstanding = ledger.usage.get(&owner).copied().unwrap_or_default();
        for ptr in owned {
            if let Some(block) = ledger.blocks.remove(&ptr) {
                ledger.release_locked(block);
            }
        }
        ledger.usage.remove(&owner);
        outstanding
    }

    /// Runs `f` over the contents of a block owned by `requester`.
    ///
    /// The ledger lock is held for the duration of `f`, so `f` must not call back into the
    /// manager.
    pub fn with_block_mut<R>(
        &self,
        requester: InstanceId,
        ptr: HeapPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let mut ledger = self.ledger.lock();
        match ledger.blocks.get_mut(&ptr) {
            Some(block) if block.owner == requester => Some(f(&mut block.data)),
            _ => None,
        }
    }

    pub fn total_allocated_bytes(&self) -> usize {
        self.ledger.lock().total_bytes
    }

    pub fn peak_allocated_bytes(&self) -> usize {
        self.ledger.lock().peak_bytes
    }

    pub fn allocation_count(&self) -> usize {
        self.ledger.lock().blocks.len()
    }

    pub fn usage_of(&self, owner: InstanceId) -> OwnerUsage {
        self.ledger.lock().usage.get(&owner).copied().unwrap_or_default()
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }
}

impl Ledger {
    fn release_locked(&mut self, block: Block) {
        let bytes = block.data.len();
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
        if let Some(usage) = self.usage.get_mut(&block.owner) {
            usage.record_free(bytes);
        }
    }
}
