//! Running digest of everything the simulation made observable.
//!
//! Two runs with the same seed and the same nanoapps must produce the same digest.

use std::sync::Arc;

use blake3::Hasher;
use parking_lot::Mutex;

use nanohub_core::types::InstanceId;

#[derive(Default)]
struct TraceState {
    hasher: Hasher,
    entries: u64,
}

/// Cloneable recorder shared by the simulation driver and the demo nanoapps.
#[derive(Clone, Default)]
pub struct TraceRecorder {
    state: Arc<Mutex<TraceState>>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, now_ns: u64, source: InstanceId, tag: u16, detail: &[u8]) {
        let mut state = self.state.lock();
        state.hasher.update(&now_ns.to_le_bytes());
        state.hasher.update(&source.0.to_le_bytes());
        state.hasher.update(&tag.to_le_bytes());
        state.hasher.update(&(detail.len() as u64).to_le_bytes());
        state.hasher.update(detail);
        state.entries += 1;
    }

    pub fn entries(&self) -> u64 {
        self.state.lock().entries
    }

    /// Hex digest of the entries recorded so far; recording may continue afterwards.
    pub fn digest(&self) -> String {
        let hash = self.state.lock().hasher.finalize();
        hex::encode(hash.as_bytes())
    }
}
