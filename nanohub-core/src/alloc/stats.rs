//! ## nanohub-core::alloc::stats
//! **Per-owner heap usage**

/// Heap usage attributed to one owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OwnerUsage {
    /// Bytes currently held.
    pub bytes: usize,
    /// Blocks currently held.
    pub count: usize,
    /// High-water mark of `bytes`.
    pub peak_bytes: usize,
}

impl OwnerUsage {
    #[inline]
    pub(crate) fn record_alloc(&mut self, bytes: usize) {
        self.bytes += bytes;
        self.count += 1;
        self.peak_bytes = self.peak_bytes.max(self.bytes);
    }

    #[inline]
    pub(crate) fn record_free(&mut self, bytes: usize) {
        self.bytes = self.bytes.saturating_sub(bytes);
        self.count = self.count.saturating_sub(1);
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_survives_frees() {
        let mut usage = OwnerUsage::default();
        usage.record_alloc(100);
        usage.record_alloc(50);
        usage.record_free(100);
        assert_eq!(usage.bytes, 50);
        assert_eq!(usage.count, 1);
        assert_eq!(usage.peak_bytes, 150);
        usage.record_free(50);
        assert!(usage.is_empty());
    }
}
