//! Per-interval write budget derived once from the configured rate.

#![allow(missing_docs)]

/// Hard ceiling on zero blocks written per wake-up.
///
/// Computed once at startup as `interval * kB/s * 1024 / block_size` and
/// never adapted afterwards. Changing the interval or the rate independently
/// at runtime would require recomputing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    block_size: u64,
    blocks_per_interval: u64,
}

impl RateLimit {
    /// Derive the budget. Returns `None` for a zero block size, which the
    /// caller must treat as fatal before entering the loop.
    #[must_use]
    pub fn derive(poll_interval_secs: u64, rate_kbps: u64, block_size: u64) -> Option<Self> {
        if block_size == 0 {
            return None;
        }
        let bytes = poll_interval_secs
            .saturating_mul(rate_kbps)
            .saturating_mul(1024);
        Some(Self {
            block_size,
            blocks_per_interval: bytes / block_size,
        })
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    #[must_use]
    pub fn blocks_per_interval(&self) -> u64 {
        self.blocks_per_interval
    }

    /// Upper bound on bytes written in one iteration.
    #[must_use]
    pub fn bytes_per_interval(&self) -> u64 {
        self.blocks_per_interval.saturating_mul(self.block_size)
    }

    /// Clamp a wanted block count to the budget.
    #[must_use]
    pub fn cap(&self, wanted_blocks: u64) -> u64 {
        wanted_blocks.min(self.blocks_per_interval)
    }
}
