//! Band controller: decides how far to grow or shrink the pad from one
//! filesystem reading.
//!
//! The controller is memoryless. Each decision depends only on the latest
//! free percentage, capacity and pad size, so a restart loses nothing but the
//! pad size, which is read back from disk.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

use serde::Serialize;

use crate::padding::rate::RateLimit;

/// What one iteration should do to the padding file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PadAction {
    /// Append `blocks` zero blocks. `desired_bytes` is the uncapped,
    /// block-aligned amount that would reach the upper bound.
    Grow { blocks: u64, desired_bytes: u64 },
    /// Truncate the file to `new_len`, releasing `bytes`.
    Shrink { bytes: u64, new_len: u64 },
    /// Inside the band, or nothing can be done this iteration.
    Hold,
}

/// Keeps free space within `[min_free_pct, max_free_pct]`.
#[derive(Debug, Clone, Copy)]
pub struct BandController {
    min_free_pct: f64,
    max_free_pct: f64,
    rate: RateLimit,
}

impl BandController {
    /// `min_free_pct < max_free_pct` is the caller's responsibility; the
    /// configuration layer rejects anything else.
    #[must_use]
    pub fn new(min_free_pct: f64, max_free_pct: f64, rate: RateLimit) -> Self {
        Self {
            min_free_pct,
            max_free_pct,
            rate,
        }
    }

    #[must_use]
    pub fn rate(&self) -> &RateLimit {
        &self.rate
    }

    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.rate.block_size()
    }

    /// Pick the action for one reading.
    ///
    /// Growth is capped by the rate limit; shrinking is not, since it only
    /// releases space. Shrinking never goes below an empty file.
    #[must_use]
    pub fn decide(&self, free_pct: f64, total_bytes: u64, file_size: u64) -> PadAction {
        let block = self.rate.block_size();

        if free_pct > self.max_free_pct {
            let desired_bytes = aligned_share(free_pct - self.max_free_pct, total_bytes, block);
            let blocks = self.rate.cap(desired_bytes / block);
            if blocks == 0 {
                return PadAction::Hold;
            }
            return PadAction::Grow {
                blocks,
                desired_bytes,
            };
        }

        if free_pct < self.min_free_pct {
            let bytes = aligned_share(self.min_free_pct - free_pct, total_bytes, block).min(file_size);
            if bytes == 0 {
                return PadAction::Hold;
            }
            return PadAction::Shrink {
                bytes,
                new_len: file_size - bytes,
            };
        }

        PadAction::Hold
    }
}

/// `floor(pct / 100 * total)` rounded down to a whole number of blocks.
fn aligned_share(pct: f64, total_bytes: u64, block: u64) -> u64 {
    let raw = (pct / 100.0 * total_bytes as f64).floor();
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    let bytes = raw as u64;
    (bytes / block) * block
}
