//! Bounded, time-ordered price history

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

use super::Sample;

/// Rolling window of samples for one market
///
/// Timestamps strictly increase: a sample not newer than the last accepted
/// one is dropped. The head is evicted once capacity is reached.
pub struct PriceHistory {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl PriceHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Capacity sized for a momentum window, assuming samples arrive no
    /// faster than every 40ms, plus slack for bursts.
    pub fn for_window(window_seconds: u64) -> Self {
        Self::with_capacity(window_seconds as usize * 25 + 64)
    }

    /// Append a sample; returns false if it was dropped as out-of-order.
    pub fn insert(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.ts <= last.ts {
                return false;
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Oldest sample within the window ending at `t_now`, paired with the
    /// latest sample. None when the window holds fewer than two distinct
    /// samples.
    pub fn window_at(
        &self,
        t_now: DateTime<Utc>,
        window: std::time::Duration,
    ) -> Option<(&Sample, &Sample)> {
        let latest = self.samples.back()?;
        let cutoff = t_now - Duration::from_std(window).ok()?;
        let oldest = self.samples.iter().find(|s| s.ts >= cutoff)?;
        if oldest.ts == latest.ts {
            return None;
        }
        Some((oldest, latest))
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
