//! Per-market book projection

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::exchange::Side;
use crate::market::{Cents, Sample};

/// Bid depth for one contract side: price → resting quantity
#[derive(Debug, Default, Clone)]
struct DepthSide {
    levels: BTreeMap<Cents, i64>,
}

impl DepthSide {
    fn replace(&mut self, levels: &[(Cents, i64)]) {
        self.levels.clear();
        for &(price, qty) in levels {
            if (1..=99).contains(&price) && qty > 0 {
                self.levels.insert(price, qty);
            }
        }
    }

    fn apply_delta(&mut self, price: Cents, delta_qty: i64) {
        if !(1..=99).contains(&price) {
            return;
        }
        let qty = self.levels.get(&price).copied().unwrap_or(0) + delta_qty;
        if qty > 0 {
            self.levels.insert(price, qty);
        } else {
            self.levels.remove(&price);
        }
    }

    fn best_bid(&self) -> Option<Cents> {
        self.levels.keys().next_back().copied()
    }
}

/// Best-of-book state for one market
///
/// Kalshi books carry bids per contract side; the ask on each side is
/// implied by the best bid of the opposite contract (100 − bid).
#[derive(Debug, Default, Clone)]
pub struct MarketBook {
    yes: DepthSide,
    no: DepthSide,
    last_delta_ts: Option<DateTime<Utc>>,
}

impl MarketBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the book with a snapshot. The delta ordering watermark
    /// resets: a snapshot starts a fresh sequence.
    pub fn apply_snapshot(&mut self, yes: &[(Cents, i64)], no: &[(Cents, i64)]) {
        self.yes.replace(yes);
        self.no.replace(no);
        self.last_delta_ts = None;
    }

    /// Merge one delta. Returns false when the delta is older than the
    /// last applied one and was dropped.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: Cents,
        delta_qty: i64,
        ts: DateTime<Utc>,
    ) -> bool {
        if let Some(last) = self.last_delta_ts {
            if ts <= last {
                return false;
            }
        }
        self.last_delta_ts = Some(ts);
        match side {
            Side::Yes => self.yes.apply_delta(price, delta_qty),
            Side::No => self.no.apply_delta(price, delta_qty),
        }
        true
    }

    pub fn yes_bid(&self) -> Option<Cents> {
        self.yes.best_bid()
    }

    pub fn no_bid(&self) -> Option<Cents> {
        self.no.best_bid()
    }

    pub fn yes_ask(&self) -> Option<Cents> {
        self.no.best_bid().map(|bid| 100 - bid)
    }

    pub fn no_ask(&self) -> Option<Cents> {
        self.yes.best_bid().map(|bid| 100 - bid)
    }

    /// Derive a sample at the given timestamp; None when no side is quoted.
    pub fn sample(&self, ts: DateTime<Utc>) -> Option<Sample> {
        Sample::from_quotes(
            ts,
            self.yes_bid(),
            self.yes_ask(),
            self.no_bid(),
            self.no_ask(),
        )
    }
}
