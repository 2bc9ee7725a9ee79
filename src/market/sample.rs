//! Price sample with fixed-point derived fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exchange::Side;

/// Price in integer cents, valid range [1, 99]
pub type Cents = i64;

/// Fixed-point price in tenths of a cent
pub type Tenths = i64;

/// Returns the price if it is a valid contract price
pub fn valid_price(price: Cents) -> Option<Cents> {
    (1..=99).contains(&price).then_some(price)
}

/// A single top-of-book observation for one market
///
/// Admissible when at least one side has a quote; mids and gap are computed
/// once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub ts: DateTime<Utc>,
    pub yes_bid: Option<Cents>,
    pub yes_ask: Option<Cents>,
    pub no_bid: Option<Cents>,
    pub no_ask: Option<Cents>,
    pub yes_mid_tenths: Option<Tenths>,
    pub no_mid_tenths: Option<Tenths>,
    /// 100c − yes_mid − no_mid, in tenths; negative on a crossed book
    pub gap_tenths: Option<Tenths>,
}

fn mid_tenths(bid: Option<Cents>, ask: Option<Cents>) -> Option<Tenths> {
    match (bid, ask) {
        (Some(b), Some(a)) => Some((b + a) * 5),
        (Some(p), None) | (None, Some(p)) => Some(p * 10),
        (None, None) => None,
    }
}

impl Sample {
    /// Build a sample from top-of-book quotes; None when no side is quoted
    /// or every quoted price is out of range.
    pub fn from_quotes(
        ts: DateTime<Utc>,
        yes_bid: Option<Cents>,
        yes_ask: Option<Cents>,
        no_bid: Option<Cents>,
        no_ask: Option<Cents>,
    ) -> Option<Self> {
        let yes_bid = yes_bid.and_then(valid_price);
        let yes_ask = yes_ask.and_then(valid_price);
        let no_bid = no_bid.and_then(valid_price);
        let no_ask = no_ask.and_then(valid_price);

        let yes_mid = mid_tenths(yes_bid, yes_ask);
        let no_mid = mid_tenths(no_bid, no_ask);
        if yes_mid.is_none() && no_mid.is_none() {
            return None;
        }

        let gap = match (yes_mid, no_mid) {
            (Some(y), Some(n)) => Some(1000 - y - n),
            _ => None,
        };

        Some(Self {
            ts,
            yes_bid,
            yes_ask,
            no_bid,
            no_ask,
            yes_mid_tenths: yes_mid,
            no_mid_tenths: no_mid,
            gap_tenths: gap,
        })
    }

    /// Mid of the given side in tenths
    pub fn side_mid_tenths(&self, side: Side) -> Option<Tenths> {
        match side {
            Side::Yes => self.yes_mid_tenths,
            Side::No => self.no_mid_tenths,
        }
    }

    /// Mid of the given side floored to whole cents, for order pricing
    pub fn side_mid_cents(&self, side: Side) -> Option<Cents> {
        self.side_mid_tenths(side).map(|t| t / 10)
    }
}
