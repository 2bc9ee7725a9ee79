//! Trade record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::exchange::Side;
use crate::market::Cents;

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    Reversal,
    Shutdown,
}

/// One round-trip trade. Immutable once closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub ticker: String,
    pub side: Side,
    pub size: u32,
    pub entry_price: Cents,
    pub exit_price: Option<Cents>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl_cents: Option<Cents>,
}

/// Per-market aggregates
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketStats {
    pub trades: u64,
    pub realized_pnl_cents: Cents,
}

/// Point-in-time tracker summary
#[derive(Debug, Clone)]
pub struct TrackerSummary {
    pub total_trades: usize,
    pub open_trades: usize,
    pub realized_pnl_cents: Cents,
    pub wins: u64,
    pub losses: u64,
    pub per_ticker: HashMap<String, MarketStats>,
}

impl TrackerSummary {
    pub fn win_rate(&self) -> f64 {
        let decided = self.wins + self.losses;
        if decided == 0 {
            return 0.0;
        }
        self.wins as f64 / decided as f64
    }
}
