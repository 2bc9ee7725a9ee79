//! Trade ledger
//!
//! Append-only record of entries and exits with realized P&L. Closed trades
//! are handed to a sink for durable persistence; the ledger itself is
//! in-memory.

mod sink;
mod types;

pub use sink::{JsonlSink, NullSink, TradeSink};
pub use types::{ExitReason, MarketStats, TradeRecord, TrackerSummary};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::exchange::Side;
use crate::market::Cents;

#[derive(Default)]
struct Ledger {
    trades: Vec<TradeRecord>,
    open_by_ticker: HashMap<String, usize>,
    realized_pnl_cents: Cents,
    wins: u64,
    losses: u64,
    per_ticker: HashMap<String, MarketStats>,
}

/// Shared, append-only trade tracker
pub struct TradeTracker {
    ledger: Mutex<Ledger>,
    sink: Box<dyn TradeSink>,
}

impl TradeTracker {
    pub fn new(sink: Box<dyn TradeSink>) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            sink,
        }
    }

    /// Record a position entry. Fails if the ticker already has an open
    /// trade: one open position per market is a structural invariant.
    pub fn record_entry(
        &self,
        ticker: &str,
        side: Side,
        size: u32,
        entry_price: Cents,
        opened_at: DateTime<Utc>,
    ) -> anyhow::Result<Uuid> {
        let mut ledger = self.ledger.lock().expect("tracker lock poisoned");
        if ledger.open_by_ticker.contains_key(ticker) {
            anyhow::bail!("trade already open for {ticker}");
        }

        let record = TradeRecord {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            side,
            size,
            entry_price,
            exit_price: None,
            opened_at,
            closed_at: None,
            exit_reason: None,
            realized_pnl_cents: None,
        };
        let id = record.id;
        let index = ledger.trades.len();
        ledger.trades.push(record);
        ledger.open_by_ticker.insert(ticker.to_string(), index);
        Ok(id)
    }

    /// Close the open trade for a ticker. The caller supplies the realized
    /// P&L (fees already applied). The closed record is immutable and is
    /// appended to the sink.
    pub fn record_exit(
        &self,
        ticker: &str,
        exit_price: Cents,
        closed_at: DateTime<Utc>,
        reason: ExitReason,
        realized_pnl_cents: Cents,
    ) -> anyhow::Result<TradeRecord> {
        let closed = {
            let mut ledger = self.ledger.lock().expect("tracker lock poisoned");
            let index = ledger
                .open_by_ticker
                .remove(ticker)
                .ok_or_else(|| anyhow::anyhow!("no open trade for {ticker}"))?;

            let record = &mut ledger.trades[index];
            record.exit_price = Some(exit_price);
            record.closed_at = Some(closed_at);
            record.exit_reason = Some(reason);
            record.realized_pnl_cents = Some(realized_pnl_cents);
            let closed = record.clone();

            ledger.realized_pnl_cents += realized_pnl_cents;
            if realized_pnl_cents > 0 {
                ledger.wins += 1;
            } else {
                ledger.losses += 1;
            }
            let stats = ledger.per_ticker.entry(ticker.to_string()).or_default();
            stats.trades += 1;
            stats.realized_pnl_cents += realized_pnl_cents;
            closed
        };

        if let Err(e) = self.sink.append(&closed) {
            tracing::warn!(ticker, error = %e, "failed to persist closed trade");
        }
        Ok(closed)
    }

    pub fn snapshot(&self) -> TrackerSummary {
        let ledger = self.ledger.lock().expect("tracker lock poisoned");
        TrackerSummary {
            total_trades: ledger.trades.len(),
            open_trades: ledger.open_by_ticker.len(),
            realized_pnl_cents: ledger.realized_pnl_cents,
            wins: ledger.wins,
            losses: ledger.losses,
            per_ticker: ledger.per_ticker.clone(),
        }
    }

    /// All recorded trades, for tests and the shutdown report
    pub fn trades(&self) -> Vec<TradeRecord> {
        self.ledger
            .lock()
            .expect("tracker lock poisoned")
            .trades
            .clone()
    }
}
