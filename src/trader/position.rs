//! Open position state

use chrono::{DateTime, Utc};

use crate::exchange::Side;
use crate::market::Cents;

/// An open position in one market
#[derive(Debug, Clone)]
pub struct Position {
    pub side: Side,
    /// Contracts held
    pub size: u32,
    pub entry_price: Cents,
    /// Highest side-mid observed since entry; never decreases
    pub highest_seen: Cents,
    /// Hard floor under the entry, fee included
    pub stop_loss_price: Cents,
    /// Ratchets with highest_seen, never downward
    pub trailing_stop_price: Cents,
    pub opened_at: DateTime<Utc>,
    pub entry_order_id: String,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        side: Side,
        size: u32,
        entry_price: Cents,
        opened_at: DateTime<Utc>,
        entry_order_id: String,
        stop_loss_cents: Cents,
        trailing_stop_cents: Cents,
        fee_cents: Cents,
    ) -> Self {
        Self {
            side,
            size,
            entry_price,
            highest_seen: entry_price,
            stop_loss_price: (entry_price - stop_loss_cents - fee_cents).max(1),
            trailing_stop_price: entry_price - trailing_stop_cents,
            opened_at,
            entry_order_id,
        }
    }

    /// Ratchet the trailing stop on a favorable move. No-op unless the mid
    /// exceeds the highest seen so far.
    pub fn ratchet(&mut self, mid: Cents, trailing_stop_cents: Cents) {
        if mid > self.highest_seen {
            self.highest_seen = mid;
            self.trailing_stop_price = self.highest_seen - trailing_stop_cents;
        }
    }

    pub fn stop_loss_hit(&self, mid: Cents) -> bool {
        mid <= self.stop_loss_price
    }

    pub fn trailing_stop_hit(&self, mid: Cents) -> bool {
        mid <= self.trailing_stop_price
    }

    /// Realized P&L for `qty` contracts sold at `exit_price`, with the
    /// round-trip fee applied per contract.
    pub fn realized_pnl_cents(&self, exit_price: Cents, qty: u32, fee_cents: Cents) -> Cents {
        (exit_price - self.entry_price - fee_cents) * qty as Cents
    }
}
