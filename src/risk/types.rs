//! Risk management types

use thiserror::Error;
use uuid::Uuid;

use crate::exchange::Side;
use crate::market::Cents;

/// Reasons a trade is refused. All are non-fatal: the caller skips the
/// opportunity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RiskError {
    #[error("circuit breaker tripped")]
    CircuitTripped,
    #[error("engine is shutting down")]
    ShuttingDown,
    #[error("position limit: {held} held + {requested} requested > {limit}")]
    PositionLimit {
        held: u32,
        requested: u32,
        limit: u32,
    },
    #[error("exposure cap: {committed}c committed + {requested}c requested > {cap}c")]
    ExposureCap {
        committed: Cents,
        requested: Cents,
        cap: Cents,
    },
    #[error("cooldown: {remaining_ms}ms remaining")]
    Cooldown { remaining_ms: i64 },
}

/// A pending exposure commitment, held from trade decision until the order
/// is acknowledged filled or released.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub id: Uuid,
    pub ticker: String,
    pub side: Side,
    pub size: u32,
    pub price: Cents,
}

impl Reservation {
    /// Exposure reserved, in cents
    pub fn amount(&self) -> Cents {
        self.size as Cents * self.price
    }
}
