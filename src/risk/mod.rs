//! Risk management
//!
//! A single shared gate in front of every entry: per-market position caps,
//! the global exposure cap, per-market cooldowns, and the daily-loss
//! circuit breaker. Entries reserve exposure before the order goes out and
//! commit or release it afterwards, so two markets racing for the last
//! slice of the cap are linearized by one lock.

mod manager;
mod types;

pub use manager::{RiskManager, RiskSummary};
pub use types::{Reservation, RiskError};
