//! Momentum convergence strategy
//!
//! YES and NO prices of a binary market should sum to ~100 cents. A
//! shrinking gap accompanied by a directional YES move is treated as
//! momentum: buy YES when YES is rising into the convergence, buy NO when
//! YES is falling.

mod momentum;

pub use momentum::{analyze, Signal, SignalKind, StrategyParams};
