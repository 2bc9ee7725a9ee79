//! kalshi-momentum: momentum-convergence trading engine for Kalshi
//! binary (YES/NO) prediction markets
//!
//! This library provides the core components for:
//! - Real-time order-book feed over WebSocket with auto-reconnect
//! - Best-of-book projection and per-market price fan-out
//! - Bounded per-market price history and gap/momentum analysis
//! - Per-market trading workers with stop-loss and trailing-stop exits
//! - Shared risk management: exposure caps, cooldowns, daily-loss circuit
//! - Trade ledger with realized P&L and JSONL persistence
//! - Market discovery by liquidity with dynamic worker lifecycle

pub mod book;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod exchange;
pub mod feed;
pub mod market;
pub mod risk;
pub mod strategy;
pub mod telemetry;
pub mod tracker;
pub mod trader;
