//! Per-market price state
//!
//! Samples carry top-of-book quotes in integer cents; derived mids and the
//! YES/NO gap are fixed-point tenths of a cent so momentum deltas stay exact
//! between samples.

mod history;
mod sample;

pub use history::PriceHistory;
pub use sample::{Cents, Sample, Tenths};
