//! Order-book projection and price fan-out
//!
//! Keeps one best-of-book projection per subscribed market (full depth is
//! not retained) and routes derived samples to the owning market worker.

mod depth;
mod router;

pub use depth::MarketBook;
pub use router::{PriceRouter, RouterCounters};
