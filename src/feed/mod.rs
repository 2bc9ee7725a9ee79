//! Market-data feed
//!
//! Typed order-book messages from the exchange WebSocket, with automatic
//! reconnection and subscription replay. Downstream code is programmed
//! against [`FeedMessage`] only; the wire framing stays in this module.

mod client;
mod types;

pub use client::{malformed_frame_count, KalshiFeed};
pub use types::{FeedCommand, FeedConfig, FeedError, FeedMessage};
