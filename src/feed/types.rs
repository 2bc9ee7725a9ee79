//! Feed message and configuration types

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

use crate::exchange::Side;
use crate::market::Cents;

/// Inbound feed events, already decoded from the wire
#[derive(Debug, Clone)]
pub enum FeedMessage {
    /// Full book for one market: (price, qty) bid levels per side
    Snapshot {
        ticker: String,
        yes: Vec<(Cents, i64)>,
        no: Vec<(Cents, i64)>,
    },
    /// Single-level quantity change
    Delta {
        ticker: String,
        side: Side,
        price: Cents,
        delta_qty: i64,
        ts: DateTime<Utc>,
    },
    /// Subscription acknowledgement
    Subscribed { tickers: Vec<String> },
    /// Exchange-reported error
    Error { code: i64, msg: String },
    /// Connection established (snapshots will replay)
    Connected,
    /// Connection lost; the client is backing off before reconnecting
    Reconnecting { attempt: u32 },
    /// The client gave up reconnecting
    Disconnected,
}

/// Commands to the feed client
#[derive(Debug, Clone)]
pub enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// Feed client configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    /// 0 = retry forever
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 10,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Feed layer failures
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectsExceeded,
    #[error("feed channel closed")]
    ChannelClosed,
}
