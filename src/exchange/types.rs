//! Order API types

use serde::{Deserialize, Serialize};

use crate::market::Cents;

/// Contract side of a binary market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Yes => write!(f, "yes"),
            Side::No => write!(f, "no"),
        }
    }
}

/// Order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "buy"),
            OrderAction::Sell => write!(f, "sell"),
        }
    }
}

/// Exchange-reported order outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Filled,
    PartiallyFilled,
    Resting,
    Rejected,
}

/// A limit order to be submitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: Side,
    pub action: OrderAction,
    /// Limit price in cents, [1, 99]
    pub limit_price: Cents,
    /// Contracts
    pub size: u32,
}

/// Exchange response to an order submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_qty: u32,
    /// Average fill price in cents; meaningful when filled_qty > 0
    pub avg_fill_price: Cents,
}

/// Cancel outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    Ok,
    NotFound,
}

/// Top-of-book quote for an open market, as returned by discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketQuote {
    pub ticker: String,
    pub yes_bid: Option<Cents>,
    pub yes_ask: Option<Cents>,
    pub no_bid: Option<Cents>,
    pub no_ask: Option<Cents>,
    pub volume: i64,
}

impl MarketQuote {
    /// Yes bid-ask spread in cents, when both sides are quoted
    pub fn spread(&self) -> Option<Cents> {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }
}
