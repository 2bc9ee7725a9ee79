//! Exchange order API
//!
//! The REST surface the engine trades through, abstracted behind a
//! capability trait so tests can substitute an in-memory exchange.

mod kalshi;
mod types;

pub use kalshi::{ApiKeySigner, KalshiRestClient, RequestSigner};
pub use types::{
    CancelStatus, MarketQuote, OrderAction, OrderRequest, OrderResponse, OrderStatus, Side,
};

use async_trait::async_trait;

/// Trait for the outbound order API
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Submit a limit order
    async fn place_order(&self, req: &OrderRequest) -> anyhow::Result<OrderResponse>;
    /// Cancel a resting order
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<CancelStatus>;
    /// List all open markets with their top-of-book quotes
    async fn list_open_markets(&self) -> anyhow::Result<Vec<MarketQuote>>;
    /// Account balance in cents
    async fn get_balance(&self) -> anyhow::Result<i64>;
}
