//! Shared test doubles
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use kalshi_momentum::config::Config;
use kalshi_momentum::exchange::{
    CancelStatus, ExchangeApi, MarketQuote, OrderRequest, OrderResponse, OrderStatus,
};
use kalshi_momentum::market::Cents;

/// Scripted outcome for the next order submission
#[derive(Debug, Clone, Copy)]
pub enum FakeFill {
    /// Full fill at the given price
    FillAt(Cents),
    /// Partial fill at the given price for the given quantity
    PartialAt(Cents, u32),
    /// Order rests; the id is returned for later cancellation
    Resting,
    /// Exchange rejects the order
    Reject,
}

/// In-memory exchange. Orders fill at their limit price unless a scripted
/// outcome is queued.
pub struct FakeExchange {
    pub orders: Mutex<Vec<OrderRequest>>,
    pub cancels: Mutex<Vec<String>>,
    pub markets: Mutex<Vec<MarketQuote>>,
    scripted: Mutex<VecDeque<FakeFill>>,
    cancel_status: Mutex<CancelStatus>,
    next_id: AtomicU64,
}

impl FakeExchange {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(vec![]),
            cancels: Mutex::new(vec![]),
            markets: Mutex::new(vec![]),
            scripted: Mutex::new(VecDeque::new()),
            cancel_status: Mutex::new(CancelStatus::Ok),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn script(&self, fill: FakeFill) {
        self.scripted.lock().unwrap().push_back(fill);
    }

    pub fn set_cancel_status(&self, status: CancelStatus) {
        *self.cancel_status.lock().unwrap() = status;
    }

    pub fn set_markets(&self, markets: Vec<MarketQuote>) {
        *self.markets.lock().unwrap() = markets;
    }

    pub fn order_log(&self) -> Vec<OrderRequest> {
        self.orders.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeApi for FakeExchange {
    async fn place_order(&self, req: &OrderRequest) -> anyhow::Result<OrderResponse> {
        self.orders.lock().unwrap().push(req.clone());
        let order_id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let fill = self
            .scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(FakeFill::FillAt(req.limit_price));

        let response = match fill {
            FakeFill::FillAt(price) => OrderResponse {
                order_id,
                status: OrderStatus::Filled,
                filled_qty: req.size,
                avg_fill_price: price,
            },
            FakeFill::PartialAt(price, qty) => OrderResponse {
                order_id,
                status: OrderStatus::PartiallyFilled,
                filled_qty: qty.min(req.size),
                avg_fill_price: price,
            },
            FakeFill::Resting => OrderResponse {
                order_id,
                status: OrderStatus::Resting,
                filled_qty: 0,
                avg_fill_price: 0,
            },
            FakeFill::Reject => OrderResponse {
                order_id,
                status: OrderStatus::Rejected,
                filled_qty: 0,
                avg_fill_price: 0,
            },
        };
        Ok(response)
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<CancelStatus> {
        self.cancels.lock().unwrap().push(order_id.to_string());
        Ok(*self.cancel_status.lock().unwrap())
    }

    async fn list_open_markets(&self) -> anyhow::Result<Vec<MarketQuote>> {
        Ok(self.markets.lock().unwrap().clone())
    }

    async fn get_balance(&self) -> anyhow::Result<i64> {
        Ok(100_000)
    }
}

/// Test config: generous caps, and a cooldown long enough that a closed
/// trade is not immediately re-entered while the window still shows the
/// move. Tests exercising re-entry override it.
pub fn test_config() -> Config {
    Config {
        momentum_window_seconds: 5,
        entry_threshold_cents: 2,
        convergence_threshold_pct: 3,
        order_size: 5,
        max_position_per_market: 50,
        max_total_exposure: 50_000,
        stop_loss_cents: 2,
        trailing_stop_cents: 2,
        kalshi_fee_cents: 1,
        max_daily_loss: 5_000,
        cooldown_seconds: 60,
        min_volume: 0,
        max_spread: 10,
        max_markets: 10,
        shutdown_grace_seconds: 5,
        ..Default::default()
    }
}

pub fn liquid_quote(ticker: &str, yes_bid: Cents, yes_ask: Cents, volume: i64) -> MarketQuote {
    MarketQuote {
        ticker: ticker.into(),
        yes_bid: Some(yes_bid),
        yes_ask: Some(yes_ask),
        no_bid: Some(100 - yes_ask),
        no_ask: Some(100 - yes_bid),
        volume,
    }
}
