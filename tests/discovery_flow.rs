//! Discovery and orchestrator lifecycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{liquid_quote, FakeExchange};
use kalshi_momentum::config::Config;
use kalshi_momentum::engine::Engine;
use kalshi_momentum::exchange::{ExchangeApi, MarketQuote};
use kalshi_momentum::tracker::{NullSink, TradeTracker};
use kalshi_momentum::trader::TraderPhase;

fn engine_with(config: Config, exchange: &Arc<FakeExchange>) -> Engine {
    let api: Arc<dyn ExchangeApi> = exchange.clone();
    Engine::new(config, api, TradeTracker::new(Box::new(NullSink)))
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_spawns_traders_for_liquid_markets_only() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![
        liquid_quote("LIQ-1", 30, 33, 500),
        liquid_quote("LIQ-2", 45, 47, 800),
        // spread of 25c fails the liquidity gate
        liquid_quote("WIDE", 20, 45, 900),
        // missing ask side
        MarketQuote {
            ticker: "ONE-SIDED".into(),
            yes_bid: Some(40),
            yes_ask: None,
            no_bid: None,
            no_ask: Some(60),
            volume: 700,
        },
    ]);

    let engine = engine_with(common::test_config(), &exchange);
    engine.discovery().scan_once().await.unwrap();

    let traders = engine.traders();
    assert_eq!(traders.len(), 2);
    assert!(traders.contains("LIQ-1"));
    assert!(traders.contains("LIQ-2"));
    assert!(engine.router().attached("LIQ-1"));
    assert!(!engine.router().attached("WIDE"));

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn capacity_cut_prefers_volume() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![
        liquid_quote("SMALL", 30, 33, 100),
        liquid_quote("BIG", 45, 47, 9_000),
        liquid_quote("MID", 50, 52, 1_000),
    ]);

    let config = Config {
        max_markets: 2,
        ..common::test_config()
    };
    let engine = engine_with(config, &exchange);
    engine.discovery().scan_once().await.unwrap();

    let traders = engine.traders();
    assert_eq!(traders.len(), 2);
    assert!(traders.contains("BIG"));
    assert!(traders.contains("MID"));
    assert!(!traders.contains("SMALL"));

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn flat_trader_retires_when_market_goes_illiquid() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![
        liquid_quote("STAYS", 30, 33, 500),
        liquid_quote("FADES", 45, 47, 800),
    ]);

    let engine = engine_with(common::test_config(), &exchange);
    let discovery = engine.discovery();
    discovery.scan_once().await.unwrap();
    assert_eq!(engine.traders().len(), 2);

    // FADES drops out of the liquid set
    exchange.set_markets(vec![liquid_quote("STAYS", 30, 33, 500)]);
    discovery.scan_once().await.unwrap();

    assert_eq!(engine.traders().len(), 1);
    assert!(engine.traders().contains("STAYS"));
    assert!(!engine.router().attached("FADES"));

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rescan_is_idempotent_for_running_traders() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![liquid_quote("LIQ-1", 30, 33, 500)]);

    let engine = engine_with(common::test_config(), &exchange);
    let discovery = engine.discovery();
    discovery.scan_once().await.unwrap();
    discovery.scan_once().await.unwrap();
    discovery.scan_once().await.unwrap();

    assert_eq!(engine.traders().len(), 1);
    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_retires_all_flat_traders() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![
        liquid_quote("LIQ-1", 30, 33, 500),
        liquid_quote("LIQ-2", 45, 47, 800),
    ]);

    let engine = engine_with(common::test_config(), &exchange);
    engine.discovery().scan_once().await.unwrap();
    assert_eq!(engine.traders().len(), 2);

    engine.shutdown().await;

    // the registry drained and no reservations are admitted anymore
    assert!(engine.traders().is_empty());
    let err = engine
        .risk()
        .check_and_reserve("LIQ-1", kalshi_momentum::exchange::Side::Yes, 1, 10, chrono::Utc::now())
        .unwrap_err();
    assert_eq!(err, kalshi_momentum::risk::RiskError::ShuttingDown);
}

#[tokio::test(flavor = "multi_thread")]
async fn retirement_deferred_while_position_open() {
    let exchange = FakeExchange::new();
    exchange.set_markets(vec![liquid_quote("PINNED", 29, 31, 500)]);
    exchange.script(common::FakeFill::FillAt(36));

    let engine = engine_with(common::test_config(), &exchange);
    let discovery = engine.discovery();
    discovery.scan_once().await.unwrap();

    // drive a bullish move into the worker's inbox
    let tx = engine.traders().sample_sender("PINNED").unwrap();
    let now = chrono::Utc::now();
    let old = kalshi_momentum::market::Sample::from_quotes(
        now - chrono::Duration::milliseconds(4000),
        Some(29),
        Some(31),
        Some(59),
        Some(61),
    )
    .unwrap();
    let cur = kalshi_momentum::market::Sample::from_quotes(
        now,
        Some(34),
        Some(36),
        Some(57),
        Some(59),
    )
    .unwrap();
    tx.send(old).unwrap();
    tx.send(cur).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while engine.traders().phase("PINNED") != Some(TraderPhase::Holding) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "trader never entered, phase {:?}",
            engine.traders().phase("PINNED")
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // market fades while the position is open: retirement is deferred
    exchange.set_markets(vec![]);
    discovery.scan_once().await.unwrap();
    assert!(engine.traders().contains("PINNED"));

    engine.shutdown().await;
}
