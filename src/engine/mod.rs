//! Engine orchestrator
//!
//! Owns the shared services, wires the feed into the router, drives
//! discovery, and coordinates graceful shutdown.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::book::PriceRouter;
use crate::config::Config;
use crate::discovery::{Discovery, TraderSet};
use crate::exchange::{ApiKeySigner, ExchangeApi, KalshiRestClient};
use crate::feed::{FeedCommand, FeedConfig, FeedMessage, KalshiFeed};
use crate::risk::RiskManager;
use crate::tracker::{JsonlSink, TradeTracker};
use crate::trader::TraderPhase;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Fatal engine failures, mapped to process exit codes by the caller
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unrecoverable feed error: {0}")]
    Feed(String),
}

/// Process-lifetime owner of the trading engine
pub struct Engine {
    config: Arc<Config>,
    risk: Arc<RiskManager>,
    tracker: Arc<TradeTracker>,
    exchange: Arc<dyn ExchangeApi>,
    router: Arc<PriceRouter>,
    traders: Arc<TraderSet>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(config: Config, exchange: Arc<dyn ExchangeApi>, tracker: TradeTracker) -> Self {
        let config = Arc::new(config);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            risk: Arc::new(RiskManager::new(&config)),
            tracker: Arc::new(tracker),
            router: Arc::new(PriceRouter::new()),
            traders: Arc::new(TraderSet::new()),
            shutdown_tx,
            config,
            exchange,
        }
    }

    /// Build the production engine: REST client, trade log, live feed.
    pub fn connect(config: Config) -> Result<(Self, mpsc::Receiver<FeedMessage>, mpsc::Sender<FeedCommand>), EngineError> {
        let signer = Arc::new(ApiKeySigner::new(config.api_key.clone()));
        let exchange: Arc<dyn ExchangeApi> =
            Arc::new(KalshiRestClient::new(&config, signer.clone()));
        let sink = JsonlSink::open(&config.trade_log_path)
            .map_err(|e| EngineError::Config(format!("trade log: {e}")))?;
        let tracker = TradeTracker::new(Box::new(sink));

        let feed = KalshiFeed::new(FeedConfig::new(config.ws_url()), signer);
        let (feed_rx, feed_cmd_tx) = feed.connect();

        Ok((Self::new(config, exchange, tracker), feed_rx, feed_cmd_tx))
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn tracker(&self) -> &Arc<TradeTracker> {
        &self.tracker
    }

    pub fn router(&self) -> &Arc<PriceRouter> {
        &self.router
    }

    pub fn traders(&self) -> &Arc<TraderSet> {
        &self.traders
    }

    pub fn discovery(&self) -> Discovery {
        Discovery {
            config: Arc::clone(&self.config),
            exchange: Arc::clone(&self.exchange),
            risk: Arc::clone(&self.risk),
            tracker: Arc::clone(&self.tracker),
            router: Arc::clone(&self.router),
            traders: Arc::clone(&self.traders),
            shutdown_rx: self.shutdown_receiver(),
        }
    }

    /// Run until the feed dies or the process is signalled.
    pub async fn run(
        &self,
        mut feed_rx: mpsc::Receiver<FeedMessage>,
        feed_cmd_tx: mpsc::Sender<FeedCommand>,
    ) -> Result<(), EngineError> {
        let balance = self
            .exchange
            .get_balance()
            .await
            .map_err(|e| EngineError::Config(format!("balance check failed: {e}")))?;
        tracing::info!(balance_cents = balance, "starting balance");

        let discovery = self.discovery();
        if let Err(e) = discovery.scan_once().await {
            tracing::warn!(error = %e, "initial market scan failed");
        }
        let scan_task = tokio::spawn(async move { discovery.run().await });

        let flusher_router = Arc::clone(&self.router);
        let flusher_cmd_tx = feed_cmd_tx.clone();
        let flusher_task = tokio::spawn(async move {
            flusher_router.run_subscription_flusher(flusher_cmd_tx).await;
        });

        let mut status = tokio::time::interval(STATUS_INTERVAL);
        status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let outcome = loop {
            tokio::select! {
                message = feed_rx.recv() => match message {
                    Some(FeedMessage::Disconnected) => {
                        break Err(EngineError::Feed("feed gave up reconnecting".into()));
                    }
                    Some(message) => self.router.handle_message(message),
                    None => {
                        break Err(EngineError::Feed("feed channel closed".into()));
                    }
                },
                _ = status.tick() => self.log_status(),
                signal = &mut ctrl_c => {
                    match signal {
                        Ok(()) => tracing::info!("shutdown signal received"),
                        Err(e) => tracing::warn!(error = %e, "signal handler failed"),
                    }
                    break Ok(());
                }
            }
        };

        self.shutdown().await;
        scan_task.abort();
        flusher_task.abort();
        outcome
    }

    /// Stop accepting entries, unwind open positions within the grace
    /// period, and report what was abandoned.
    pub async fn shutdown(&self) {
        tracing::info!("engine shutting down");
        self.risk.set_shutting_down();
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace();
        loop {
            let open: Vec<(String, TraderPhase)> = self
                .traders
                .phases()
                .into_iter()
                .filter(|(_, phase)| *phase != TraderPhase::Retired)
                .collect();
            if open.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                for (ticker, phase) in &open {
                    tracing::error!(%ticker, ?phase, "position abandoned at shutdown");
                }
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        for handle in self.traders.drain() {
            if handle.is_finished() {
                handle.join().await;
            }
        }

        let summary = self.tracker.snapshot();
        tracing::info!(
            trades = summary.total_trades,
            realized_pnl_cents = summary.realized_pnl_cents,
            wins = summary.wins,
            losses = summary.losses,
            win_rate = summary.win_rate(),
            "final session summary"
        );
    }

    fn log_status(&self) {
        let risk = self.risk.summary();
        let trades = self.tracker.snapshot();
        tracing::info!(
            traders = self.traders.len(),
            open_positions = risk.open_positions,
            exposure_cents = risk.total_exposure_cents,
            exposure_cap_cents = self.config.max_total_exposure,
            realized_pnl_cents = risk.realized_pnl_today_cents,
            circuit_tripped = risk.circuit_tripped,
            trades = trades.total_trades,
            win_rate = trades.win_rate(),
            risk_rejects = self.risk.rejects(),
            feed_malformed = crate::feed::malformed_frame_count(),
            feed_out_of_order = self
                .router
                .counters
                .out_of_order_dropped
                .load(std::sync::atomic::Ordering::Relaxed),
            "status"
        );
        for line in self.traders.stats_lines() {
            tracing::debug!(trader = %line, "trader status");
        }
    }
}
