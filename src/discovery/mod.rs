//! Market discovery
//!
//! Periodically classifies open markets by liquidity, spawns workers for
//! fresh liquid markets, and retires workers whose markets went illiquid.
//! A worker holding a position is never retired; it stays pinned until the
//! position unwinds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::book::PriceRouter;
use crate::config::Config;
use crate::exchange::{ExchangeApi, MarketQuote};
use crate::risk::RiskManager;
use crate::tracker::TradeTracker;
use crate::trader::{MarketTrader, TraderHandle, TraderPhase};

/// Liquid iff both yes quotes exist, the spread is tight enough, and the
/// volume floor is met (a zero floor disables the volume check).
pub fn is_liquid(quote: &MarketQuote, config: &Config) -> bool {
    let Some(spread) = quote.spread() else {
        return false;
    };
    if spread > config.max_spread {
        return false;
    }
    config.min_volume == 0 || quote.volume >= config.min_volume
}

/// Order candidates for the capacity cut: highest volume first, tightest
/// spread as the tie-break.
pub fn rank_candidates(candidates: &mut [MarketQuote]) {
    candidates.sort_by(|a, b| {
        b.volume
            .cmp(&a.volume)
            .then_with(|| a.spread().unwrap_or(i64::MAX).cmp(&b.spread().unwrap_or(i64::MAX)))
    });
}

/// Live registry of spawned workers
#[derive(Default)]
pub struct TraderSet {
    inner: Mutex<HashMap<String, TraderHandle>>,
}

impl TraderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: TraderHandle) {
        let mut inner = self.inner.lock().expect("trader set lock poisoned");
        inner.insert(handle.ticker.clone(), handle);
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.inner
            .lock()
            .expect("trader set lock poisoned")
            .contains_key(ticker)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("trader set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tickers(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("trader set lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn phase(&self, ticker: &str) -> Option<TraderPhase> {
        self.inner
            .lock()
            .expect("trader set lock poisoned")
            .get(ticker)
            .map(|h| h.phase())
    }

    pub fn sample_sender(
        &self,
        ticker: &str,
    ) -> Option<tokio::sync::broadcast::Sender<crate::market::Sample>> {
        self.inner
            .lock()
            .expect("trader set lock poisoned")
            .get(ticker)
            .map(|h| h.sample_sender())
    }

    pub fn phases(&self) -> Vec<(String, TraderPhase)> {
        self.inner
            .lock()
            .expect("trader set lock poisoned")
            .iter()
            .map(|(t, h)| (t.clone(), h.phase()))
            .collect()
    }

    /// Retire and remove a worker if it is flat. Returns true on removal.
    pub fn retire_if_flat(&self, ticker: &str) -> bool {
        let mut inner = self.inner.lock().expect("trader set lock poisoned");
        let Some(handle) = inner.get(ticker) else {
            return false;
        };
        if handle.phase() != TraderPhase::Flat {
            return false;
        }
        handle.request_retire();
        inner.remove(ticker);
        true
    }

    pub fn request_retire_all(&self) {
        let inner = self.inner.lock().expect("trader set lock poisoned");
        for handle in inner.values() {
            handle.request_retire();
        }
    }

    pub fn drain(&self) -> Vec<TraderHandle> {
        let mut inner = self.inner.lock().expect("trader set lock poisoned");
        inner.drain().map(|(_, h)| h).collect()
    }

    /// Snapshot of per-worker stats for the status report
    pub fn stats_lines(&self) -> Vec<String> {
        use std::sync::atomic::Ordering;
        let inner = self.inner.lock().expect("trader set lock poisoned");
        let mut lines: Vec<String> = inner
            .iter()
            .map(|(ticker, handle)| {
                format!(
                    "{}: phase={:?} signals={} entries={} exits={}",
                    ticker,
                    handle.phase(),
                    handle.stats.signals.load(Ordering::Relaxed),
                    handle.stats.entries.load(Ordering::Relaxed),
                    handle.stats.exits.load(Ordering::Relaxed),
                )
            })
            .collect();
        lines.sort();
        lines
    }
}

/// Shared services a scan needs to materialize workers
pub struct Discovery {
    pub config: Arc<Config>,
    pub exchange: Arc<dyn ExchangeApi>,
    pub risk: Arc<RiskManager>,
    pub tracker: Arc<TradeTracker>,
    pub router: Arc<PriceRouter>,
    pub traders: Arc<TraderSet>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl Discovery {
    /// One scan pass: fetch, classify, spawn, retire.
    pub async fn scan_once(&self) -> anyhow::Result<()> {
        let quotes = self.exchange.list_open_markets().await?;
        let total = quotes.len();

        let mut liquid: Vec<MarketQuote> = quotes
            .into_iter()
            .filter(|q| is_liquid(q, &self.config))
            .collect();
        rank_candidates(&mut liquid);
        tracing::info!(total, liquid = liquid.len(), "market scan");

        let liquid_tickers: Vec<String> = liquid.iter().map(|q| q.ticker.clone()).collect();

        // retire flat workers whose market went illiquid; holders are pinned
        for ticker in self.traders.tickers() {
            if liquid_tickers.contains(&ticker) {
                continue;
            }
            if self.traders.retire_if_flat(&ticker) {
                self.router.detach(&ticker);
                tracing::info!(%ticker, "trader retired, market lost liquidity");
            } else if self.traders.contains(&ticker) {
                tracing::debug!(%ticker, "retirement deferred, position open");
            }
        }

        // spawn workers for fresh liquid markets, best candidates first
        for quote in &liquid {
            if self.traders.len() >= self.config.max_markets {
                break;
            }
            if self.traders.contains(&quote.ticker) {
                continue;
            }
            self.spawn_trader(&quote.ticker);
            tracing::info!(
                ticker = %quote.ticker,
                volume = quote.volume,
                spread = quote.spread().unwrap_or(0),
                "trader spawned for liquid market"
            );
        }

        Ok(())
    }

    fn spawn_trader(&self, ticker: &str) {
        let handle = MarketTrader::spawn(
            ticker,
            Arc::clone(&self.config),
            Arc::clone(&self.risk),
            Arc::clone(&self.tracker),
            Arc::clone(&self.exchange),
            self.shutdown_rx.clone(),
        );
        self.router.attach(ticker, handle.sample_sender());
        self.traders.insert(handle);
    }

    /// Scan on the configured interval until shutdown.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.market_scan_interval.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::warn!(error = %e, "market scan failed");
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
