//! Ticker → trader price fan-out

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};

use super::MarketBook;
use crate::feed::{FeedCommand, FeedMessage};
use crate::market::Sample;

const SUBSCRIBE_DEBOUNCE: Duration = Duration::from_millis(200);

struct Route {
    book: MarketBook,
    tx: broadcast::Sender<Sample>,
}

#[derive(Default)]
struct PendingSubs {
    subscribe: Vec<String>,
    unsubscribe: Vec<String>,
}

/// Counters for degraded feed input
#[derive(Debug, Default)]
pub struct RouterCounters {
    pub out_of_order_dropped: AtomicU64,
    pub unroutable_dropped: AtomicU64,
}

/// Routes inbound book updates to the owning market worker
///
/// Owns the per-ticker projections; samples are handed to workers by value
/// over their bounded inboxes, and a full inbox never blocks the feed path.
/// Subscription changes are batched and flushed to the feed on a debounce
/// interval.
pub struct PriceRouter {
    routes: Mutex<HashMap<String, Route>>,
    pending: Mutex<PendingSubs>,
    pub counters: RouterCounters,
}

impl PriceRouter {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            pending: Mutex::new(PendingSubs::default()),
            counters: RouterCounters::default(),
        }
    }

    /// Register a worker's inbox for a ticker and queue the subscription.
    pub fn attach(&self, ticker: &str, tx: broadcast::Sender<Sample>) {
        let mut routes = self.routes.lock().expect("router lock poisoned");
        routes.insert(
            ticker.to_string(),
            Route {
                book: MarketBook::new(),
                tx,
            },
        );
        drop(routes);

        let mut pending = self.pending.lock().expect("router lock poisoned");
        pending.subscribe.push(ticker.to_string());
    }

    /// Remove a ticker's route and queue the unsubscription.
    pub fn detach(&self, ticker: &str) {
        let mut routes = self.routes.lock().expect("router lock poisoned");
        routes.remove(ticker);
        drop(routes);

        let mut pending = self.pending.lock().expect("router lock poisoned");
        pending.unsubscribe.push(ticker.to_string());
    }

    pub fn attached(&self, ticker: &str) -> bool {
        self.routes
            .lock()
            .expect("router lock poisoned")
            .contains_key(ticker)
    }

    /// Apply one feed message to the owning book and forward the derived
    /// sample. Updates for a ticker are applied in arrival order.
    pub fn handle_message(&self, message: FeedMessage) {
        match message {
            FeedMessage::Snapshot { ticker, yes, no } => {
                let mut routes = self.routes.lock().expect("router lock poisoned");
                let Some(route) = routes.get_mut(&ticker) else {
                    self.counters.unroutable_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                route.book.apply_snapshot(&yes, &no);
                if let Some(sample) = route.book.sample(Utc::now()) {
                    let _ = route.tx.send(sample);
                }
            }
            FeedMessage::Delta {
                ticker,
                side,
                price,
                delta_qty,
                ts,
            } => {
                let mut routes = self.routes.lock().expect("router lock poisoned");
                let Some(route) = routes.get_mut(&ticker) else {
                    self.counters.unroutable_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                if !route.book.apply_delta(side, price, delta_qty, ts) {
                    self.counters
                        .out_of_order_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    return;
                }
                if let Some(sample) = route.book.sample(ts) {
                    let _ = route.tx.send(sample);
                }
            }
            FeedMessage::Subscribed { tickers } => {
                tracing::debug!(count = tickers.len(), "subscription confirmed");
            }
            FeedMessage::Error { code, msg } => {
                tracing::warn!(code, %msg, "feed error");
            }
            FeedMessage::Connected => {
                tracing::info!("feed connected");
            }
            FeedMessage::Reconnecting { attempt } => {
                tracing::warn!(attempt, "feed reconnecting");
            }
            FeedMessage::Disconnected => {
                tracing::warn!("feed disconnected");
            }
        }
    }

    /// Drain queued subscription changes into feed commands. Called on the
    /// debounce cadence; a ticker attached and detached within one interval
    /// collapses to nothing.
    pub async fn flush_subscriptions(&self, cmd_tx: &mpsc::Sender<FeedCommand>) {
        let (subscribe, unsubscribe) = {
            let mut pending = self.pending.lock().expect("router lock poisoned");
            let raw_sub = std::mem::take(&mut pending.subscribe);
            let raw_unsub = std::mem::take(&mut pending.unsubscribe);
            let both: Vec<&String> = raw_sub
                .iter()
                .filter(|t| raw_unsub.contains(*t))
                .collect();

            let mut subscribe: Vec<String> = Vec::new();
            for t in &raw_sub {
                if !both.contains(&t) && !subscribe.contains(t) {
                    subscribe.push(t.clone());
                }
            }
            let mut unsubscribe: Vec<String> = Vec::new();
            for t in &raw_unsub {
                if !both.contains(&t) && !unsubscribe.contains(t) {
                    unsubscribe.push(t.clone());
                }
            }
            (subscribe, unsubscribe)
        };

        if !subscribe.is_empty() {
            let _ = cmd_tx.send(FeedCommand::Subscribe(subscribe)).await;
        }
        if !unsubscribe.is_empty() {
            let _ = cmd_tx.send(FeedCommand::Unsubscribe(unsubscribe)).await;
        }
    }

    /// Periodic flusher; runs until the command channel closes.
    pub async fn run_subscription_flusher(&self, cmd_tx: mpsc::Sender<FeedCommand>) {
        let mut interval = tokio::time::interval(SUBSCRIBE_DEBOUNCE);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if cmd_tx.is_closed() {
                return;
            }
            self.flush_subscriptions(&cmd_tx).await;
        }
    }
}

impl Default for PriceRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Side;
    use chrono::DateTime;

    fn ts(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn snapshot(ticker: &str) -> FeedMessage {
        FeedMessage::Snapshot {
            ticker: ticker.to_string(),
            yes: vec![(29, 100)],
            no: vec![(59, 75)],
        }
    }

    #[tokio::test]
    async fn routes_samples_to_attached_trader() {
        let router = PriceRouter::new();
        let (tx, mut rx) = broadcast::channel(16);
        router.attach("MKT-A", tx);

        router.handle_message(snapshot("MKT-A"));
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.yes_bid, Some(29));

        router.handle_message(FeedMessage::Delta {
            ticker: "MKT-A".into(),
            side: Side::Yes,
            price: 31,
            delta_qty: 40,
            ts: ts(1000),
        });
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.yes_bid, Some(31));
    }

    #[tokio::test]
    async fn unknown_ticker_is_counted_and_dropped() {
        let router = PriceRouter::new();
        router.handle_message(snapshot("MKT-UNKNOWN"));
        assert_eq!(router.counters.unroutable_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn out_of_order_delta_counted_no_sample_emitted() {
        let router = PriceRouter::new();
        let (tx, mut rx) = broadcast::channel(16);
        router.attach("MKT-A", tx);
        router.handle_message(snapshot("MKT-A"));
        let _ = rx.recv().await.unwrap();

        router.handle_message(FeedMessage::Delta {
            ticker: "MKT-A".into(),
            side: Side::Yes,
            price: 30,
            delta_qty: 10,
            ts: ts(3000),
        });
        let _ = rx.recv().await.unwrap();

        // t=2.9s after t=3.0s: dropped, consistent best-of-book retained
        router.handle_message(FeedMessage::Delta {
            ticker: "MKT-A".into(),
            side: Side::Yes,
            price: 45,
            delta_qty: 10,
            ts: ts(2900),
        });
        assert_eq!(
            router.counters.out_of_order_dropped.load(Ordering::Relaxed),
            1
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn detach_stops_routing() {
        let router = PriceRouter::new();
        let (tx, mut rx) = broadcast::channel(16);
        router.attach("MKT-A", tx);
        router.detach("MKT-A");
        assert!(!router.attached("MKT-A"));

        router.handle_message(snapshot("MKT-A"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn flush_batches_and_collapses_subscriptions() {
        let router = PriceRouter::new();
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);

        let (tx_a, _rx_a) = broadcast::channel(16);
        let (tx_b, _rx_b) = broadcast::channel(16);
        router.attach("MKT-A", tx_a);
        router.attach("MKT-B", tx_b);
        router.detach("MKT-B");

        router.flush_subscriptions(&cmd_tx).await;
        match cmd_rx.recv().await.unwrap() {
            FeedCommand::Subscribe(tickers) => assert_eq!(tickers, vec!["MKT-A".to_string()]),
            other => panic!("unexpected command: {other:?}"),
        }
        // MKT-B collapsed: attached and detached within one interval
        assert!(cmd_rx.try_recv().is_err());

        // nothing pending: no commands emitted
        router.flush_subscriptions(&cmd_tx).await;
        assert!(cmd_rx.try_recv().is_err());
    }
}
