//! Market worker state machine

use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::Position;
use crate::config::Config;
use crate::exchange::{CancelStatus, ExchangeApi, OrderAction, OrderRequest, OrderStatus, Side};
use crate::market::{Cents, PriceHistory, Sample};
use crate::risk::{Reservation, RiskManager};
use crate::strategy::{self, SignalKind, StrategyParams};
use crate::tracker::{ExitReason, TradeTracker};

const TICK_INTERVAL: Duration = Duration::from_millis(200);
const ANALYSIS_INTERVAL_MS: i64 = 500;
/// A market with no fresh sample for this long is skipped for entries.
const STALE_AFTER_MS: i64 = 10_000;
const INBOX_CAPACITY: usize = 1024;
/// Minimum confidence for a reversal exit
const REVERSAL_CONFIDENCE: f64 = 0.5;

/// Externally visible worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraderPhase {
    Flat,
    Holding,
    Exiting,
    Retired,
}

/// Per-worker counters, readable while the worker runs
#[derive(Debug, Default)]
pub struct TraderStats {
    pub signals: AtomicU64,
    pub entries: AtomicU64,
    pub exits: AtomicU64,
    pub stop_losses: AtomicU64,
    pub trailing_stops: AtomicU64,
    pub reversals: AtomicU64,
    pub risk_rejects: AtomicU64,
    pub samples_dropped: AtomicU64,
}

/// Handle to a spawned worker
pub struct TraderHandle {
    pub ticker: String,
    sample_tx: broadcast::Sender<Sample>,
    phase_rx: watch::Receiver<TraderPhase>,
    retire: Arc<AtomicBool>,
    pub stats: Arc<TraderStats>,
    join: JoinHandle<()>,
}

impl TraderHandle {
    /// Sender half of the worker's inbox, for router attachment
    pub fn sample_sender(&self) -> broadcast::Sender<Sample> {
        self.sample_tx.clone()
    }

    pub fn phase(&self) -> TraderPhase {
        *self.phase_rx.borrow()
    }

    /// Ask the worker to stop once it is flat
    pub fn request_retire(&self) {
        self.retire.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}

enum State {
    Flat,
    Holding(Position),
    Exiting(ExitState),
}

struct ExitState {
    position: Position,
    reason: ExitReason,
    /// Contracts still to be sold
    remaining: u32,
    pnl_accum_cents: Cents,
    last_exit_price: Cents,
    order: Option<WorkingOrder>,
}

struct WorkingOrder {
    order_id: String,
    limit_price: Cents,
    submitted_at: DateTime<Utc>,
}

/// One market's trading loop
pub struct MarketTrader {
    ticker: String,
    config: Arc<Config>,
    params: StrategyParams,
    risk: Arc<RiskManager>,
    tracker: Arc<TradeTracker>,
    exchange: Arc<dyn ExchangeApi>,
    history: PriceHistory,
    state: State,
    phase_tx: watch::Sender<TraderPhase>,
    shutdown_rx: watch::Receiver<bool>,
    retire: Arc<AtomicBool>,
    stats: Arc<TraderStats>,
    last_analysis_at: Option<DateTime<Utc>>,
}

impl MarketTrader {
    /// Spawn a worker and return its handle. The handle's sample sender is
    /// what the price router fans out into; the inbox is bounded and drops
    /// the oldest samples when the worker lags.
    pub fn spawn(
        ticker: impl Into<String>,
        config: Arc<Config>,
        risk: Arc<RiskManager>,
        tracker: Arc<TradeTracker>,
        exchange: Arc<dyn ExchangeApi>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> TraderHandle {
        let ticker = ticker.into();
        let (sample_tx, sample_rx) = broadcast::channel(INBOX_CAPACITY);
        let (phase_tx, phase_rx) = watch::channel(TraderPhase::Flat);
        let retire = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(TraderStats::default());

        let trader = MarketTrader {
            ticker: ticker.clone(),
            params: StrategyParams::from_config(&config),
            history: PriceHistory::for_window(config.momentum_window_seconds),
            state: State::Flat,
            phase_tx,
            shutdown_rx,
            retire: Arc::clone(&retire),
            stats: Arc::clone(&stats),
            last_analysis_at: None,
            config,
            risk,
            tracker,
            exchange,
        };

        let join = tokio::spawn(trader.run(sample_rx));

        TraderHandle {
            ticker,
            sample_tx,
            phase_rx,
            retire,
            stats,
            join,
        }
    }

    async fn run(mut self, mut inbox: broadcast::Receiver<Sample>) {
        tracing::info!(ticker = %self.ticker, "trader started");
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = inbox.recv() => match received {
                    Ok(sample) => self.on_sample(sample),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.stats.samples_dropped.fetch_add(n, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    if self.on_tick(Utc::now()).await.is_break() {
                        break;
                    }
                }
            }
        }

        let _ = self.phase_tx.send(TraderPhase::Retired);
        tracing::info!(ticker = %self.ticker, "trader retired");
    }

    fn set_phase(&self, phase: TraderPhase) {
        let _ = self.phase_tx.send(phase);
    }

    fn on_sample(&mut self, sample: Sample) {
        if !self.history.insert(sample) {
            return;
        }
        // ratchet only while holding; the trailing stop is frozen during exit
        if let State::Holding(position) = &mut self.state {
            if let Some(mid) = sample.side_mid_cents(position.side) {
                position.ratchet(mid, self.config.trailing_stop_cents);
            }
        }
    }

    async fn on_tick(&mut self, now: DateTime<Utc>) -> ControlFlow<()> {
        let shutting_down = *self.shutdown_rx.borrow();

        match &self.state {
            State::Flat => {
                if shutting_down || self.retire.load(Ordering::Relaxed) {
                    return ControlFlow::Break(());
                }
                if self.analysis_due(now) {
                    self.try_enter(now, None).await;
                }
            }
            State::Holding(_) => {
                if shutting_down {
                    self.begin_exit(ExitReason::Shutdown, now).await;
                } else {
                    self.check_exits(now).await;
                }
            }
            State::Exiting(_) => {
                self.drive_exit(now).await;
            }
        }
        ControlFlow::Continue(())
    }

    fn analysis_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.last_analysis_at {
            Some(last) if (now - last).num_milliseconds() < ANALYSIS_INTERVAL_MS => false,
            _ => {
                self.last_analysis_at = Some(now);
                true
            }
        }
    }

    fn latest_is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.history
            .latest()
            .is_some_and(|s| (now - s.ts).num_milliseconds() <= STALE_AFTER_MS)
    }

    /// Evaluate the held position against stop-loss, trailing-stop, and
    /// reversal, in that order.
    async fn check_exits(&mut self, now: DateTime<Utc>) {
        let (held_side, stop_hit, trail_hit) = {
            let State::Holding(position) = &self.state else {
                return;
            };
            let Some(mid) = self
                .history
                .latest()
                .and_then(|s| s.side_mid_cents(position.side))
            else {
                return;
            };
            (
                position.side,
                position.stop_loss_hit(mid),
                position.trailing_stop_hit(mid),
            )
        };

        if stop_hit {
            self.begin_exit(ExitReason::StopLoss, now).await;
            return;
        }
        if trail_hit {
            self.begin_exit(ExitReason::TrailingStop, now).await;
            return;
        }

        if self.analysis_due(now) {
            let signal = strategy::analyze(&self.history, now, &self.params);
            if signal.kind != SignalKind::Neutral {
                self.stats.signals.fetch_add(1, Ordering::Relaxed);
            }
            let against = match held_side {
                Side::Yes => signal.kind == SignalKind::Bearish,
                Side::No => signal.kind == SignalKind::Bullish,
            };
            if against && signal.confidence >= REVERSAL_CONFIDENCE {
                tracing::info!(
                    ticker = %self.ticker,
                    confidence = signal.confidence,
                    "reversal signal against held side"
                );
                self.begin_exit(ExitReason::Reversal, now).await;
            }
        }
    }

    async fn begin_exit(&mut self, reason: ExitReason, now: DateTime<Utc>) {
        let State::Holding(position) = std::mem::replace(&mut self.state, State::Flat) else {
            return;
        };
        tracing::info!(
            ticker = %self.ticker,
            side = %position.side,
            entry = position.entry_price,
            ?reason,
            "exiting position"
        );
        self.state = State::Exiting(ExitState {
            remaining: position.size,
            pnl_accum_cents: 0,
            last_exit_price: position.entry_price,
            order: None,
            position,
            reason,
        });
        self.set_phase(TraderPhase::Exiting);
        self.drive_exit(now).await;
    }

    /// Exit price: one cent through the held side's mid, best-effort bid
    /// when the mid is gone.
    fn exit_price(&self, side: Side) -> Option<Cents> {
        let latest = self.history.latest()?;
        let reference = latest.side_mid_cents(side).or(match side {
            Side::Yes => latest.yes_bid,
            Side::No => latest.no_bid,
        })?;
        Some((reference - 1).clamp(1, 99))
    }

    /// One step of the exit loop: submit, wait out the order timeout, then
    /// cancel and re-price. Stop conditions do not re-trigger here.
    async fn drive_exit(&mut self, now: DateTime<Utc>) {
        let (side, remaining, working) = {
            let State::Exiting(exit) = &self.state else {
                return;
            };
            (
                exit.position.side,
                exit.remaining,
                exit.order
                    .as_ref()
                    .map(|o| (o.order_id.clone(), o.limit_price, o.submitted_at)),
            )
        };

        let mut closed = None;

        if let Some((order_id, limit_price, submitted_at)) = working {
            let timeout =
                chrono::Duration::from_std(self.config.order_timeout()).unwrap_or_default();
            if now - submitted_at < timeout {
                return;
            }
            match self.exchange.cancel_order(&order_id).await {
                Ok(CancelStatus::Ok) => {
                    if let State::Exiting(exit) = &mut self.state {
                        exit.order = None;
                    }
                    tracing::debug!(ticker = %self.ticker, %order_id, "stale exit order cancelled");
                }
                Ok(CancelStatus::NotFound) => {
                    // filled before the cancel landed; trust the exchange
                    closed = self.settle_exit_fill(limit_price, remaining, now);
                }
                Err(e) => {
                    tracing::warn!(ticker = %self.ticker, error = %e, "exit cancel failed");
                    return;
                }
            }
        }

        if closed.is_none() {
            closed = self.submit_exit_order(side, now).await;
        }

        if let Some((ExitReason::Reversal, exited_side)) = closed {
            if !*self.shutdown_rx.borrow() {
                self.try_enter(now, Some(exited_side.opposite())).await;
            }
        }
    }

    /// Submit a fresh exit order for the remaining size. Returns the close
    /// outcome when the fill completes the exit.
    async fn submit_exit_order(
        &mut self,
        side: Side,
        now: DateTime<Utc>,
    ) -> Option<(ExitReason, Side)> {
        let State::Exiting(exit) = &self.state else {
            return None;
        };
        if exit.order.is_some() {
            return None;
        }
        let remaining = exit.remaining;
        let Some(limit_price) = self.exit_price(side) else {
            return None;
        };

        let request = OrderRequest {
            ticker: self.ticker.clone(),
            side,
            action: OrderAction::Sell,
            limit_price,
            size: remaining,
        };
        let response = tokio::time::timeout(
            self.config.order_ack_timeout(),
            self.exchange.place_order(&request),
        )
        .await;

        match response {
            Ok(Ok(resp)) => match resp.status {
                OrderStatus::Filled => {
                    let price = if resp.avg_fill_price > 0 {
                        resp.avg_fill_price
                    } else {
                        limit_price
                    };
                    self.settle_exit_fill(price, remaining, now)
                }
                OrderStatus::PartiallyFilled => {
                    let closed = self.settle_exit_fill(resp.avg_fill_price, resp.filled_qty, now);
                    if closed.is_none() {
                        if let State::Exiting(exit) = &mut self.state {
                            exit.order = Some(WorkingOrder {
                                order_id: resp.order_id,
                                limit_price,
                                submitted_at: now,
                            });
                        }
                    }
                    closed
                }
                OrderStatus::Resting => {
                    if let State::Exiting(exit) = &mut self.state {
                        exit.order = Some(WorkingOrder {
                            order_id: resp.order_id,
                            limit_price,
                            submitted_at: now,
                        });
                    }
                    None
                }
                OrderStatus::Rejected => {
                    tracing::warn!(ticker = %self.ticker, "exit order rejected, retrying");
                    None
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(ticker = %self.ticker, error = %e, "exit submit failed, retrying");
                None
            }
            Err(_) => {
                tracing::warn!(ticker = %self.ticker, "exit submit unacknowledged, retrying");
                None
            }
        }
    }

    /// Account for `qty` contracts sold at `price`. Returns the exit reason
    /// and side when the position is fully closed.
    fn settle_exit_fill(
        &mut self,
        price: Cents,
        qty: u32,
        now: DateTime<Utc>,
    ) -> Option<(ExitReason, Side)> {
        let State::Exiting(exit) = &mut self.state else {
            return None;
        };
        if qty == 0 {
            return None;
        }
        let qty = qty.min(exit.remaining);
        let pnl = exit
            .position
            .realized_pnl_cents(price, qty, self.config.kalshi_fee_cents);
        self.risk
            .commit_exit(&self.ticker, pnl, qty, exit.position.entry_price, now);
        exit.pnl_accum_cents += pnl;
        exit.last_exit_price = price;
        exit.remaining -= qty;
        exit.order = None;

        if exit.remaining > 0 {
            return None;
        }

        let reason = exit.reason;
        let side = exit.position.side;
        let pnl_total = exit.pnl_accum_cents;
        let exit_price = exit.last_exit_price;
        if let Err(e) = self
            .tracker
            .record_exit(&self.ticker, exit_price, now, reason, pnl_total)
        {
            tracing::error!(ticker = %self.ticker, error = %e, "exit not recorded");
        }

        self.stats.exits.fetch_add(1, Ordering::Relaxed);
        match reason {
            ExitReason::StopLoss => {
                self.stats.stop_losses.fetch_add(1, Ordering::Relaxed);
            }
            ExitReason::TrailingStop => {
                self.stats.trailing_stops.fetch_add(1, Ordering::Relaxed);
            }
            ExitReason::Reversal => {
                self.stats.reversals.fetch_add(1, Ordering::Relaxed);
            }
            ExitReason::Shutdown => {}
        }
        tracing::info!(
            ticker = %self.ticker,
            ?reason,
            exit_price,
            pnl_cents = pnl_total,
            "position closed"
        );

        self.state = State::Flat;
        self.set_phase(TraderPhase::Flat);
        Some((reason, side))
    }

    /// Attempt a fresh entry. `forced_side` restricts the entry to one
    /// direction (reversal re-entry); otherwise the signal picks it.
    async fn try_enter(&mut self, now: DateTime<Utc>, forced_side: Option<Side>) {
        if !matches!(self.state, State::Flat) {
            return;
        }
        if !self.latest_is_fresh(now) {
            return;
        }

        let signal = strategy::analyze(&self.history, now, &self.params);
        let side = match signal.kind {
            SignalKind::Bullish => Side::Yes,
            SignalKind::Bearish => Side::No,
            SignalKind::Neutral => return,
        };
        self.stats.signals.fetch_add(1, Ordering::Relaxed);
        if forced_side.is_some_and(|forced| side != forced) {
            return;
        }

        let Some(mid) = self.history.latest().and_then(|s| s.side_mid_cents(side)) else {
            return;
        };
        let limit_price = (mid + 1).clamp(1, 99);
        let size = self.config.order_size;

        let reservation = match self
            .risk
            .check_and_reserve(&self.ticker, side, size, limit_price, now)
        {
            Ok(reservation) => reservation,
            Err(reason) => {
                self.stats.risk_rejects.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(ticker = %self.ticker, %reason, "entry refused by risk");
                return;
            }
        };

        tracing::info!(
            ticker = %self.ticker,
            %side,
            limit_price,
            size,
            gap_change = signal.gap_change_tenths,
            yes_change = signal.yes_change_tenths,
            confidence = signal.confidence,
            "entering position"
        );

        let request = OrderRequest {
            ticker: self.ticker.clone(),
            side,
            action: OrderAction::Buy,
            limit_price,
            size,
        };
        let response = tokio::time::timeout(
            self.config.order_ack_timeout(),
            self.exchange.place_order(&request),
        )
        .await;

        match response {
            Ok(Ok(resp)) => match resp.status {
                OrderStatus::Filled => {
                    let qty = if resp.filled_qty > 0 { resp.filled_qty } else { size };
                    let price = if resp.avg_fill_price > 0 {
                        resp.avg_fill_price
                    } else {
                        limit_price
                    };
                    self.open_position(&reservation, qty, price, resp.order_id, now);
                }
                OrderStatus::PartiallyFilled => {
                    // residual is cancelled; only the filled quantity counts
                    let _ = self.exchange.cancel_order(&resp.order_id).await;
                    if resp.filled_qty > 0 {
                        self.open_position(
                            &reservation,
                            resp.filled_qty,
                            resp.avg_fill_price,
                            resp.order_id,
                            now,
                        );
                    } else {
                        self.risk.release(&reservation);
                    }
                }
                OrderStatus::Resting => match self.exchange.cancel_order(&resp.order_id).await {
                    Ok(CancelStatus::NotFound) => {
                        // filled before the cancel landed
                        self.open_position(&reservation, size, limit_price, resp.order_id, now);
                    }
                    _ => self.risk.release(&reservation),
                },
                OrderStatus::Rejected => {
                    self.risk.release(&reservation);
                    tracing::debug!(ticker = %self.ticker, "entry order rejected");
                }
            },
            Ok(Err(e)) => {
                self.risk.release(&reservation);
                tracing::warn!(ticker = %self.ticker, error = %e, "entry submit failed");
            }
            Err(_) => {
                self.risk.release(&reservation);
                tracing::warn!(ticker = %self.ticker, "entry unacknowledged within timeout");
            }
        }
    }

    fn open_position(
        &mut self,
        reservation: &Reservation,
        filled_qty: u32,
        avg_fill_price: Cents,
        order_id: String,
        now: DateTime<Utc>,
    ) {
        let position = Position::open(
            reservation.side,
            filled_qty,
            avg_fill_price,
            now,
            order_id,
            self.config.stop_loss_cents,
            self.config.trailing_stop_cents,
            self.config.kalshi_fee_cents,
        );
        self.risk
            .commit_entry(reservation, filled_qty, avg_fill_price, now);
        if let Err(e) =
            self.tracker
                .record_entry(&self.ticker, position.side, filled_qty, avg_fill_price, now)
        {
            tracing::error!(ticker = %self.ticker, error = %e, "entry not recorded");
        }
        self.stats.entries.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            ticker = %self.ticker,
            side = %position.side,
            entry = avg_fill_price,
            size = filled_qty,
            stop = position.stop_loss_price,
            trail = position.trailing_stop_price,
            "position opened"
        );
        self.state = State::Holding(position);
        self.set_phase(TraderPhase::Holding);
    }
}
