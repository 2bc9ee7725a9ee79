//! Shared risk state behind a single lock

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{Reservation, RiskError};
use crate::config::Config;
use crate::exchange::Side;
use crate::market::Cents;

#[derive(Debug, Default)]
struct RiskState {
    total_exposure_cents: Cents,
    pending_exposure_cents: Cents,
    realized_pnl_today_cents: Cents,
    open_size: HashMap<String, u32>,
    last_trade_at: HashMap<String, DateTime<Utc>>,
    pending: HashMap<Uuid, Cents>,
    circuit_tripped: bool,
    shutting_down: bool,
}

/// Read-only view of the global risk state
#[derive(Debug, Clone, Copy)]
pub struct RiskSummary {
    pub open_positions: usize,
    pub total_exposure_cents: Cents,
    pub pending_exposure_cents: Cents,
    pub realized_pnl_today_cents: Cents,
    pub circuit_tripped: bool,
}

/// Thread-safe gatekeeper for entries and exposure accounting
///
/// The lock is held only for in-memory bookkeeping, never across I/O.
pub struct RiskManager {
    state: Mutex<RiskState>,
    max_position_per_market: u32,
    max_total_exposure_cents: Cents,
    max_daily_loss_cents: Cents,
    cooldown: chrono::Duration,
    rejects: AtomicU64,
}

impl RiskManager {
    pub fn new(config: &Config) -> Self {
        Self {
            state: Mutex::new(RiskState::default()),
            max_position_per_market: config.max_position_per_market,
            max_total_exposure_cents: config.max_total_exposure,
            max_daily_loss_cents: config.max_daily_loss,
            cooldown: chrono::Duration::milliseconds(config.cooldown_seconds as i64 * 1000),
            rejects: AtomicU64::new(0),
        }
    }

    /// Atomically verify every entry precondition and reserve the exposure.
    ///
    /// On success the caller must eventually `commit_entry` or `release`.
    pub fn check_and_reserve(
        &self,
        ticker: &str,
        side: Side,
        size: u32,
        price: Cents,
        now: DateTime<Utc>,
    ) -> Result<Reservation, RiskError> {
        let mut state = self.state.lock().expect("risk lock poisoned");

        let result = Self::admit(
            &state,
            ticker,
            size,
            price,
            now,
            self.max_position_per_market,
            self.max_total_exposure_cents,
            self.cooldown,
        );
        if let Err(reason) = result {
            drop(state);
            self.rejects.fetch_add(1, Ordering::Relaxed);
            return Err(reason);
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            side,
            size,
            price,
        };
        state.pending_exposure_cents += reservation.amount();
        state.pending.insert(reservation.id, reservation.amount());
        Ok(reservation)
    }

    #[allow(clippy::too_many_arguments)]
    fn admit(
        state: &RiskState,
        ticker: &str,
        size: u32,
        price: Cents,
        now: DateTime<Utc>,
        max_position: u32,
        max_exposure: Cents,
        cooldown: chrono::Duration,
    ) -> Result<(), RiskError> {
        if state.circuit_tripped {
            return Err(RiskError::CircuitTripped);
        }
        if state.shutting_down {
            return Err(RiskError::ShuttingDown);
        }

        let held = state.open_size.get(ticker).copied().unwrap_or(0);
        if held + size > max_position {
            return Err(RiskError::PositionLimit {
                held,
                requested: size,
                limit: max_position,
            });
        }

        let committed = state.total_exposure_cents + state.pending_exposure_cents;
        let requested = size as Cents * price;
        if committed + requested > max_exposure {
            return Err(RiskError::ExposureCap {
                committed,
                requested,
                cap: max_exposure,
            });
        }

        if let Some(last) = state.last_trade_at.get(ticker) {
            let elapsed = now - *last;
            if elapsed < cooldown {
                return Err(RiskError::Cooldown {
                    remaining_ms: (cooldown - elapsed).num_milliseconds(),
                });
            }
        }

        Ok(())
    }

    /// Finalize a filled entry. `filled_size` and `entry_price` reflect the
    /// exchange-reported fill, which may differ from the reservation on a
    /// partial fill.
    pub fn commit_entry(
        &self,
        reservation: &Reservation,
        filled_size: u32,
        entry_price: Cents,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().expect("risk lock poisoned");
        if let Some(amount) = state.pending.remove(&reservation.id) {
            state.pending_exposure_cents -= amount;
        }
        state.total_exposure_cents += filled_size as Cents * entry_price;
        *state.open_size.entry(reservation.ticker.clone()).or_insert(0) += filled_size;
        state.last_trade_at.insert(reservation.ticker.clone(), now);
    }

    /// Undo a reservation after a rejected or unacknowledged order.
    /// Idempotent by reservation id.
    pub fn release(&self, reservation: &Reservation) {
        let mut state = self.state.lock().expect("risk lock poisoned");
        if let Some(amount) = state.pending.remove(&reservation.id) {
            state.pending_exposure_cents -= amount;
        }
    }

    /// Record a (possibly partial) exit. Exits are always admitted, even
    /// with the circuit tripped or during shutdown.
    pub fn commit_exit(
        &self,
        ticker: &str,
        realized_pnl_cents: Cents,
        size: u32,
        entry_price: Cents,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().expect("risk lock poisoned");
        state.total_exposure_cents -= size as Cents * entry_price;
        match state.open_size.get_mut(ticker) {
            Some(held) if *held > size => *held -= size,
            Some(_) => {
                state.open_size.remove(ticker);
            }
            None => {}
        }
        state.realized_pnl_today_cents += realized_pnl_cents;
        state.last_trade_at.insert(ticker.to_string(), now);

        if !state.circuit_tripped
            && state.realized_pnl_today_cents <= -self.max_daily_loss_cents
        {
            state.circuit_tripped = true;
            tracing::warn!(
                realized_pnl_cents = state.realized_pnl_today_cents,
                max_daily_loss_cents = self.max_daily_loss_cents,
                "circuit breaker tripped, no new entries until reset"
            );
        }
    }

    pub fn is_circuit_tripped(&self) -> bool {
        self.state.lock().expect("risk lock poisoned").circuit_tripped
    }

    /// Refuse all new reservations; exits keep working.
    pub fn set_shutting_down(&self) {
        self.state.lock().expect("risk lock poisoned").shutting_down = true;
    }

    /// Operator reset: clears daily P&L and the circuit flag.
    pub fn reset_daily(&self) {
        let mut state = self.state.lock().expect("risk lock poisoned");
        state.realized_pnl_today_cents = 0;
        state.circuit_tripped = false;
        tracing::info!("daily risk counters reset");
    }

    pub fn rejects(&self) -> u64 {
        self.rejects.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> RiskSummary {
        let state = self.state.lock().expect("risk lock poisoned");
        RiskSummary {
            open_positions: state.open_size.len(),
            total_exposure_cents: state.total_exposure_cents,
            pending_exposure_cents: state.pending_exposure_cents,
            realized_pnl_today_cents: state.realized_pnl_today_cents,
            circuit_tripped: state.circuit_tripped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RiskManager {
        let config = Config {
            max_position_per_market: 50,
            max_total_exposure: 500,
            max_daily_loss: 50,
            cooldown_seconds: 2,
            ..Default::default()
        };
        RiskManager::new(&config)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn reserve_commit_tracks_exposure() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        assert_eq!(risk.summary().pending_exposure_cents, 250);

        risk.commit_entry(&r, 5, 50, ts(0));
        let summary = risk.summary();
        assert_eq!(summary.pending_exposure_cents, 0);
        assert_eq!(summary.total_exposure_cents, 250);
        assert_eq!(summary.open_positions, 1);
    }

    #[test]
    fn exposure_at_exactly_cap_is_admitted() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r, 5, 50, ts(0));

        // 250 + 250 == 500 cap: admitted
        let r2 = risk
            .check_and_reserve("MKT-B", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r2, 5, 50, ts(0));

        // one cent over: rejected
        let err = risk
            .check_and_reserve("MKT-C", Side::Yes, 1, 1, ts(10))
            .unwrap_err();
        assert!(matches!(err, RiskError::ExposureCap { .. }));
        assert_eq!(risk.rejects(), 1);
    }

    #[test]
    fn concurrent_reservations_cannot_both_exceed_cap() {
        // two reservations of 250 fit the 500 cap; a third is rejected even
        // before either commits
        let risk = manager();
        let _r1 = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        let _r2 = risk
            .check_and_reserve("MKT-B", Side::Yes, 5, 50, ts(0))
            .unwrap();
        let err = risk
            .check_and_reserve("MKT-C", Side::Yes, 5, 50, ts(0))
            .unwrap_err();
        assert!(matches!(err, RiskError::ExposureCap { .. }));
    }

    #[test]
    fn release_returns_reserved_exposure() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.release(&r);
        // releasing twice is harmless
        risk.release(&r);
        assert_eq!(risk.summary().pending_exposure_cents, 0);

        // full cap is available again
        assert!(risk
            .check_and_reserve("MKT-B", Side::Yes, 10, 50, ts(0))
            .is_ok());
    }

    #[test]
    fn partial_fill_commits_only_filled_exposure() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r, 2, 48, ts(0));
        let summary = risk.summary();
        assert_eq!(summary.total_exposure_cents, 96);
        assert_eq!(summary.pending_exposure_cents, 0);
    }

    #[test]
    fn position_limit_counts_held_contracts() {
        let config = Config {
            max_position_per_market: 8,
            max_total_exposure: 100_000,
            cooldown_seconds: 0,
            ..Default::default()
        };
        let risk = RiskManager::new(&config);
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r, 5, 50, ts(0));

        let err = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(10))
            .unwrap_err();
        assert!(matches!(err, RiskError::PositionLimit { held: 5, .. }));

        // a different market is unaffected
        assert!(risk
            .check_and_reserve("MKT-B", Side::Yes, 5, 50, ts(10))
            .is_ok());
    }

    #[test]
    fn cooldown_blocks_rapid_reentry() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 1, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r, 1, 50, ts(0));

        let err = risk
            .check_and_reserve("MKT-A", Side::Yes, 1, 50, ts(1))
            .unwrap_err();
        assert!(matches!(err, RiskError::Cooldown { .. }));

        assert!(risk
            .check_and_reserve("MKT-A", Side::Yes, 1, 50, ts(2))
            .is_ok());
    }

    #[test]
    fn circuit_trips_on_daily_loss_and_blocks_entries() {
        let risk = manager();
        // three losing round-trips of -20c each against a 50c limit
        for (i, ticker) in ["A", "B", "C"].iter().enumerate() {
            let now = ts(i as i64 * 10);
            let r = risk.check_and_reserve(ticker, Side::Yes, 1, 40, now).unwrap();
            risk.commit_entry(&r, 1, 40, now);
            risk.commit_exit(ticker, -20, 1, 40, now);
            if i < 2 {
                assert!(!risk.is_circuit_tripped());
            }
        }
        assert!(risk.is_circuit_tripped());

        let err = risk
            .check_and_reserve("D", Side::Yes, 1, 40, ts(100))
            .unwrap_err();
        assert_eq!(err, RiskError::CircuitTripped);

        // exits still pass through
        risk.commit_exit("A", -5, 1, 40, ts(100));

        risk.reset_daily();
        assert!(!risk.is_circuit_tripped());
        assert!(risk
            .check_and_reserve("D", Side::Yes, 1, 40, ts(100))
            .is_ok());
    }

    #[test]
    fn shutdown_refuses_new_entries() {
        let risk = manager();
        risk.set_shutting_down();
        let err = risk
            .check_and_reserve("MKT-A", Side::Yes, 1, 50, ts(0))
            .unwrap_err();
        assert_eq!(err, RiskError::ShuttingDown);
    }

    #[test]
    fn exit_reduces_exposure_and_open_size() {
        let risk = manager();
        let r = risk
            .check_and_reserve("MKT-A", Side::Yes, 5, 50, ts(0))
            .unwrap();
        risk.commit_entry(&r, 5, 50, ts(0));
        risk.commit_exit("MKT-A", 25, 5, 50, ts(5));

        let summary = risk.summary();
        assert_eq!(summary.total_exposure_cents, 0);
        assert_eq!(summary.open_positions, 0);
        assert_eq!(summary.realized_pnl_today_cents, 25);
    }
}
