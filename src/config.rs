//! Configuration for the trading engine

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration
///
/// A single immutable record passed by handle to every component. Every
/// field has a default so an absent or partial config file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Kalshi API key identifier
    pub api_key: String,
    /// Path to the RSA private key used for request signing
    pub private_key_path: PathBuf,
    /// Use the demo exchange endpoints instead of production
    pub use_demo: bool,

    /// Minimum contract volume for a market to count as liquid (0 disables)
    pub min_volume: i64,
    /// Maximum yes bid-ask spread in cents for a market to count as liquid
    pub max_spread: i64,

    /// Momentum lookback window in seconds
    pub momentum_window_seconds: u64,
    /// Minimum YES mid move in cents to trigger an entry
    pub entry_threshold_cents: i64,
    /// Minimum gap shrink in percent to signal convergence
    pub convergence_threshold_pct: i64,

    /// Contracts per order
    pub order_size: u32,
    /// Maximum contracts held per market
    pub max_position_per_market: u32,
    /// Maximum total exposure across all markets, in cents
    pub max_total_exposure: i64,
    /// Stop-loss distance below entry, in cents
    pub stop_loss_cents: i64,
    /// Trailing-stop distance below the highest seen price, in cents
    pub trailing_stop_cents: i64,
    /// Exchange fee per contract per round-trip, in cents
    pub kalshi_fee_cents: i64,
    /// Daily realized-loss circuit breaker threshold, in cents
    pub max_daily_loss: i64,

    /// Maximum number of markets traded concurrently
    pub max_markets: usize,
    /// Minimum seconds between trades on the same market
    pub cooldown_seconds: u64,
    /// Seconds between market discovery scans
    pub market_scan_interval: u64,
    /// Seconds to wait for an entry order acknowledgement
    pub order_ack_timeout_seconds: u64,
    /// Seconds before an unfilled exit order is cancelled and re-priced
    pub order_timeout_seconds: u64,
    /// Seconds to wait for open positions to unwind on shutdown
    pub shutdown_grace_seconds: u64,

    /// Path of the JSONL trade log
    pub trade_log_path: PathBuf,
    /// Log level filter (overridden by RUST_LOG)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            private_key_path: PathBuf::from("private_key.pem"),
            use_demo: true,
            min_volume: 100,
            max_spread: 10,
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
            max_markets: 10,
            cooldown_seconds: 2,
            market_scan_interval: 60,
            order_ack_timeout_seconds: 5,
            order_timeout_seconds: 10,
            shutdown_grace_seconds: 30,
            trade_log_path: PathBuf::from("momentum_trades.jsonl"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.momentum_window_seconds == 0 {
            anyhow::bail!("momentum_window_seconds must be positive");
        }
        if self.order_size == 0 {
            anyhow::bail!("order_size must be positive");
        }
        if self.order_size > self.max_position_per_market {
            anyhow::bail!(
                "order_size {} exceeds max_position_per_market {}",
                self.order_size,
                self.max_position_per_market
            );
        }
        if self.max_spread <= 0 {
            anyhow::bail!("max_spread must be positive");
        }
        if self.max_total_exposure <= 0 {
            anyhow::bail!("max_total_exposure must be positive");
        }
        if self.stop_loss_cents < 0 || self.trailing_stop_cents < 0 {
            anyhow::bail!("stop distances must be non-negative");
        }
        Ok(())
    }

    /// REST API base URL for the selected environment
    pub fn rest_url(&self) -> &'static str {
        if self.use_demo {
            "https://demo-api.kalshi.co/trade-api/v2"
        } else {
            "https://trading-api.kalshi.co/trade-api/v2"
        }
    }

    /// WebSocket URL for the selected environment
    pub fn ws_url(&self) -> &'static str {
        if self.use_demo {
            "wss://demo-api.kalshi.co/trade-api/ws/v2"
        } else {
            "wss://trading-api.kalshi.co/trade-api/ws/v2"
        }
    }

    pub fn momentum_window(&self) -> Duration {
        Duration::from_secs(self.momentum_window_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn order_ack_timeout(&self) -> Duration {
        Duration::from_secs(self.order_ack_timeout_seconds)
    }

    pub fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.order_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
