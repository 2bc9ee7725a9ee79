//! Start command

use clap::Args;
use std::path::PathBuf;

use crate::config::Config;
use crate::engine::{Engine, EngineError};

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    /// Kalshi API key identifier
    #[arg(long)]
    pub api_key: Option<String>,

    /// Path to the RSA private key for request signing
    #[arg(long)]
    pub private_key_path: Option<PathBuf>,

    /// Trade against the demo exchange
    #[arg(long)]
    pub use_demo: Option<bool>,

    /// Minimum contract volume for a liquid market (0 disables)
    #[arg(long)]
    pub min_volume: Option<i64>,

    /// Maximum yes bid-ask spread in cents
    #[arg(long)]
    pub max_spread: Option<i64>,

    /// Momentum lookback window in seconds
    #[arg(long)]
    pub momentum_window_seconds: Option<u64>,

    /// Minimum YES move in cents to enter
    #[arg(long)]
    pub entry_threshold_cents: Option<i64>,

    /// Minimum gap shrink percent to signal convergence
    #[arg(long)]
    pub convergence_threshold_pct: Option<i64>,

    /// Contracts per order
    #[arg(long)]
    pub order_size: Option<u32>,

    /// Maximum contracts per market
    #[arg(long)]
    pub max_position_per_market: Option<u32>,

    /// Maximum total exposure in cents
    #[arg(long)]
    pub max_total_exposure: Option<i64>,

    /// Stop-loss distance in cents
    #[arg(long)]
    pub stop_loss_cents: Option<i64>,

    /// Trailing-stop distance in cents
    #[arg(long)]
    pub trailing_stop_cents: Option<i64>,

    /// Exchange fee per contract in cents
    #[arg(long)]
    pub kalshi_fee_cents: Option<i64>,

    /// Daily-loss circuit breaker threshold in cents
    #[arg(long)]
    pub max_daily_loss: Option<i64>,

    /// Maximum concurrent markets
    #[arg(long)]
    pub max_markets: Option<usize>,

    /// Seconds between trades on one market
    #[arg(long)]
    pub cooldown_seconds: Option<u64>,

    /// Seconds between discovery scans
    #[arg(long)]
    pub market_scan_interval: Option<u64>,
}

macro_rules! apply {
    ($self:ident, $config:ident, $($field:ident),+ $(,)?) => {
        $(if let Some(value) = $self.$field.clone() {
            $config.$field = value;
        })+
    };
}

impl StartArgs {
    /// Layer CLI overrides onto the loaded config.
    pub fn apply(&self, config: &mut Config) {
        apply!(
            self, config,
            api_key,
            private_key_path,
            use_demo,
            min_volume,
            max_spread,
            momentum_window_seconds,
            entry_threshold_cents,
            convergence_threshold_pct,
            order_size,
            max_position_per_market,
            max_total_exposure,
            stop_loss_cents,
            trailing_stop_cents,
            kalshi_fee_cents,
            max_daily_loss,
            max_markets,
            cooldown_seconds,
            market_scan_interval,
        );
    }

    pub async fn execute(&self, config: Config) -> Result<(), EngineError> {
        tracing::info!(
            use_demo = config.use_demo,
            max_markets = config.max_markets,
            order_size = config.order_size,
            max_total_exposure_cents = config.max_total_exposure,
            max_daily_loss_cents = config.max_daily_loss,
            "starting trading engine"
        );
        let (engine, feed_rx, feed_cmd_tx) = Engine::connect(config)?;
        engine.run(feed_rx, feed_cmd_tx).await
    }
}
