use clap::Parser;
use kalshi_momentum::cli::{Cli, Commands};
use kalshi_momentum::config::Config;
use kalshi_momentum::engine::EngineError;

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_FEED_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("invalid config {}: {e}", cli.config);
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        }
    } else {
        Config::default()
    };

    let Commands::Start(args) = &cli.command;
    args.apply(&mut config);
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    if let Err(e) = kalshi_momentum::telemetry::init_logging(&config.log_level) {
        eprintln!("failed to initialize logging: {e}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    match args.execute(config).await {
        Ok(()) => {
            tracing::info!("clean shutdown");
        }
        Err(e @ EngineError::Config(_)) => {
            tracing::error!(error = %e, "startup failed");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
        Err(e @ EngineError::Feed(_)) => {
            tracing::error!(error = %e, "feed failure");
            std::process::exit(EXIT_FEED_ERROR);
        }
    }
}
