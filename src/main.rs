//! SIBYL: prediction-market decision engine.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the database and either runs the live scan → decide → bet loop
//! with graceful shutdown, or replays recorded snapshots.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use sibyl::backtest::{parse_date_range, ReplayDriver};
use sibyl::config::{self, AppConfig};
use sibyl::engine::Orchestrator;
use sibyl::platforms::manifold::ManifoldClient;
use sibyl::platforms::MarketProvider;
use sibyl::storage::Store;
use sibyl::strategy::StrategySet;

const BANNER: &str = r#"
  ____ ___ ______   ___
 / ___|_ _| __ ) \ / / |
 \___ \| ||  _ \\ V /| |
  ___) | || |_) || | | |___
 |____/___|____/ |_| |_____|

  Prediction-market decision engine
  v0.1.0
"#;

/// Environment variable that switches logs to JSON.
const LOG_JSON_ENV: &str = "SIBYL_LOG_JSON";

#[derive(Parser, Debug)]
#[command(name = "sibyl", version, about = "Prediction-market decision engine")]
struct Cli {
    /// Config file (defaults to $SIBYL_CONFIG_PATH, then config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live trading loop (default)
    Run,

    /// Replay recorded snapshots through the strategies
    Backtest {
        /// First day, YYYY-MM-DD (default: one year ago)
        #[arg(long)]
        from: Option<String>,

        /// Last day inclusive, YYYY-MM-DD (default: today)
        #[arg(long)]
        to: Option<String>,

        /// Simulated starting balance
        #[arg(long, default_value = "2300")]
        balance: Decimal,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();

    let config_path = AppConfig::resolve_path(cli.config.as_deref());
    let cfg = AppConfig::load_or_default(&config_path)?;

    init_logging(&cfg);
    println!("{BANNER}");
    info!(config = %config_path, db = %cfg.general.db_path, "SIBYL starting up");

    let store = Store::open(&cfg.general.db_path).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_live(cfg, store).await,
        Commands::Backtest { from, to, balance } => {
            run_backtest(cfg, store, from.as_deref(), to.as_deref(), balance).await
        }
    }
}

async fn run_live(cfg: AppConfig, store: Store) -> Result<()> {
    let api_key = std::env::var(&cfg.manifold.api_key_env).ok();
    let client = ManifoldClient::new(&cfg.manifold, api_key)?;
    if !client.has_api_key() {
        warn!(
            env = %cfg.manifold.api_key_env,
            "No Manifold API key configured, portfolio and betting calls will fail"
        );
    }
    let provider: Arc<dyn MarketProvider> = Arc::new(client);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    Orchestrator::new(cfg, provider, store).run(shutdown).await?;
    info!("SIBYL shut down cleanly.");
    Ok(())
}

async fn run_backtest(
    cfg: AppConfig,
    store: Store,
    from: Option<&str>,
    to: Option<&str>,
    balance: Decimal,
) -> Result<()> {
    let (from, to) = parse_date_range(from, to, Utc::now().date_naive())?;
    let driver = ReplayDriver::new(store, StrategySet::from_config(&cfg.strategy), cfg.risk.clone());
    let report = driver.run(from, to, balance).await.context("Backtest failed")?;
    report.log();
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sibyl=info"));

    let json_logging = cfg.general.log_json || std::env::var(LOG_JSON_ENV).is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
