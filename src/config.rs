//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `SIBYL_CONFIG_PATH`) and
//! deserializes into strongly-typed structs. Every section has defaults,
//! so a partial file is valid. Secrets are referenced by env-var name and
//! resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SIBYL_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub schedule: ScheduleConfig,
    pub risk: RiskConfig,
    pub strategy: StrategyConfig,
    pub collector: CollectorConfig,
    pub manifold: ManifoldConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub db_path: String,
    /// Log decisions without placing bets.
    pub dry_run: bool,
    pub log_json: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/sibyl.db".to_string(),
            dry_run: false,
            log_json: false,
        }
    }
}

/// Timer periods, in seconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub scan_interval_secs: u64,
    pub snapshot_interval_secs: u64,
    pub performance_interval_secs: u64,
    pub order_cleanup_interval_secs: u64,
    /// Unfilled limit orders older than this are cancelled.
    pub order_max_age_secs: u64,
    /// How long a cached snapshot stays fresh.
    pub cache_ttl_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,          // 5m
            snapshot_interval_secs: 900,      // 15m
            performance_interval_secs: 3600,  // 1h
            order_cleanup_interval_secs: 600, // 10m
            order_max_age_secs: 86_400,       // 1d
            cache_ttl_secs: 600,
        }
    }
}

impl ScheduleConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs.max(1))
    }

    pub fn performance_interval(&self) -> Duration {
        Duration::from_secs(self.performance_interval_secs.max(1))
    }

    pub fn order_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.order_cleanup_interval_secs.max(1))
    }
}

/// Risk engine parameters. Money-valued fractions are decimals so that
/// caps land on exact whole units.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: f64,
    /// Max single position as a fraction of total value.
    pub max_position_pct: Decimal,
    /// Max cumulative exposure to one market as a fraction of total value.
    /// Zero disables the per-market cap.
    pub max_market_exposure_pct: Decimal,
    pub max_total_exposure_pct: Decimal,
    /// Drawdown from peak that trips the circuit breaker.
    pub max_drawdown_pct: Decimal,
    pub min_bet_amount: Decimal,
    pub min_edge: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: 0.25,
            max_position_pct: dec!(0.05),
            max_market_exposure_pct: dec!(0.10),
            max_total_exposure_pct: dec!(0.50),
            max_drawdown_pct: dec!(0.20),
            min_bet_amount: dec!(1),
            min_edge: 0.05,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StrategyConfig {
    pub arbitrage: ArbitrageConfig,
    pub mispricing: MispricingConfig,
    pub timedecay: TimeDecayConfig,
    pub marketmaking: MarketMakingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArbitrageConfig {
    pub enabled: bool,
    pub min_liquidity: f64,
    pub min_prob_sum_deviation: f64,
    pub max_markets_per_cycle: usize,
    /// Skip markets closing further out than this. 0 = no horizon.
    pub max_close_days: i64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_liquidity: 50.0,
            min_prob_sum_deviation: 0.10,
            max_markets_per_cycle: 20,
            max_close_days: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MispricingConfig {
    pub enabled: bool,
    pub extreme_high: f64,
    pub extreme_low: f64,
    pub min_market_age_days: i64,
    pub min_volume: f64,
    /// Reserved for the mean-reversion sub-strategy.
    pub mean_reversion_threshold: f64,
}

impl Default for MispricingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            extreme_high: 0.95,
            extreme_low: 0.05,
            min_market_age_days: 7,
            min_volume: 1000.0,
            mean_reversion_threshold: 0.15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeDecayConfig {
    pub enabled: bool,
    pub min_time_elapsed_pct: f64,
    pub min_edge: f64,
    pub min_volume: f64,
}

impl Default for TimeDecayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_time_elapsed_pct: 0.5,
            min_edge: 0.05,
            min_volume: 500.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketMakingConfig {
    pub enabled: bool,
    pub base_spread: f64,
    pub min_liquidity: f64,
    pub min_volume_24h: f64,
}

impl Default for MarketMakingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_spread: 0.04,
            min_liquidity: 500.0,
            min_volume_24h: 100.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub max_markets_per_scan: u32,
    pub min_liquidity: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_markets_per_scan: 500,
            min_liquidity: 20.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ManifoldConfig {
    pub base_url: String,
    /// Name of the env var holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ManifoldConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.manifold.markets/v0".to_string(),
            api_key_env: "MANIFOLD_API_KEY".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to built-in defaults when the file
    /// does not exist.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Config path from the explicit argument, then `SIBYL_CONFIG_PATH`,
    /// then `config.toml`.
    pub fn resolve_path(explicit: Option<&str>) -> String {
        explicit
            .map(String::from)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn validate(&self) -> Result<()> {
        let r = &self.risk;
        if !(0.0..=1.0).contains(&r.kelly_fraction) {
            anyhow::bail!("risk.kelly_fraction must be within [0, 1], got {}", r.kelly_fraction);
        }
        for (name, v) in [
            ("max_position_pct", r.max_position_pct),
            ("max_market_exposure_pct", r.max_market_exposure_pct),
            ("max_total_exposure_pct", r.max_total_exposure_pct),
            ("max_drawdown_pct", r.max_drawdown_pct),
        ] {
            if v < Decimal::ZERO || v > Decimal::ONE {
                anyhow::bail!("risk.{name} must be within [0, 1], got {v}");
            }
        }
        if self.strategy.mispricing.extreme_low >= self.strategy.mispricing.extreme_high {
            anyhow::bail!("strategy.mispricing.extreme_low must be below extreme_high");
        }
        Ok(())
    }
}
