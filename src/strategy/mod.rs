//! Signal generators.
//!
//! Each strategy is a pure function from a market set to trade signals,
//! evaluated "as of" a given instant so live and replay runs agree.
//! Strategies hold only their own configuration.

pub mod arbitrage;
pub mod marketmaking;
pub mod mispricing;
pub mod timedecay;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::types::{MarketSnapshot, Signal};

pub use arbitrage::ArbitrageStrategy;
pub use marketmaking::MarketMakingStrategy;
pub use mispricing::MispricingStrategy;
pub use timedecay::TimeDecayStrategy;

/// A signal generator.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    /// Produce signals for the given markets as of `as_of`.
    fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Result<Vec<Signal>>;
}

// ---------------------------------------------------------------------------
// Strategy set
// ---------------------------------------------------------------------------

/// Ordered collection of generators. Evaluation order is fixed at
/// construction so signal order is reproducible.
pub struct StrategySet {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategySet {
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        Self { strategies }
    }

    /// Arbitrage, time decay, mispricing, market making.
    pub fn from_config(cfg: &StrategyConfig) -> Self {
        Self::new(vec![
            Box::new(ArbitrageStrategy::new(cfg.arbitrage.clone())),
            Box::new(TimeDecayStrategy::new(cfg.timedecay.clone())),
            Box::new(MispricingStrategy::new(cfg.mispricing.clone())),
            Box::new(MarketMakingStrategy::new(cfg.marketmaking.clone())),
        ])
    }

    pub fn enabled_names(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .filter(|s| s.enabled())
            .map(|s| s.name())
            .collect()
    }

    /// Run every enabled generator and concatenate their signals. A
    /// failing generator is logged and contributes nothing.
    pub fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Vec<Signal> {
        let mut signals = Vec::new();
        for strategy in self.strategies.iter().filter(|s| s.enabled()) {
            match strategy.evaluate(markets, as_of) {
                Ok(found) => {
                    debug!(strategy = strategy.name(), signals = found.len(), "Strategy evaluated");
                    signals.extend(found);
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Strategy evaluation failed");
                }
            }
        }
        info!(markets = markets.len(), signals = signals.len(), "Signal generation complete");
        signals
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------
