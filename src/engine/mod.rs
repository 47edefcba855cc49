//! Core engine: the decision pipeline and the cycles that drive it.

pub mod collector;
pub mod executor;
pub mod orchestrator;
pub mod performance;

use chrono::{DateTime, Utc};

use crate::risk::RiskManager;
use crate::strategy::StrategySet;
use crate::types::{MarketSnapshot, SizedSignal};

pub use collector::Collector;
pub use executor::{ExecutionError, Executor};
pub use orchestrator::Orchestrator;
pub use performance::PerformanceReport;

/// Generate signals from every enabled strategy and size them.
///
/// The live trading cycle and the replay driver both go through here, so
/// identical markets, `as_of` and risk state give identical decisions.
pub fn decide(
    strategies: &StrategySet,
    risk: &mut RiskManager,
    markets: &[MarketSnapshot],
    as_of: DateTime<Utc>,
) -> Vec<SizedSignal> {
    let signals = strategies.evaluate(markets, as_of);
    if signals.is_empty() {
        return Vec::new();
    }

    risk.size_signals(&signals)
}
