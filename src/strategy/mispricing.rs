//! Extreme-probability confirmation.
//!
//! Mature, well-traded binary markets priced at an extreme with plenty of
//! time left usually stay there. We back the extreme at a fixed
//! confidence with a market order.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::Strategy;
use crate::config::MispricingConfig;
use crate::types::{MarketSnapshot, Side, Signal};

const EXTREME_CONFIDENCE: f64 = 0.97;
const MIN_DAYS_TO_CLOSE: i64 = 14;

pub struct MispricingStrategy {
    cfg: MispricingConfig,
}

impl MispricingStrategy {
    pub fn new(cfg: MispricingConfig) -> Self {
        Self { cfg }
    }

    // TODO: mean reversion after sudden moves needs the previous snapshot
    // per market from the store; `mean_reversion_threshold` is reserved for it.
    fn extreme_confirmation(&self, m: &MarketSnapshot, as_of: DateTime<Utc>) -> Option<Signal> {
        let p = m.probability;
        let (side, edge) = if p > self.cfg.extreme_high {
            (Side::Yes, EXTREME_CONFIDENCE - p)
        } else if p < self.cfg.extreme_low {
            (Side::No, p - (1.0 - EXTREME_CONFIDENCE))
        } else {
            return None;
        };

        if m.age(as_of) < Duration::days(self.cfg.min_market_age_days) {
            return None;
        }
        if m.volume < self.cfg.min_volume {
            return None;
        }
        if m.time_to_close(as_of) < Duration::days(MIN_DAYS_TO_CLOSE) {
            return None;
        }
        if edge <= 0.0 {
            return None;
        }

        Some(Signal {
            market_id: m.id.clone(),
            answer_id: None,
            side,
            confidence: EXTREME_CONFIDENCE,
            market_prob: p,
            edge,
            strategy: self.name().to_string(),
            reason: format!(
                "extreme {side} at {p:.3}, {} days old, {:.0} volume",
                m.age(as_of).num_days(),
                m.volume
            ),
            limit_prob: None,
        })
    }
}

impl Strategy for MispricingStrategy {
    fn name(&self) -> &'static str {
        "mispricing"
    }

    fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Result<Vec<Signal>> {
        Ok(markets
            .iter()
            .filter(|m| m.is_binary() && !m.is_resolved)
            .filter_map(|m| self.extreme_confirmation(m, as_of))
            .collect())
    }
}
