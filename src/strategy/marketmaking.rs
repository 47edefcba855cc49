//! Two-sided limit-order market making.
//!
//! For liquid, actively traded binary markets in the middle of the
//! probability range, rest a YES bid below and a NO bid above the current
//! price. Deeper markets get a tighter spread.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::Strategy;
use crate::config::MarketMakingConfig;
use crate::types::{MarketSnapshot, Side, Signal};

const MIN_PROB: f64 = 0.20;
const MAX_PROB: f64 = 0.80;
const MIN_DAYS_TO_CLOSE: i64 = 30;

pub struct MarketMakingStrategy {
    cfg: MarketMakingConfig,
}

impl MarketMakingStrategy {
    pub fn new(cfg: MarketMakingConfig) -> Self {
        Self { cfg }
    }

    /// Liquidity-tiered spread.
    fn spread_for(&self, liquidity: f64) -> f64 {
        if liquidity > 2000.0 {
            0.02
        } else if liquidity > 1000.0 {
            0.03
        } else {
            self.cfg.base_spread
        }
    }

    fn is_eligible(&self, m: &MarketSnapshot, as_of: DateTime<Utc>) -> bool {
        m.is_binary()
            && !m.is_resolved
            && m.total_liquidity >= self.cfg.min_liquidity
            && m.volume_24h >= self.cfg.min_volume_24h
            && (MIN_PROB..=MAX_PROB).contains(&m.probability)
            && m.time_to_close(as_of) >= Duration::days(MIN_DAYS_TO_CLOSE)
    }

    fn quote(&self, m: &MarketSnapshot) -> [Signal; 2] {
        let p = m.probability;
        let half = self.spread_for(m.total_liquidity) / 2.0;
        let reason = format!("spread {:.2} around {p:.2}", half * 2.0);

        let leg = |side: Side, confidence: f64, limit: f64| Signal {
            market_id: m.id.clone(),
            answer_id: None,
            side,
            confidence,
            market_prob: p,
            edge: half,
            strategy: self.name().to_string(),
            reason: reason.clone(),
            limit_prob: Some(limit),
        };

        [leg(Side::Yes, p, p - half), leg(Side::No, 1.0 - p, p + half)]
    }
}

impl Strategy for MarketMakingStrategy {
    fn name(&self) -> &'static str {
        "marketmaking"
    }

    fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Result<Vec<Signal>> {
        Ok(markets
            .iter()
            .filter(|m| self.is_eligible(m, as_of))
            .flat_map(|m| self.quote(m))
            .collect())
    }
}
