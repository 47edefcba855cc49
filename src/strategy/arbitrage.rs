//! Multi-outcome probability-sum arbitrage.
//!
//! The active answers of a multiple-choice market should sum to 1. When
//! they sum well above 1, every answer is overpriced relative to its
//! normalised fair value and we lean NO; well below 1, we lean YES.
//! Orders are limit orders placed halfway to fair value.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use super::Strategy;
use crate::config::ArbitrageConfig;
use crate::types::{MarketSnapshot, Side, Signal};

/// Per-answer edge floor; smaller mispricings are not worth the spread.
const MIN_ANSWER_EDGE: f64 = 0.03;

pub struct ArbitrageStrategy {
    cfg: ArbitrageConfig,
}

impl ArbitrageStrategy {
    pub fn new(cfg: ArbitrageConfig) -> Self {
        Self { cfg }
    }

    fn is_eligible(&self, m: &MarketSnapshot, horizon: Option<DateTime<Utc>>) -> bool {
        if !m.is_multiple_choice() || m.is_resolved {
            return false;
        }
        if m.total_liquidity < self.cfg.min_liquidity {
            return false;
        }
        if horizon.is_some_and(|h| m.close_time > h) {
            return false;
        }
        m.active_answers().count() >= 2
    }

    fn evaluate_market(&self, m: &MarketSnapshot) -> Vec<Signal> {
        let total: f64 = m.active_answers().map(|a| a.probability).sum();
        let deviation = total - 1.0;
        if deviation.abs() < self.cfg.min_prob_sum_deviation {
            return Vec::new();
        }
        let overpriced = total > 1.0;

        m.active_answers()
            .filter_map(|a| {
                let p = a.probability;
                let fair = p / total;
                let (side, edge, confidence) = if overpriced {
                    (Side::No, p - fair, 1.0 - fair)
                } else {
                    (Side::Yes, fair - p, fair)
                };
                if edge < MIN_ANSWER_EDGE {
                    return None;
                }
                Some(Signal {
                    market_id: m.id.clone(),
                    answer_id: Some(a.id.clone()),
                    side,
                    confidence,
                    market_prob: p,
                    edge,
                    strategy: self.name().to_string(),
                    reason: format!(
                        "probs sum to {total:.2}, answer '{}' at {p:.2} vs fair {fair:.2}",
                        a.text
                    ),
                    limit_prob: Some((p + fair) / 2.0),
                })
            })
            .collect()
    }
}

impl Strategy for ArbitrageStrategy {
    fn name(&self) -> &'static str {
        "arbitrage"
    }

    fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Result<Vec<Signal>> {
        let horizon = (self.cfg.max_close_days > 0)
            .then(|| as_of + Duration::days(self.cfg.max_close_days));

        let mut signals = Vec::new();
        let mut evaluated = 0usize;
        for m in markets.iter().filter(|m| self.is_eligible(m, horizon)) {
            // Hard stop on the first N eligible markets in input order
            if evaluated >= self.cfg.max_markets_per_cycle {
                break;
            }
            evaluated += 1;
            signals.extend(self.evaluate_market(m));
        }
        Ok(signals)
    }
}
