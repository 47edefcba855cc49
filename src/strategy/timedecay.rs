//! Deadline time decay.
//!
//! "Will X happen by <date>?" markets tend to hold their price as the
//! deadline approaches even though the remaining window keeps shrinking.
//! For sub-50% binary markets with an explicit deadline in the question,
//! we discount the market probability by the elapsed share of the
//! market's life and lean NO.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::RegexSet;
use std::sync::LazyLock;

use super::Strategy;
use crate::config::TimeDecayConfig;
use crate::types::{MarketSnapshot, Side, Signal};

/// Share of the market probability that decays away over a full lifetime.
const DECAY_RATE: f64 = 0.5;

const MONTHS: &str = "January|February|March|April|May|June|July|August|September|October|November|December";

// Deadline phrasings recognised in question text, all case-insensitive
static DEADLINE_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        format!(r"(?i)by ({MONTHS}) (\d{{4}})"),
        format!(r"(?i)before ({MONTHS}) \d{{1,2}}"),
        r"(?i)in (\d{4})".to_string(),
        r"(?i)by end of (\d{4})".to_string(),
        r"(?i)by Q[1-4] (\d{4})".to_string(),
    ])
    .expect("deadline patterns compile")
});

/// Whether the question names an explicit deadline.
pub fn has_deadline(question: &str) -> bool {
    DEADLINE_PATTERNS.is_match(question)
}

pub struct TimeDecayStrategy {
    cfg: TimeDecayConfig,
}

impl TimeDecayStrategy {
    pub fn new(cfg: TimeDecayConfig) -> Self {
        Self { cfg }
    }

    fn evaluate_market(&self, m: &MarketSnapshot, as_of: DateTime<Utc>) -> Option<Signal> {
        if !m.is_binary() || m.is_resolved || m.probability >= 0.5 {
            return None;
        }
        if m.volume <= self.cfg.min_volume || !has_deadline(&m.question) {
            return None;
        }

        let lifetime = (m.close_time - m.created_time).num_seconds() as f64;
        if lifetime <= 0.0 {
            return None;
        }
        let elapsed = (as_of - m.created_time).num_seconds() as f64 / lifetime;
        if elapsed <= self.cfg.min_time_elapsed_pct {
            return None;
        }
        let elapsed = elapsed.min(1.0);

        let p = m.probability;
        let estimated = p * (1.0 - elapsed * DECAY_RATE);
        let edge = p - estimated;
        if edge <= self.cfg.min_edge {
            return None;
        }

        Some(Signal {
            market_id: m.id.clone(),
            answer_id: None,
            side: Side::No,
            confidence: 1.0 - estimated,
            market_prob: p,
            edge,
            strategy: self.name().to_string(),
            reason: format!(
                "{:.0}% of time elapsed, market at {p:.2} vs estimated {estimated:.2}",
                elapsed * 100.0
            ),
            limit_prob: Some((p + estimated) / 2.0),
        })
    }
}

impl Strategy for TimeDecayStrategy {
    fn name(&self) -> &'static str {
        "timedecay"
    }

    fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    fn evaluate(&self, markets: &[MarketSnapshot], as_of: DateTime<Utc>) -> Result<Vec<Signal>> {
        Ok(markets
            .iter()
            .filter_map(|m| self.evaluate_market(m, as_of))
            .collect())
    }
}
