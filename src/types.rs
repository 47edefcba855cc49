//! Shared types for the SIBYL engine.
//!
//! These types form the data model used across all modules. Market
//! snapshots are recreated every scan; signals live only inside one
//! cycle; the portfolio is refreshed from outside.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Answers at or beyond these bounds are treated as settled in practice.
pub const ACTIVE_PROB_FLOOR: f64 = 0.001;
pub const ACTIVE_PROB_CEIL: f64 = 0.999;

// ---------------------------------------------------------------------------
// Market snapshot
// ---------------------------------------------------------------------------

/// Contract type of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Binary,
    MultipleChoice,
    /// Numeric, poll, bounty and anything else we do not trade.
    #[serde(other)]
    Other,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Binary => "BINARY",
            OutcomeKind::MultipleChoice => "MULTIPLE_CHOICE",
            OutcomeKind::Other => "OTHER",
        }
    }

    /// Parse the provider/store tag. Unknown tags map to `Other`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "BINARY" => OutcomeKind::Binary,
            "MULTIPLE_CHOICE" => OutcomeKind::MultipleChoice,
            _ => OutcomeKind::Other,
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One answer of a multi-outcome market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerState {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub probability: f64,
    /// "YES" | "NO" | "CANCEL" | "MKT"; `None` while unresolved.
    #[serde(default)]
    pub resolution: Option<String>,
}

impl AnswerState {
    /// Unresolved and priced strictly inside (0.001, 0.999).
    pub fn is_active(&self) -> bool {
        self.resolution.as_deref().map_or(true, str::is_empty)
            && self.probability > ACTIVE_PROB_FLOOR
            && self.probability < ACTIVE_PROB_CEIL
    }
}

/// Immutable per-cycle view of one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: String,
    pub question: String,
    pub outcome: OutcomeKind,
    /// Scalar probability (binary markets).
    pub probability: f64,
    /// Per-answer state (multi-outcome markets), in provider order.
    pub answers: Vec<AnswerState>,
    pub volume: f64,
    pub volume_24h: f64,
    pub total_liquidity: f64,
    /// Outcome pool balances keyed by outcome ("YES", "NO").
    pub pool: BTreeMap<String, f64>,
    pub created_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolution: Option<String>,
    pub creator_id: String,
    pub mechanism: String,
    pub url: String,
}

impl fmt::Display for MarketSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (p={:.0}% | liq: M{:.0} | vol24h: M{:.0})",
            self.outcome,
            self.question,
            self.probability * 100.0,
            self.total_liquidity,
            self.volume_24h,
        )
    }
}

impl MarketSnapshot {
    pub fn is_binary(&self) -> bool {
        self.outcome == OutcomeKind::Binary
    }

    pub fn is_multiple_choice(&self) -> bool {
        self.outcome == OutcomeKind::MultipleChoice
    }

    pub fn pool_yes(&self) -> Option<f64> {
        self.pool.get("YES").copied()
    }

    pub fn pool_no(&self) -> Option<f64> {
        self.pool.get("NO").copied()
    }

    /// Answers that still trade.
    pub fn active_answers(&self) -> impl Iterator<Item = &AnswerState> {
        self.answers.iter().filter(|a| a.is_active())
    }

    /// Market age at `as_of`.
    pub fn age(&self, as_of: DateTime<Utc>) -> Duration {
        as_of - self.created_time
    }

    /// Time left until close at `as_of` (negative once closed).
    pub fn time_to_close(&self, as_of: DateTime<Utc>) -> Duration {
        self.close_time - as_of
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Bet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "YES",
            Side::No => "NO",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// A generator's trade idea. Lives only inside one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub market_id: String,
    /// Set for multi-outcome markets only.
    pub answer_id: Option<String>,
    pub side: Side,
    /// Estimated probability that `side` resolves true.
    pub confidence: f64,
    /// Market probability observed when the signal was produced.
    pub market_prob: f64,
    pub edge: f64,
    pub strategy: String,
    pub reason: String,
    /// Target probability when the signal should be placed as a limit order.
    pub limit_prob: Option<f64>,
}

impl Signal {
    pub fn is_limit_order(&self) -> bool {
        self.limit_prob.is_some()
    }
}

/// A signal approved by the risk engine with a whole-unit amount.
#[derive(Debug, Clone, PartialEq)]
pub struct SizedSignal {
    pub signal: Signal,
    pub amount: Decimal,
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// Cash, invested value and their total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portfolio {
    pub balance: Decimal,
    pub invested: Decimal,
    pub total_value: Decimal,
}

impl Portfolio {
    pub fn new(balance: Decimal, invested: Decimal) -> Self {
        Self {
            balance,
            invested,
            total_value: balance + invested,
        }
    }

    /// Pure cash portfolio, used for replay.
    pub fn cash(balance: Decimal) -> Self {
        Self::new(balance, Decimal::ZERO)
    }
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::cash(Decimal::ZERO)
    }
}

impl fmt::Display for Portfolio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "balance M{:.0} | invested M{:.0} | total M{:.0}",
            self.balance, self.invested, self.total_value
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
