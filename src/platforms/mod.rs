//! Market-data provider integrations.
//!
//! Defines the `MarketProvider` trait, the capability surface the engine
//! needs from a prediction-market venue, and the Manifold implementation.

pub mod manifold;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{MarketSnapshot, OutcomeKind, Portfolio, Side};

/// Maximum ids per batch probability lookup.
pub const MAX_PROB_BATCH: usize = 100;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// Market state filter for searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketFilter {
    Open,
    Closed,
    Resolved,
    All,
}

impl MarketFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketFilter::Open => "open",
            MarketFilter::Closed => "closed",
            MarketFilter::Resolved => "resolved",
            MarketFilter::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Liquidity,
    Volume24h,
    Newest,
    MostPopular,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::Liquidity => "liquidity",
            SortKey::Volume24h => "24-hour-vol",
            SortKey::Newest => "newest",
            SortKey::MostPopular => "most-popular",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub term: String,
    pub filter: MarketFilter,
    /// `None` searches every contract type.
    pub contract_type: Option<OutcomeKind>,
    pub sort: SortKey,
    pub limit: u32,
}

impl SearchQuery {
    /// Open markets of one contract type, most liquid first.
    pub fn open(contract_type: Option<OutcomeKind>, limit: u32) -> Self {
        Self {
            term: String::new(),
            filter: MarketFilter::Open,
            contract_type,
            sort: SortKey::Liquidity,
            limit,
        }
    }
}

/// A non-2xx response from a venue API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("status {status}: {body}")]
pub struct ApiError {
    pub status: u16,
    pub body: String,
}

impl ApiError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Probabilities returned by a batch lookup for one market.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketProbs {
    pub prob: Option<f64>,
    pub answer_probs: HashMap<String, f64>,
}

/// A bet to place.
#[derive(Debug, Clone, PartialEq)]
pub struct BetOrder {
    pub market_id: String,
    pub answer_id: Option<String>,
    pub side: Side,
    pub amount: Decimal,
    /// Limit probability, already rounded to the venue's tick.
    pub limit_prob: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BetReceipt {
    pub bet_id: String,
    /// False while a limit order is resting unfilled.
    pub is_filled: bool,
    pub prob_after: Option<f64>,
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Abstraction over a prediction-market venue.
///
/// Read capabilities feed the scanner; `get_portfolio`, `place_bet` and
/// `cancel_bet` require credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketProvider: Send + Sync {
    /// Search markets by state, contract type and sort key.
    async fn search_markets(&self, query: &SearchQuery) -> Result<Vec<MarketSnapshot>>;

    /// Fetch one market with full detail (answers and their resolutions).
    async fn get_market(&self, id: &str) -> Result<MarketSnapshot>;

    /// Batch probability lookup. Callers pass at most `MAX_PROB_BATCH` ids.
    async fn get_market_probs(&self, ids: &[String]) -> Result<HashMap<String, MarketProbs>>;

    /// Cash balance and invested value of the authenticated account.
    async fn get_portfolio(&self) -> Result<Portfolio>;

    async fn place_bet(&self, order: &BetOrder) -> Result<BetReceipt>;

    async fn cancel_bet(&self, bet_id: &str) -> Result<()>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}
