//! Mock market provider for integration testing.
//!
//! Deterministic, in-memory `MarketProvider`: serves a fixed market list,
//! accepts bets and cancellations, and can be told to fail. Like the real
//! venue, search results omit answers; only `get_market` carries them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use sibyl::platforms::{ApiError, BetOrder, BetReceipt, MarketProbs, MarketProvider, SearchQuery};
use sibyl::types::{AnswerState, MarketSnapshot, OutcomeKind, Portfolio};

/// A mock prediction-market venue.
///
/// Markets, portfolio and failure modes are controllable from test code;
/// every bet attempt is recorded, including rejected ones.
#[derive(Clone)]
pub struct MockProvider {
    markets: Arc<Mutex<Vec<MarketSnapshot>>>,
    portfolio: Arc<Mutex<Portfolio>>,
    bet_attempts: Arc<Mutex<Vec<BetOrder>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    /// If set, every operation fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
    /// If set, only bet placement fails.
    bet_failure: Arc<Mutex<Option<BetFailure>>>,
}

#[derive(Debug, Clone)]
enum BetFailure {
    Rejected(ApiError),
    Transport(String),
}

impl MockProvider {
    pub fn new(markets: Vec<MarketSnapshot>, portfolio: Portfolio) -> Self {
        Self {
            markets: Arc::new(Mutex::new(markets)),
            portfolio: Arc::new(Mutex::new(portfolio)),
            bet_attempts: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            force_error: Arc::new(Mutex::new(None)),
            bet_failure: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_markets(&self, markets: Vec<MarketSnapshot>) {
        *self.markets.lock().unwrap() = markets;
    }

    pub fn set_portfolio(&self, portfolio: Portfolio) {
        *self.portfolio.lock().unwrap() = portfolio;
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Reject every bet with an API response.
    pub fn reject_bets(&self, status: u16, body: &str) {
        *self.bet_failure.lock().unwrap() = Some(BetFailure::Rejected(ApiError::new(status, body)));
    }

    /// Fail every bet before any response arrives.
    pub fn fail_bets(&self, msg: &str) {
        *self.bet_failure.lock().unwrap() = Some(BetFailure::Transport(msg.to_string()));
    }

    pub fn clear_bet_failure(&self) {
        *self.bet_failure.lock().unwrap() = None;
    }

    pub fn bet_attempts(&self) -> Vec<BetOrder> {
        self.bet_attempts.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketProvider for MockProvider {
    async fn search_markets(&self, query: &SearchQuery) -> Result<Vec<MarketSnapshot>> {
        self.check()?;
        Ok(self
            .markets
            .lock()
            .unwrap()
            .iter()
            .filter(|m| query.contract_type.map_or(true, |k| m.outcome == k))
            .take(query.limit as usize)
            .map(|m| MarketSnapshot {
                answers: Vec::new(),
                ..m.clone()
            })
            .collect())
    }

    async fn get_market(&self, id: &str) -> Result<MarketSnapshot> {
        self.check()?;
        self.markets
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| anyhow!("market {id} not found"))
    }

    async fn get_market_probs(&self, ids: &[String]) -> Result<HashMap<String, MarketProbs>> {
        self.check()?;
        let markets = self.markets.lock().unwrap();
        Ok(markets
            .iter()
            .filter(|m| ids.contains(&m.id))
            .map(|m| {
                let probs = MarketProbs {
                    prob: m.is_binary().then_some(m.probability),
                    answer_probs: m.answers.iter().map(|a| (a.id.clone(), a.probability)).collect(),
                };
                (m.id.clone(), probs)
            })
            .collect())
    }

    async fn get_portfolio(&self) -> Result<Portfolio> {
        self.check()?;
        Ok(*self.portfolio.lock().unwrap())
    }

    async fn place_bet(&self, order: &BetOrder) -> Result<BetReceipt> {
        self.check()?;
        let n = {
            let mut attempts = self.bet_attempts.lock().unwrap();
            attempts.push(order.clone());
            attempts.len()
        };
        match self.bet_failure.lock().unwrap().clone() {
            Some(BetFailure::Rejected(api)) => return Err(anyhow::Error::new(api).context("Manifold bet failed")),
            Some(BetFailure::Transport(msg)) => {
                return Err(anyhow!("{msg}").context("Manifold bet request failed"))
            }
            None => {}
        }
        Ok(BetReceipt {
            bet_id: format!("mock-bet-{n}"),
            is_filled: order.limit_prob.is_none(),
            prob_after: None,
        })
    }

    async fn cancel_bet(&self, bet_id: &str) -> Result<()> {
        self.check()?;
        self.cancelled.lock().unwrap().push(bet_id.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Market builders
// ---------------------------------------------------------------------------

pub fn binary(id: &str, question: &str, prob: f64, now: DateTime<Utc>) -> MarketSnapshot {
    MarketSnapshot {
        id: id.to_string(),
        question: question.to_string(),
        outcome: OutcomeKind::Binary,
        probability: prob,
        answers: Vec::new(),
        volume: 5000.0,
        volume_24h: 500.0,
        total_liquidity: 1000.0,
        pool: BTreeMap::from([("YES".to_string(), 400.0), ("NO".to_string(), 600.0)]),
        created_time: now - Duration::days(60),
        close_time: now + Duration::days(60),
        is_resolved: false,
        resolution: None,
        creator_id: "creator".into(),
        mechanism: "cpmm-1".into(),
        url: format!("https://mock.example.com/{id}"),
    }
}

pub fn multi(id: &str, answers: &[(&str, f64)], now: DateTime<Utc>) -> MarketSnapshot {
    let mut m = binary(id, "Which one will it be?", 0.0, now);
    m.outcome = OutcomeKind::MultipleChoice;
    m.mechanism = "cpmm-multi-1".into();
    m.pool.clear();
    m.answers = answers
        .iter()
        .map(|(aid, p)| AnswerState {
            id: aid.to_string(),
            text: format!("Answer {aid}"),
            probability: *p,
            resolution: None,
        })
        .collect();
    m
}

/// Multiple-choice market whose answers sum to 1.30.
pub fn overpriced_multi(id: &str, now: DateTime<Utc>) -> MarketSnapshot {
    multi(id, &[("a", 0.50), ("b", 0.50), ("c", 0.30)], now)
}
