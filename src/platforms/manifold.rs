//! Manifold Markets integration.
//!
//! API docs: https://docs.manifold.markets/api
//! Base URL: https://api.manifold.markets/v0/
//! Auth: Not required for reads; `Authorization: Key {key}` for writes
//! and account endpoints.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::{Client, RequestBuilder};
use rust_decimal::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use super::{ApiError, BetOrder, BetReceipt, MarketProbs, MarketProvider, SearchQuery};
use crate::config::ManifoldConfig;
use crate::types::{AnswerState, MarketSnapshot, OutcomeKind, Portfolio};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const PLATFORM_NAME: &str = "manifold";

/// Markets without a close time are treated as closing this far out.
const NO_CLOSE_HORIZON_DAYS: i64 = 36_500;

// ---------------------------------------------------------------------------
// API response types (Manifold JSON → Rust)
// ---------------------------------------------------------------------------

/// Manifold market: `LiteMarket` from `/search-markets`, `FullMarket`
/// (with `answers`) from `/market/{id}`. Only the fields we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldMarket {
    id: String,
    question: String,
    #[serde(default)]
    url: String,
    /// "BINARY", "MULTIPLE_CHOICE", etc.
    outcome_type: String,
    /// "cpmm-1", "cpmm-multi-1", ...
    #[serde(default)]
    mechanism: String,
    #[serde(default)]
    probability: Option<f64>,
    #[serde(default)]
    pool: Option<HashMap<String, f64>>,
    #[serde(default)]
    total_liquidity: Option<f64>,
    #[serde(default)]
    volume: f64,
    #[serde(default)]
    volume24_hours: f64,
    #[serde(default)]
    is_resolved: bool,
    #[serde(default)]
    resolution: Option<String>,
    /// ms since epoch. May be absent.
    #[serde(default)]
    close_time: Option<i64>,
    #[serde(default)]
    created_time: i64,
    #[serde(default)]
    creator_id: String,
    #[serde(default)]
    answers: Option<Vec<ManifoldAnswer>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldAnswer {
    id: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    probability: f64,
    #[serde(default)]
    resolution: Option<String>,
}

/// Entry of the `/market-probs` response map.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldProbs {
    #[serde(default)]
    prob: Option<f64>,
    #[serde(default)]
    answer_probs: Option<HashMap<String, f64>>,
}

/// Response from `/bet` POST.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldBetResponse {
    #[serde(default)]
    bet_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_filled")]
    is_filled: bool,
    #[serde(default)]
    prob_after: Option<f64>,
}

fn default_filled() -> bool {
    true
}

/// Response from `/me` GET.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldUser {
    id: String,
    #[serde(default)]
    balance: f64,
}

/// Response from `/get-user-portfolio` GET.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifoldPortfolio {
    #[serde(default)]
    investment_value: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Manifold Markets client.
pub struct ManifoldClient {
    http: Client,
    base_url: String,
    /// Needed for betting and account endpoints only.
    api_key: Option<SecretString>,
}

impl ManifoldClient {
    /// Create a new Manifold client. Scanning works without a key.
    pub fn new(cfg: &ManifoldConfig, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .user_agent("SIBYL/0.1.0 (prediction-market-engine)")
            .build()
            .context("Failed to build HTTP client for Manifold")?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::new),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    // -- Internal helpers ------------------------------------------------

    fn authorized(&self, req: RequestBuilder, purpose: &str) -> Result<RequestBuilder> {
        let key = self
            .api_key
            .as_ref()
            .with_context(|| format!("Manifold API key required for {purpose}"))?;
        Ok(req.header("Authorization", format!("Key {}", key.expose_secret())))
    }

    /// Send a request and decode the JSON body. Non-2xx responses become
    /// `ApiError`s carrying the status code and body text.
    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let resp = req
            .send()
            .await
            .with_context(|| format!("Manifold {what} request failed"))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(ApiError::new(status, body)).context(format!("Manifold {what} failed")));
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse Manifold {what} response"))
    }

    /// Convert a Manifold API timestamp (ms since epoch) to `DateTime<Utc>`.
    fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    fn to_snapshot(m: ManifoldMarket) -> MarketSnapshot {
        let created_time = Self::ms_to_datetime(m.created_time);
        let close_time = m
            .close_time
            .map(Self::ms_to_datetime)
            .unwrap_or_else(|| created_time + Duration::days(NO_CLOSE_HORIZON_DAYS));

        let pool: BTreeMap<String, f64> = m.pool.unwrap_or_default().into_iter().collect();
        let total_liquidity = m
            .total_liquidity
            .unwrap_or_else(|| pool.values().sum());

        let answers = m
            .answers
            .unwrap_or_default()
            .into_iter()
            .map(|a| AnswerState {
                id: a.id,
                text: a.text,
                probability: a.probability.clamp(0.0, 1.0),
                resolution: a.resolution.filter(|r| !r.is_empty()),
            })
            .collect();

        MarketSnapshot {
            id: m.id,
            question: m.question,
            outcome: OutcomeKind::from_tag(&m.outcome_type),
            probability: m.probability.unwrap_or(0.0).clamp(0.0, 1.0),
            answers,
            volume: m.volume,
            volume_24h: m.volume24_hours,
            total_liquidity,
            pool,
            created_time,
            close_time,
            is_resolved: m.is_resolved,
            resolution: m.resolution.filter(|r| !r.is_empty()),
            creator_id: m.creator_id,
            mechanism: m.mechanism,
            url: m.url,
        }
    }

    /// JSON body for `/bet`.
    fn bet_body(order: &BetOrder) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contractId": order.market_id,
            "amount": order.amount.to_f64().unwrap_or(0.0),
            "outcome": order.side.as_str(),
        });
        if let Some(answer_id) = &order.answer_id {
            body["answerId"] = serde_json::json!(answer_id);
        }
        if let Some(limit) = order.limit_prob {
            body["limitProb"] = serde_json::json!(limit);
        }
        body
    }
}

// ---------------------------------------------------------------------------
// MarketProvider trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketProvider for ManifoldClient {
    async fn search_markets(&self, query: &SearchQuery) -> Result<Vec<MarketSnapshot>> {
        let mut url = format!(
            "{}/search-markets?term={}&filter={}&sort={}&limit={}",
            self.base_url,
            urlencoding::encode(&query.term),
            query.filter.as_str(),
            query.sort.as_str(),
            query.limit,
        );
        if let Some(kind) = query.contract_type {
            url.push_str(&format!("&contractType={}", kind.as_str()));
        }

        debug!(url = %url, "Fetching Manifold markets");

        let markets: Vec<ManifoldMarket> = self.send_json(self.http.get(&url), "search-markets").await?;
        Ok(markets.into_iter().map(Self::to_snapshot).collect())
    }

    async fn get_market(&self, id: &str) -> Result<MarketSnapshot> {
        let url = format!("{}/market/{}", self.base_url, urlencoding::encode(id));
        let market: ManifoldMarket = self.send_json(self.http.get(&url), "market detail").await?;
        Ok(Self::to_snapshot(market))
    }

    async fn get_market_probs(&self, ids: &[String]) -> Result<HashMap<String, MarketProbs>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        let req = self
            .http
            .get(format!("{}/market-probs", self.base_url))
            .query(&params);

        let raw: HashMap<String, ManifoldProbs> = self.send_json(req, "market-probs").await?;
        Ok(raw
            .into_iter()
            .map(|(id, p)| {
                (
                    id,
                    MarketProbs {
                        prob: p.prob,
                        answer_probs: p.answer_probs.unwrap_or_default(),
                    },
                )
            })
            .collect())
    }

    /// Balance comes from `/me`; invested value from the user's portfolio.
    /// A failing portfolio endpoint is not fatal: invested counts as zero.
    async fn get_portfolio(&self) -> Result<Portfolio> {
        let req = self.authorized(self.http.get(format!("{}/me", self.base_url)), "balance check")?;
        let user: ManifoldUser = self.send_json(req, "me").await?;
        let balance = Decimal::from_f64(user.balance).unwrap_or_default();

        let req = self
            .http
            .get(format!("{}/get-user-portfolio", self.base_url))
            .query(&[("userId", user.id.as_str())]);
        let invested = match self.send_json::<ManifoldPortfolio>(req, "portfolio").await {
            Ok(p) => Decimal::from_f64(p.investment_value).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Portfolio lookup failed, counting invested value as zero");
                Decimal::ZERO
            }
        };

        Ok(Portfolio::new(balance, invested))
    }

    async fn place_bet(&self, order: &BetOrder) -> Result<BetReceipt> {
        let req = self
            .authorized(self.http.post(format!("{}/bet", self.base_url)), "placing bets")?
            .json(&Self::bet_body(order));
        let bet: ManifoldBetResponse = self.send_json(req, "bet").await?;

        let bet_id = bet
            .bet_id
            .or(bet.id)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            bet_id = %bet_id,
            market_id = %order.market_id,
            answer_id = ?order.answer_id,
            side = %order.side,
            amount = %order.amount,
            limit = ?order.limit_prob,
            filled = bet.is_filled,
            "Manifold bet placed"
        );

        Ok(BetReceipt {
            bet_id,
            is_filled: bet.is_filled,
            prob_after: bet.prob_after,
        })
    }

    async fn cancel_bet(&self, bet_id: &str) -> Result<()> {
        let url = format!("{}/bet/cancel/{}", self.base_url, urlencoding::encode(bet_id));
        let req = self.authorized(self.http.post(&url), "cancelling bets")?;
        let _: serde_json::Value = self.send_json(req, "bet cancel").await?;
        debug!(bet_id, "Manifold limit order cancelled");
        Ok(())
    }

    fn name(&self) -> &'static str {
        PLATFORM_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
