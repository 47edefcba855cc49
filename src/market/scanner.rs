//! Market scanner.
//!
//! Pulls open markets from the provider and fills in what the bulk search
//! endpoint leaves out: answer probabilities via batched lookups, and
//! per-answer resolution via a bounded-parallel detail pass.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::platforms::{MarketProvider, SearchQuery, MAX_PROB_BATCH};
use crate::types::{AnswerState, MarketSnapshot, OutcomeKind, ACTIVE_PROB_CEIL, ACTIVE_PROB_FLOOR};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Markets fetched per contract-type search.
pub const DEFAULT_SCAN_LIMIT: u32 = 200;

/// Ceiling on simultaneous market-detail requests.
pub const MAX_CONCURRENT_DETAIL_FETCHES: usize = 10;

/// Detail fetches are only worth it for markets at least this liquid.
const DETAIL_MIN_LIQUIDITY: f64 = 50.0;

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    provider: Arc<dyn MarketProvider>,
    max_in_flight: usize,
}

impl Scanner {
    pub fn new(provider: Arc<dyn MarketProvider>) -> Self {
        Self {
            provider,
            max_in_flight: MAX_CONCURRENT_DETAIL_FETCHES,
        }
    }

    /// Override the detail-fetch concurrency ceiling (minimum 1).
    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n.max(1);
        self
    }

    /// Open binary markets, most liquid first.
    pub async fn scan_binary(&self, limit: u32) -> Result<Vec<MarketSnapshot>> {
        let markets = self
            .provider
            .search_markets(&SearchQuery::open(Some(OutcomeKind::Binary), limit))
            .await
            .context("Binary market search failed")?;
        info!(count = markets.len(), "Binary markets scanned");
        Ok(markets)
    }

    /// Open multiple-choice markets with answer probabilities and, for
    /// promising candidates, answer resolutions filled in.
    pub async fn scan_multiple_choice(&self, limit: u32) -> Result<Vec<MarketSnapshot>> {
        let mut markets = self
            .provider
            .search_markets(&SearchQuery::open(Some(OutcomeKind::MultipleChoice), limit))
            .await
            .context("Multiple-choice market search failed")?;

        self.enrich_with_probs(&mut markets).await;
        let enriched = self.enrich_with_resolution(&mut markets).await;

        info!(
            count = markets.len(),
            detail_fetched = enriched,
            "Multiple-choice markets scanned"
        );
        Ok(markets)
    }

    /// Binary then multiple-choice markets, enriched exactly as the
    /// trading cycle sees them. `limit` applies per contract type.
    pub async fn scan_all(&self, limit: u32) -> Result<Vec<MarketSnapshot>> {
        let mut markets = self.scan_binary(limit).await?;
        markets.extend(self.scan_multiple_choice(limit).await?);
        debug!(count = markets.len(), "All open markets scanned");
        Ok(markets)
    }

    /// Merge batched probability lookups into the market records. A failed
    /// chunk is logged and skipped.
    async fn enrich_with_probs(&self, markets: &mut [MarketSnapshot]) {
        for chunk in markets.chunks_mut(MAX_PROB_BATCH) {
            let ids: Vec<String> = chunk.iter().map(|m| m.id.clone()).collect();
            let probs = match self.provider.get_market_probs(&ids).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, batch = ids.len(), "Probability lookup failed, skipping batch");
                    continue;
                }
            };

            for market in chunk.iter_mut() {
                let Some(p) = probs.get(&market.id) else {
                    continue;
                };
                if market.answers.is_empty() {
                    let mut answers: Vec<AnswerState> = p
                        .answer_probs
                        .iter()
                        .map(|(id, prob)| AnswerState {
                            id: id.clone(),
                            text: String::new(),
                            probability: *prob,
                            resolution: None,
                        })
                        .collect();
                    answers.sort_by(|a, b| a.id.cmp(&b.id));
                    market.answers = answers;
                } else {
                    for answer in market.answers.iter_mut() {
                        if let Some(prob) = p.answer_probs.get(&answer.id) {
                            answer.probability = *prob;
                        }
                    }
                }
                if let Some(prob) = p.prob.filter(|v| *v > 0.0) {
                    market.probability = prob;
                }
            }
        }
    }

    /// Fetch full detail for candidate markets with at most
    /// `max_in_flight` requests outstanding. Each task owns one result
    /// slot; failures are logged and skipped. Returns the number merged.
    async fn enrich_with_resolution(&self, markets: &mut [MarketSnapshot]) -> usize {
        let candidates: Vec<(usize, String)> = markets
            .iter()
            .enumerate()
            .filter(|(_, m)| needs_detail(m))
            .map(|(i, m)| (i, m.id.clone()))
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let gate = Arc::new(Semaphore::new(self.max_in_flight));
        let fetches = candidates.into_iter().map(|(idx, id)| {
            let gate = Arc::clone(&gate);
            let provider = Arc::clone(&self.provider);
            async move {
                let result = match gate.acquire().await {
                    Ok(_permit) => provider.get_market(&id).await,
                    Err(e) => Err(e.into()),
                };
                (idx, id, result)
            }
        });

        let mut merged = 0;
        for (idx, id, result) in join_all(fetches).await {
            match result {
                Ok(detail) => {
                    merge_detail(&mut markets[idx], &detail);
                    merged += 1;
                }
                Err(e) => warn!(market_id = %id, error = %e, "Market detail fetch failed, skipping"),
            }
        }
        merged
    }
}

/// Liquid enough and with at least two answers still trading.
fn needs_detail(m: &MarketSnapshot) -> bool {
    m.total_liquidity >= DETAIL_MIN_LIQUIDITY
        && m.answers
            .iter()
            .filter(|a| a.probability > ACTIVE_PROB_FLOOR && a.probability < ACTIVE_PROB_CEIL)
            .count()
            >= 2
}

/// Copy answer resolutions (and missing answer text) from a detail fetch.
fn merge_detail(market: &mut MarketSnapshot, detail: &MarketSnapshot) {
    for answer in market.answers.iter_mut() {
        if let Some(d) = detail.answers.iter().find(|d| d.id == answer.id) {
            answer.resolution = d.resolution.clone();
            if answer.text.is_empty() {
                answer.text = d.text.clone();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{BetOrder, BetReceipt, MarketProbs};
    use crate::types::Portfolio;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_multi(id: &str, liquidity: f64, answers: &[(&str, f64)]) -> MarketSnapshot {
        let now = Utc::now();
        MarketSnapshot {
            id: id.to_string(),
            question: format!("Who wins {id}?"),
            outcome: OutcomeKind::MultipleChoice,
            probability: 0.0,
            answers: answers
                .iter()
                .map(|(aid, p)| AnswerState {
                    id: aid.to_string(),
                    text: String::new(),
                    probability: *p,
                    resolution: None,
                })
                .collect(),
            volume: 0.0,
            volume_24h: 0.0,
            total_liquidity: liquidity,
            pool: BTreeMap::new(),
            created_time: now - Duration::days(10),
            close_time: now + Duration::days(10),
            is_resolved: false,
            resolution: None,
            creator_id: String::new(),
            mechanism: "cpmm-multi-1".into(),
            url: String::new(),
        }
    }

    /// Provider that tracks peak concurrent detail fetches.
    struct CountingProvider {
        markets: Vec<MarketSnapshot>,
        probs: HashMap<String, MarketProbs>,
        failing: Vec<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        detail_calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(markets: Vec<MarketSnapshot>) -> Self {
            Self {
                markets,
                probs: HashMap::new(),
                failing: Vec::new(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                detail_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MarketProvider for CountingProvider {
        async fn search_markets(&self, _query: &SearchQuery) -> Result<Vec<MarketSnapshot>> {
            Ok(self.markets.clone())
        }

        async fn get_market(&self, id: &str) -> Result<MarketSnapshot> {
            self.detail_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing.iter().any(|f| f == id) {
                anyhow::bail!("status 500 Internal Server Error");
            }
            let mut m = self
                .markets
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .context("unknown market")?;
            for a in m.answers.iter_mut() {
                a.text = format!("text-{}", a.id);
                if a.id == "cancelled" {
                    a.resolution = Some("CANCEL".into());
                }
            }
            Ok(m)
        }

        async fn get_market_probs(&self, ids: &[String]) -> Result<HashMap<String, MarketProbs>> {
            assert!(ids.len() <= MAX_PROB_BATCH);
            Ok(self
                .probs
                .iter()
                .filter(|(k, _)| ids.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        async fn get_portfolio(&self) -> Result<Portfolio> {
            Ok(Portfolio::default())
        }

        async fn place_bet(&self, _order: &BetOrder) -> Result<BetReceipt> {
            anyhow::bail!("not supported")
        }

        async fn cancel_bet(&self, _bet_id: &str) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_detail_fetches_respect_ceiling() {
        let markets: Vec<MarketSnapshot> = (0..35)
            .map(|i| make_multi(&format!("m{i}"), 100.0, &[("a", 0.5), ("b", 0.5)]))
            .collect();
        let provider = Arc::new(CountingProvider::new(markets));
        let scanner = Scanner::new(provider.clone());

        let scanned = scanner.scan_multiple_choice(200).await.unwrap();
        assert_eq!(scanned.len(), 35);
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 35);
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= MAX_CONCURRENT_DETAIL_FETCHES, "peak in-flight was {peak}");
        assert!(peak > 1);
    }

    #[tokio::test]
    async fn test_custom_ceiling_is_honoured() {
        let markets: Vec<MarketSnapshot> = (0..12)
            .map(|i| make_multi(&format!("m{i}"), 100.0, &[("a", 0.5), ("b", 0.5)]))
            .collect();
        let provider = Arc::new(CountingProvider::new(markets));
        let scanner = Scanner::new(provider.clone()).with_max_in_flight(3);

        scanner.scan_multiple_choice(200).await.unwrap();
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 12);
        let peak = provider.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight was {peak}");

        // Zero is clamped to one request at a time
        let provider = Arc::new(CountingProvider::new(vec![
            make_multi("x", 100.0, &[("a", 0.5), ("b", 0.5)]),
            make_multi("y", 100.0, &[("a", 0.5), ("b", 0.5)]),
        ]));
        Scanner::new(provider.clone())
            .with_max_in_flight(0)
            .scan_multiple_choice(200)
            .await
            .unwrap();
        assert_eq!(provider.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scan_all_enriches_lite_multi_results() {
        // Search results for multi markets arrive without answers
        let lite = make_multi("lite", 100.0, &[]);
        let mut provider = CountingProvider::new(vec![lite]);
        provider.probs.insert(
            "lite".into(),
            MarketProbs {
                prob: None,
                answer_probs: HashMap::from([("b".into(), 0.45), ("a".into(), 0.55)]),
            },
        );
        let provider = Arc::new(provider);
        let scanner = Scanner::new(provider.clone());

        // CountingProvider ignores the contract type, so both searches return it
        let scanned = scanner.scan_all(200).await.unwrap();
        assert_eq!(scanned.len(), 2);
        let multi = &scanned[1];
        let ids: Vec<&str> = multi.answers.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!((multi.answers[0].probability - 0.55).abs() < 1e-10);
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 1);
        // Binary pass is left as searched
        assert!(scanned[0].answers.is_empty());
    }

    #[tokio::test]
    async fn test_detail_merge_and_failure_isolation() {
        let markets = vec![
            make_multi("ok", 100.0, &[("a", 0.4), ("cancelled", 0.3), ("c", 0.3)]),
            make_multi("broken", 100.0, &[("a", 0.5), ("b", 0.5)]),
        ];
        let mut provider = CountingProvider::new(markets);
        provider.failing.push("broken".into());
        let scanner = Scanner::new(Arc::new(provider));

        let scanned = scanner.scan_multiple_choice(200).await.unwrap();
        let ok = scanned.iter().find(|m| m.id == "ok").unwrap();
        assert_eq!(ok.answers[1].resolution.as_deref(), Some("CANCEL"));
        assert_eq!(ok.answers[0].text, "text-a");

        // The failed market is kept, just without detail
        let broken = scanned.iter().find(|m| m.id == "broken").unwrap();
        assert!(broken.answers[0].text.is_empty());
    }

    #[tokio::test]
    async fn test_illiquid_or_settled_markets_skip_detail() {
        let markets = vec![
            make_multi("thin", 10.0, &[("a", 0.5), ("b", 0.5)]),
            make_multi("settled", 500.0, &[("a", 0.9995), ("b", 0.0005)]),
        ];
        let provider = Arc::new(CountingProvider::new(markets));
        let scanner = Scanner::new(provider.clone());
        scanner.scan_multiple_choice(200).await.unwrap();
        assert_eq!(provider.detail_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probs_create_and_update_answers() {
        let mut bare = make_multi("bare", 100.0, &[]);
        bare.probability = 0.1;
        let known = make_multi("known", 100.0, &[("a", 0.2), ("b", 0.8)]);
        let mut provider = CountingProvider::new(vec![bare, known]);
        provider.probs.insert(
            "bare".into(),
            MarketProbs {
                prob: Some(0.0),
                answer_probs: HashMap::from([("y".into(), 0.7), ("x".into(), 0.3)]),
            },
        );
        provider.probs.insert(
            "known".into(),
            MarketProbs {
                prob: Some(0.35),
                answer_probs: HashMap::from([("a".into(), 0.6)]),
            },
        );
        let scanner = Scanner::new(Arc::new(provider));

        let scanned = scanner.scan_multiple_choice(200).await.unwrap();
        let bare = &scanned[0];
        let ids: Vec<&str> = bare.answers.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        // A zero batch probability leaves the scalar untouched
        assert!((bare.probability - 0.1).abs() < 1e-10);

        let known = &scanned[1];
        assert!((known.answers[0].probability - 0.6).abs() < 1e-10);
        assert!((known.answers[1].probability - 0.8).abs() < 1e-10);
        assert!((known.probability - 0.35).abs() < 1e-10);
    }

    #[test]
    fn test_needs_detail_heuristic() {
        assert!(needs_detail(&make_multi("m", 50.0, &[("a", 0.5), ("b", 0.5)])));
        assert!(!needs_detail(&make_multi("m", 49.9, &[("a", 0.5), ("b", 0.5)])));
        assert!(!needs_detail(&make_multi("m", 100.0, &[("a", 0.5), ("b", 0.001)])));
    }
}
