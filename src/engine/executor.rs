//! Trade executor.
//!
//! Places sized signals with the provider, classifies failures, records
//! successful bets in the ledger and cancels stale resting limit orders.
//! Dry-run mode logs intended bets without touching the provider or the
//! ledger.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::platforms::{ApiError, BetOrder, BetReceipt, MarketProvider};
use crate::storage::{ActiveOrder, BetRecord, Store};
use crate::types::{Side, SizedSignal};

/// Consecutive transient failures after which a key is skipped.
pub const MAX_TRANSIENT_FAILURES: u32 = 3;

/// Statuses for which retrying can never succeed.
const PERMANENT_STATUSES: [u16; 2] = [403, 404];

/// Client-error bodies naming a market that no longer trades.
static MARKET_GONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(resolved|closed)\b").expect("market-gone pattern compiles"));

const MIN_LIMIT_PROB: f64 = 0.01;
const MAX_LIMIT_PROB: f64 = 0.99;

// ---------------------------------------------------------------------------
// Errors and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("skipped: {0}")]
    Skipped(String),
}

impl ExecutionError {
    /// Classify a provider error. Only an API rejection can be permanent;
    /// transport and decode errors are always transient.
    pub fn classify(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let permanent = err
            .chain()
            .find_map(|e| e.downcast_ref::<ApiError>())
            .is_some_and(|api| {
                PERMANENT_STATUSES.contains(&api.status)
                    || ((400..500).contains(&api.status) && MARKET_GONE.is_match(&api.body))
            });
        if permanent {
            ExecutionError::Permanent(message)
        } else {
            ExecutionError::Transient(message)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub executed: Vec<(SizedSignal, BetReceipt)>,
    pub failed: Vec<(SizedSignal, ExecutionError)>,
    pub total_committed: Decimal,
}

/// Identifies repeated attempts at the same bet.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FailureKey {
    market_id: String,
    side: Side,
    answer_id: Option<String>,
}

impl FailureKey {
    fn of(sized: &SizedSignal) -> Self {
        Self {
            market_id: sized.signal.market_id.clone(),
            side: sized.signal.side,
            answer_id: sized.signal.answer_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureState {
    Blocked,
    Transient(u32),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    provider: Arc<dyn MarketProvider>,
    store: Store,
    dry_run: bool,
    failures: HashMap<FailureKey, FailureState>,
}

impl Executor {
    pub fn new(provider: Arc<dyn MarketProvider>, store: Store, dry_run: bool) -> Self {
        Self {
            provider,
            store,
            dry_run,
            failures: HashMap::new(),
        }
    }

    /// Execute signals in order; every signal gets exactly one outcome.
    pub async fn execute_batch(&mut self, batch: &[SizedSignal]) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        if batch.is_empty() {
            return report;
        }

        info!(count = batch.len(), dry_run = self.dry_run, "Executing batch");

        for sized in batch {
            match self.execute(sized).await {
                Ok(receipt) => {
                    report.total_committed += sized.amount;
                    report.executed.push((sized.clone(), receipt));
                }
                Err(e) => report.failed.push((sized.clone(), e)),
            }
        }

        info!(
            executed = report.executed.len(),
            failed = report.failed.len(),
            committed = format!("M{:.0}", report.total_committed),
            "Batch execution complete"
        );
        report
    }

    /// Place one sized signal.
    pub async fn execute(&mut self, sized: &SizedSignal) -> Result<BetReceipt, ExecutionError> {
        let signal = &sized.signal;
        let limit_prob = signal.limit_prob.and_then(sendable_limit);

        if self.dry_run {
            info!(
                market_id = %signal.market_id,
                answer_id = ?signal.answer_id,
                side = %signal.side,
                amount = format!("M{:.0}", sized.amount),
                limit = ?limit_prob,
                strategy = %signal.strategy,
                edge = format!("{:.1}%", signal.edge * 100.0),
                "[DRY RUN] Would place bet"
            );
            return Ok(BetReceipt {
                bet_id: format!("dry-run-{}", uuid::Uuid::new_v4()),
                is_filled: limit_prob.is_none(),
                prob_after: None,
            });
        }

        let key = FailureKey::of(sized);
        match self.failures.get(&key) {
            Some(FailureState::Blocked) => {
                debug!(market_id = %signal.market_id, "Skipping permanently failed bet");
                return Err(ExecutionError::Skipped(format!(
                    "{} {} blocked after permanent failure",
                    signal.market_id, signal.side
                )));
            }
            Some(FailureState::Transient(n)) if *n >= MAX_TRANSIENT_FAILURES => {
                debug!(market_id = %signal.market_id, failures = n, "Skipping repeatedly failing bet");
                return Err(ExecutionError::Skipped(format!(
                    "{} {} failed {n} times in a row",
                    signal.market_id, signal.side
                )));
            }
            _ => {}
        }

        let order = BetOrder {
            market_id: signal.market_id.clone(),
            answer_id: signal.answer_id.clone(),
            side: signal.side,
            amount: sized.amount,
            limit_prob,
        };

        let receipt = match self.provider.place_bet(&order).await {
            Ok(r) => r,
            Err(e) => {
                let err = ExecutionError::classify(&e);
                self.note_failure(key, &err);
                warn!(
                    market_id = %signal.market_id,
                    side = %signal.side,
                    strategy = %signal.strategy,
                    error = %err,
                    "Bet placement failed"
                );
                return Err(err);
            }
        };

        self.failures.remove(&key);
        info!(
            market_id = %signal.market_id,
            answer_id = ?signal.answer_id,
            side = %signal.side,
            amount = format!("M{:.0}", sized.amount),
            bet_id = %receipt.bet_id,
            filled = receipt.is_filled,
            strategy = %signal.strategy,
            "Bet placed"
        );

        // The bet is live whatever happens to the ledger write.
        let record = BetRecord::from_sized(sized, Some(receipt.bet_id.clone()), limit_prob);
        if let Err(e) = self.store.record_bet(&record).await {
            error!(market_id = %signal.market_id, error = %e, "Failed to record bet");
        }

        if let (Some(limit), false) = (limit_prob, receipt.is_filled) {
            let order = ActiveOrder {
                bet_id: receipt.bet_id.clone(),
                market_id: signal.market_id.clone(),
                answer_id: signal.answer_id.clone(),
                outcome: signal.side,
                amount: sized.amount,
                limit_prob: limit,
                placed_at: Utc::now(),
            };
            if let Err(e) = self.store.record_active_order(&order).await {
                error!(bet_id = %receipt.bet_id, error = %e, "Failed to record active order");
            }
        }

        Ok(receipt)
    }

    fn note_failure(&mut self, key: FailureKey, err: &ExecutionError) {
        let next = match (err, self.failures.get(&key)) {
            (ExecutionError::Permanent(_), _) => FailureState::Blocked,
            (_, Some(FailureState::Transient(n))) => FailureState::Transient(n + 1),
            (_, Some(FailureState::Blocked)) => FailureState::Blocked,
            (_, None) => FailureState::Transient(1),
        };
        self.failures.insert(key, next);
    }

    /// Cancel resting limit orders older than `max_age`. Failed
    /// cancellations stay active and are retried next time. Returns the
    /// number cancelled.
    pub async fn cancel_stale_orders(&self, max_age: Duration, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let stale = self.store.stale_active_orders(now - max_age).await?;
        if stale.is_empty() {
            debug!("No stale limit orders");
            return Ok(0);
        }

        let mut cancelled = 0;
        for order in &stale {
            if self.dry_run {
                info!(bet_id = %order.bet_id, market_id = %order.market_id, "[DRY RUN] Would cancel order");
                continue;
            }
            match self.provider.cancel_bet(&order.bet_id).await {
                Ok(()) => {
                    self.store.deactivate_order(&order.bet_id).await?;
                    cancelled += 1;
                }
                Err(e) => warn!(bet_id = %order.bet_id, error = %e, "Order cancellation failed"),
            }
        }

        info!(stale = stale.len(), cancelled, "Stale limit orders processed");
        Ok(cancelled)
    }
}

/// Round to the venue's 0.01 tick; out-of-range limits become market orders.
fn sendable_limit(p: f64) -> Option<f64> {
    let rounded = (p * 100.0).round() / 100.0;
    (MIN_LIMIT_PROB..=MAX_LIMIT_PROB).contains(&rounded).then_some(rounded)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
