//! Snapshot replay.
//!
//! Walks the recorded snapshot history in time order and feeds each
//! market set through the same decision pipeline as the live loop, with
//! a simulated portfolio and its own risk state. Replay bets go to their
//! own table and never touch the live ledger. Capital does not move and
//! nothing is settled: the report counts what would have been placed.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Months, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::engine;
use crate::risk::RiskManager;
use crate::storage::Store;
use crate::strategy::StrategySet;
use crate::types::{Portfolio, SizedSignal};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyTally {
    pub bets: usize,
    pub wagered: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub starting_balance: Decimal,
    pub snapshots: usize,
    pub total_bets: usize,
    pub total_wagered: Decimal,
    pub by_strategy: BTreeMap<String, StrategyTally>,
    /// Accepted decisions per snapshot time, in replay order.
    pub decisions: Vec<(DateTime<Utc>, Vec<SizedSignal>)>,
}

impl ReplayReport {
    pub fn log(&self) {
        info!(
            from = %self.from.format(DATE_FORMAT),
            to = %self.to.format(DATE_FORMAT),
            snapshots = self.snapshots,
            bets = self.total_bets,
            wagered = format!("M{:.0}", self.total_wagered),
            starting_balance = format!("M{:.0}", self.starting_balance),
            "Replay complete"
        );
        for (name, t) in &self.by_strategy {
            info!(
                strategy = %name,
                bets = t.bets,
                wagered = format!("M{:.0}", t.wagered),
                "Replay strategy totals"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct ReplayDriver {
    store: Store,
    strategies: StrategySet,
    risk_cfg: RiskConfig,
}

impl ReplayDriver {
    pub fn new(store: Store, strategies: StrategySet, risk_cfg: RiskConfig) -> Self {
        Self {
            store,
            strategies,
            risk_cfg,
        }
    }

    /// Replay every snapshot time in `[from, to]` starting from `balance`.
    pub async fn run(&self, from: DateTime<Utc>, to: DateTime<Utc>, balance: Decimal) -> Result<ReplayReport> {
        info!(
            from = %from.format(DATE_FORMAT),
            to = %to.format(DATE_FORMAT),
            balance = format!("M{:.0}", balance),
            strategies = ?self.strategies.enabled_names(),
            "Replay starting"
        );

        let times = self
            .store
            .snapshot_times(from, to)
            .await
            .context("Failed to load snapshot times")?;
        if times.is_empty() {
            bail!(
                "No market snapshots found between {} and {}",
                from.format(DATE_FORMAT),
                to.format(DATE_FORMAT)
            );
        }
        info!(count = times.len(), "Loaded snapshot times");

        let portfolio = Portfolio::cash(balance);
        let mut risk = RiskManager::new(self.risk_cfg.clone(), portfolio);
        let mut report = ReplayReport {
            from,
            to,
            starting_balance: balance,
            snapshots: times.len(),
            total_bets: 0,
            total_wagered: Decimal::ZERO,
            by_strategy: BTreeMap::new(),
            decisions: Vec::with_capacity(times.len()),
        };

        for at in times {
            let markets = match self.store.markets_at(at).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(at = %at, error = %e, "Failed to load markets, skipping snapshot");
                    continue;
                }
            };

            risk.refresh(portfolio);
            let sized = engine::decide(&self.strategies, &mut risk, &markets, at);

            for s in &sized {
                risk.record_trade(&s.signal.market_id, s.amount);
                report.total_bets += 1;
                report.total_wagered += s.amount;
                let tally = report.by_strategy.entry(s.signal.strategy.clone()).or_default();
                tally.bets += 1;
                tally.wagered += s.amount;

                if let Err(e) = self.store.record_replay_bet(at, s).await {
                    warn!(market_id = %s.signal.market_id, error = %e, "Failed to record replay bet");
                }
            }
            report.decisions.push((at, sized));
        }

        Ok(report)
    }
}

/// Resolve CLI dates. `from` defaults to one year before `today`, `to`
/// to `today`; `to` covers its whole day.
pub fn parse_date_range(
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let from_date = match from {
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("Invalid --from date: {s}"))?,
        None => today.checked_sub_months(Months::new(12)).unwrap_or(today),
    };
    let to_date = match to {
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("Invalid --to date: {s}"))?,
        None => today,
    };
    if from_date > to_date {
        bail!("--from {from_date} is after --to {to_date}");
    }

    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    Ok((
        from_date.and_time(NaiveTime::MIN).and_utc(),
        to_date.and_time(end_of_day).and_utc(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
