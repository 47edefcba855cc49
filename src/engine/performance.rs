//! Performance reporting.
//!
//! Summarises the bet ledger and bankroll history. Realised P&L is only
//! read here; settling resolved bets happens elsewhere.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

use crate::storage::{LedgerEntry, Store};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyStats {
    pub bets: usize,
    pub wagered: Decimal,
    pub pnl: Decimal,
    pub roi: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceReport {
    pub total_bets: usize,
    pub resolved_bets: usize,
    pub total_wagered: Decimal,
    pub total_pnl: Decimal,
    pub roi: f64,
    pub win_rate: f64,
    pub peak_value: Decimal,
    pub current_value: Decimal,
    /// Largest peak-to-trough decline as a fraction of the peak.
    pub max_drawdown: f64,
    pub by_strategy: BTreeMap<String, StrategyStats>,
}

impl PerformanceReport {
    pub async fn generate(store: &Store) -> Result<Self> {
        let ledger = store.ledger().await.context("Performance report: ledger")?;
        let history = store
            .bankroll_history()
            .await
            .context("Performance report: bankroll history")?;
        Ok(Self::from_records(&ledger, &history))
    }

    pub fn from_records(ledger: &[LedgerEntry], bankroll: &[Decimal]) -> Self {
        let mut report = Self::default();
        let mut wins = 0usize;
        let mut strategy_wins: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

        for bet in ledger {
            report.total_bets += 1;
            report.total_wagered += bet.amount;

            let stats = report.by_strategy.entry(bet.strategy.clone()).or_default();
            stats.bets += 1;
            stats.wagered += bet.amount;

            if bet.resolved {
                let pnl = bet.pnl.unwrap_or_default();
                report.resolved_bets += 1;
                report.total_pnl += pnl;
                stats.pnl += pnl;

                let (won, resolved) = strategy_wins.entry(bet.strategy.as_str()).or_default();
                *resolved += 1;
                if pnl > Decimal::ZERO {
                    wins += 1;
                    *won += 1;
                }
            }
        }

        report.roi = ratio(report.total_pnl, report.total_wagered);
        if report.resolved_bets > 0 {
            report.win_rate = wins as f64 / report.resolved_bets as f64;
        }
        for (name, stats) in report.by_strategy.iter_mut() {
            stats.roi = ratio(stats.pnl, stats.wagered);
            if let Some((won, resolved)) = strategy_wins.get(name.as_str()).filter(|(_, r)| *r > 0) {
                stats.win_rate = *won as f64 / *resolved as f64;
            }
        }

        let mut peak = Decimal::ZERO;
        for value in bankroll {
            peak = peak.max(*value);
            if peak > Decimal::ZERO {
                let dd = ((peak - *value) / peak).to_f64().unwrap_or(0.0);
                report.max_drawdown = report.max_drawdown.max(dd);
            }
        }
        report.peak_value = peak;
        report.current_value = bankroll.last().copied().unwrap_or_default();

        report
    }

    pub fn log(&self) {
        info!(
            total_bets = self.total_bets,
            resolved_bets = self.resolved_bets,
            wagered = format!("M{:.0}", self.total_wagered),
            pnl = format!("M{:.2}", self.total_pnl),
            roi = format!("{:.1}%", self.roi * 100.0),
            win_rate = format!("{:.1}%", self.win_rate * 100.0),
            current = format!("M{:.0}", self.current_value),
            peak = format!("M{:.0}", self.peak_value),
            max_drawdown = format!("{:.1}%", self.max_drawdown * 100.0),
            "Performance report"
        );
        for (name, s) in &self.by_strategy {
            info!(
                strategy = %name,
                bets = s.bets,
                wagered = format!("M{:.0}", s.wagered),
                pnl = format!("M{:.2}", s.pnl),
                roi = format!("{:.1}%", s.roi * 100.0),
                win_rate = format!("{:.1}%", s.win_rate * 100.0),
                "Strategy performance"
            );
        }
    }
}

fn ratio(num: Decimal, den: Decimal) -> f64 {
    if den > Decimal::ZERO {
        (num / den).to_f64().unwrap_or(0.0)
    } else {
        0.0
    }
}
