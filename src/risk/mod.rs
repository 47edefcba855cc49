//! Risk engine.
//!
//! Gates trading on drawdown and total exposure, sizes each signal with
//! fractional Kelly under position, exposure and balance caps, and
//! allocates each market's remaining exposure budget first-come
//! first-served within a batch.
//!
//! A `RiskManager` is single-writer state: the live loop and the replay
//! driver each own their own instance.

pub mod kelly;

use rust_decimal::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::types::{Portfolio, Signal, SizedSignal};

pub struct RiskManager {
    cfg: RiskConfig,
    portfolio: Portfolio,
    peak_value: Decimal,
    total_exposure: Decimal,
    market_exposure: HashMap<String, Decimal>,
}

impl RiskManager {
    pub fn new(cfg: RiskConfig, portfolio: Portfolio) -> Self {
        Self {
            cfg,
            peak_value: portfolio.total_value,
            portfolio,
            total_exposure: Decimal::ZERO,
            market_exposure: HashMap::new(),
        }
    }

    // -- Accessors -------------------------------------------------------

    pub fn config(&self) -> &RiskConfig {
        &self.cfg
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn peak_value(&self) -> Decimal {
        self.peak_value
    }

    pub fn total_exposure(&self) -> Decimal {
        self.total_exposure
    }

    pub fn market_exposure(&self, market_id: &str) -> Decimal {
        self.market_exposure.get(market_id).copied().unwrap_or_default()
    }

    /// Current decline from peak as a fraction of peak.
    pub fn drawdown(&self) -> Decimal {
        if self.peak_value <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.peak_value - self.portfolio.total_value) / self.peak_value
    }

    // -- State updates ---------------------------------------------------

    /// Adopt a freshly fetched portfolio: raise the peak if needed and take
    /// total exposure from the invested value, discarding local drift.
    pub fn refresh(&mut self, portfolio: Portfolio) {
        self.portfolio = portfolio;
        if portfolio.total_value > self.peak_value {
            self.peak_value = portfolio.total_value;
        }
        self.total_exposure = portfolio.invested;
        debug!(
            total = %portfolio.total_value,
            peak = %self.peak_value,
            exposure = %self.total_exposure,
            "Risk state refreshed"
        );
    }

    /// Replace per-market exposure with the ledger's unresolved totals.
    pub fn set_market_exposure(&mut self, exposure: HashMap<String, Decimal>) {
        self.market_exposure = exposure;
    }

    /// Account for a confirmed execution.
    pub fn record_trade(&mut self, market_id: &str, amount: Decimal) {
        self.total_exposure += amount;
        *self.market_exposure.entry(market_id.to_string()).or_default() += amount;
    }

    // -- Gate ------------------------------------------------------------

    /// Circuit breaker. Also advances the high-water mark.
    pub fn can_trade(&mut self) -> bool {
        let total = self.portfolio.total_value;
        if total <= Decimal::ZERO {
            warn!("Portfolio value is zero, trading halted");
            return false;
        }

        if total > self.peak_value {
            self.peak_value = total;
        }

        let drawdown = self.drawdown();
        if drawdown >= self.cfg.max_drawdown_pct {
            warn!(
                drawdown = format!("{:.1}%", drawdown * Decimal::ONE_HUNDRED),
                peak = format!("M{:.0}", self.peak_value),
                total = format!("M{:.0}", total),
                "Drawdown circuit breaker tripped"
            );
            return false;
        }

        let exposure_pct = self.total_exposure / total;
        if exposure_pct >= self.cfg.max_total_exposure_pct {
            info!(
                exposure = format!("{:.1}%", exposure_pct * Decimal::ONE_HUNDRED),
                "Total exposure limit reached"
            );
            return false;
        }

        true
    }

    // -- Sizing ----------------------------------------------------------

    /// Fractional-Kelly amount for one signal, after the position,
    /// total-exposure and balance caps, floored to whole units. Zero means
    /// no trade.
    pub fn size_position(&self, signal: &Signal) -> Decimal {
        if signal.edge < self.cfg.min_edge {
            return Decimal::ZERO;
        }

        let Some(full_kelly) = kelly::kelly_fraction(signal.side, signal.market_prob, signal.confidence)
        else {
            debug!(market_id = %signal.market_id, "Non-positive Kelly, no bet");
            return Decimal::ZERO;
        };

        let fraction = full_kelly * self.cfg.kelly_fraction;
        let Some(fraction) = Decimal::from_f64(fraction) else {
            return Decimal::ZERO;
        };

        let total = self.portfolio.total_value;
        let balance = self.portfolio.balance;

        let mut amount = fraction * balance;
        amount = amount.min(self.cfg.max_position_pct * total);
        amount = amount.min(self.cfg.max_total_exposure_pct * total - self.total_exposure);
        amount = amount.min(balance);
        let amount = amount.floor();

        if amount < self.cfg.min_bet_amount {
            return Decimal::ZERO;
        }

        debug!(
            market_id = %signal.market_id,
            strategy = %signal.strategy,
            kelly = format!("{:.2}%", full_kelly * 100.0),
            amount = format!("M{amount}"),
            "Position sized"
        );
        amount
    }

    /// Size a batch. Returns nothing when the circuit breaker is open.
    /// Per-market budgets are consumed in input order.
    pub fn size_signals(&mut self, signals: &[Signal]) -> Vec<SizedSignal> {
        if !self.can_trade() {
            return Vec::new();
        }

        let market_cap = self.cfg.max_market_exposure_pct * self.portfolio.total_value;
        let mut committed: HashMap<&str, Decimal> = HashMap::new();
        let mut sized = Vec::new();

        for signal in signals {
            let mut amount = self.size_position(signal);
            if amount.is_zero() {
                continue;
            }

            let market_id = signal.market_id.as_str();
            if self.cfg.max_market_exposure_pct > Decimal::ZERO {
                let existing = self.market_exposure(market_id)
                    + committed.get(market_id).copied().unwrap_or_default();
                let remaining = market_cap - existing;
                if remaining <= Decimal::ZERO {
                    debug!(market_id, "Market exposure cap reached");
                    continue;
                }
                amount = amount.min(remaining.floor());
            }

            if amount < self.cfg.min_bet_amount {
                continue;
            }

            *committed.entry(market_id).or_default() += amount;
            sized.push(SizedSignal {
                signal: signal.clone(),
                amount,
            });
        }

        info!(
            signals = signals.len(),
            sized = sized.len(),
            total = format!("M{}", sized.iter().map(|s| s.amount).sum::<Decimal>()),
            "Signals sized"
        );
        sized
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
