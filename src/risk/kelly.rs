//! Kelly criterion for binary prediction-market bets.
//!
//! Kelly formula: f* = (b·p − q) / b
//! where:
//!   b = net odds (profit per unit staked)
//!   p = estimated win probability
//!   q = 1 − p

use crate::types::Side;

/// Net odds of buying `side` when the YES probability is `market_prob`.
///
/// Buying YES at price p pays 1/p per unit, so b = 1/p − 1; NO is priced
/// at 1 − p. Returns `None` when the price is degenerate or the odds are
/// not positive.
pub fn net_odds(side: Side, market_prob: f64) -> Option<f64> {
    let price = match side {
        Side::Yes => market_prob,
        Side::No => 1.0 - market_prob,
    };
    if price <= 0.0 || price >= 1.0 {
        return None;
    }
    let b = 1.0 / price - 1.0;
    (b > 0.0).then_some(b)
}

/// Full Kelly fraction for a bet on `side` with win probability
/// `confidence`. `None` means the bet has no positive expectation.
pub fn kelly_fraction(side: Side, market_prob: f64, confidence: f64) -> Option<f64> {
    let b = net_odds(side, market_prob)?;
    let f = (b * confidence - (1.0 - confidence)) / b;
    (f > 0.0).then_some(f)
}
