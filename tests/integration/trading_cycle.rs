//! Live trading-cycle tests against the mock provider and an in-memory
//! database.

use chrono::{Duration, SubsecRound, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use sibyl::config::AppConfig;
use sibyl::engine::Orchestrator;
use sibyl::storage::Store;
use sibyl::types::{Portfolio, Side};

use crate::mock_provider::*;

async fn setup(provider: &MockProvider, cfg: AppConfig) -> (Orchestrator, Store) {
    let store = Store::in_memory().await.unwrap();
    let orch = Orchestrator::new(cfg, Arc::new(provider.clone()), store.clone());
    (orch, store)
}

#[tokio::test]
async fn test_cycle_places_arbitrage_bets() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(
        vec![binary("b1", "Will it rain?", 0.5, now), overpriced_multi("m1", now)],
        Portfolio::cash(dec!(1000)),
    );
    let (mut orch, store) = setup(&provider, AppConfig::default()).await;

    let report = orch.run_trading_cycle_at(now).await.unwrap();
    assert_eq!(report.binary_markets, 1);
    assert_eq!(report.multi_markets, 1);
    assert_eq!(report.sized.len(), 2);
    assert_eq!(report.executed, 2);
    assert_eq!(report.failed, 0);

    let bets = provider.bet_attempts();
    assert_eq!(bets.len(), 2);
    for bet in &bets {
        assert_eq!(bet.market_id, "m1");
        assert_eq!(bet.side, Side::No);
        assert_eq!(bet.amount, dec!(50));
        assert_eq!(bet.limit_prob, Some(0.44));
    }

    // Ledger, risk state and cache all reflect the fills
    let exposure = store.unresolved_exposure_by_market().await.unwrap();
    assert_eq!(exposure.get("m1"), Some(&dec!(100)));
    assert_eq!(orch.risk().market_exposure("m1"), dec!(100));
    assert_eq!(orch.risk().total_exposure(), dec!(100));
    assert_eq!(orch.cache().len(), 2);

    // Both limit orders rest unfilled
    let resting = store.stale_active_orders(now + Duration::days(1)).await.unwrap();
    assert_eq!(resting.len(), 2);
}

#[tokio::test]
async fn test_ledger_exposure_caps_next_cycle() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    let (mut orch, _store) = setup(&provider, AppConfig::default()).await;

    orch.run_trading_cycle_at(now).await.unwrap();
    // The venue now reports the capital as invested
    provider.set_portfolio(Portfolio::new(dec!(900), dec!(100)));
    let second = orch.run_trading_cycle_at(now + Duration::minutes(5)).await.unwrap();

    assert!(second.sized.is_empty());
    assert_eq!(provider.bet_attempts().len(), 2);
}

#[tokio::test]
async fn test_provider_outage_fails_cycle() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    provider.set_error("connection refused");
    let (mut orch, store) = setup(&provider, AppConfig::default()).await;

    assert!(orch.run_trading_cycle_at(now).await.is_err());
    assert!(provider.bet_attempts().is_empty());
    assert!(store.bankroll_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_permanent_rejection_not_retried() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    provider.reject_bets(403, "market is closed");
    let (mut orch, store) = setup(&provider, AppConfig::default()).await;

    let first = orch.run_trading_cycle_at(now).await.unwrap();
    assert_eq!(first.executed, 0);
    assert_eq!(first.failed, 2);

    let second = orch.run_trading_cycle_at(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(second.failed, 2);
    // Blocked keys never reach the venue again
    assert_eq!(provider.bet_attempts().len(), 2);
    assert!(store.unresolved_exposure_by_market().await.unwrap().is_empty());
    assert_eq!(orch.risk().total_exposure(), dec!(0));
}

#[tokio::test]
async fn test_transport_failures_are_retried() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    provider.fail_bets("error sending request: connection closed before message completed");
    let (mut orch, store) = setup(&provider, AppConfig::default()).await;

    let first = orch.run_trading_cycle_at(now).await.unwrap();
    assert_eq!(first.failed, 2);
    let second = orch.run_trading_cycle_at(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(second.failed, 2);
    assert_eq!(provider.bet_attempts().len(), 4);

    // The connection recovers and the same bets go through
    provider.clear_bet_failure();
    let third = orch.run_trading_cycle_at(now + Duration::minutes(10)).await.unwrap();
    assert_eq!(third.executed, 2);
    assert_eq!(provider.bet_attempts().len(), 6);
    let exposure = store.unresolved_exposure_by_market().await.unwrap();
    assert_eq!(exposure.get("m1"), Some(&dec!(100)));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    provider.reject_bets(503, "Service unavailable, connection closed by upstream");
    let (mut orch, _store) = setup(&provider, AppConfig::default()).await;

    orch.run_trading_cycle_at(now).await.unwrap();
    orch.run_trading_cycle_at(now + Duration::minutes(5)).await.unwrap();
    assert_eq!(provider.bet_attempts().len(), 4);
}

#[tokio::test]
async fn test_dry_run_places_nothing() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    let mut cfg = AppConfig::default();
    cfg.general.dry_run = true;
    let (mut orch, store) = setup(&provider, cfg).await;

    let report = orch.run_trading_cycle_at(now).await.unwrap();
    assert_eq!(report.executed, 2);
    assert!(provider.bet_attempts().is_empty());
    assert!(store.unresolved_exposure_by_market().await.unwrap().is_empty());
    assert_eq!(store.bankroll_history().await.unwrap(), vec![dec!(1000)]);
}

#[tokio::test]
async fn test_drawdown_halts_trading() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(Vec::new(), Portfolio::cash(dec!(1000)));
    let (mut orch, _store) = setup(&provider, AppConfig::default()).await;

    // Establish the high-water mark with nothing to trade
    let first = orch.run_trading_cycle_at(now).await.unwrap();
    assert!(first.sized.is_empty());

    provider.set_markets(vec![overpriced_multi("m1", now)]);
    provider.set_portfolio(Portfolio::cash(dec!(750)));
    let second = orch.run_trading_cycle_at(now + Duration::minutes(5)).await.unwrap();

    assert!(second.sized.is_empty());
    assert!(provider.bet_attempts().is_empty());
    assert_eq!(orch.risk().peak_value(), dec!(1000));
}

#[tokio::test]
async fn test_order_cleanup_cancels_stale_orders() {
    let now = Utc::now().trunc_subsecs(0);
    let provider = MockProvider::new(vec![overpriced_multi("m1", now)], Portfolio::cash(dec!(1000)));
    let (mut orch, store) = setup(&provider, AppConfig::default()).await;
    orch.run_trading_cycle_at(now).await.unwrap();

    assert_eq!(orch.run_order_cleanup(Utc::now()).await.unwrap(), 0);

    let cancelled = orch
        .run_order_cleanup(Utc::now() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(cancelled, 2);
    let mut ids = provider.cancelled();
    ids.sort();
    assert_eq!(ids, vec!["mock-bet-1".to_string(), "mock-bet-2".to_string()]);
    assert!(store
        .stale_active_orders(Utc::now() + Duration::days(2))
        .await
        .unwrap()
        .is_empty());
}
