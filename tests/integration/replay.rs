//! Collection → replay round trip, and live/replay decision equivalence.

use chrono::{Duration, SubsecRound, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;

use sibyl::backtest::ReplayDriver;
use sibyl::config::AppConfig;
use sibyl::engine::{Collector, Orchestrator};
use sibyl::market::Scanner;
use sibyl::storage::Store;
use sibyl::strategy::StrategySet;
use sibyl::types::{MarketSnapshot, Portfolio};

use crate::mock_provider::*;

/// Every strategy enabled. The lower edge floor lets extreme-confirmation
/// signals through sizing.
fn all_strategies() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.general.dry_run = true;
    cfg.risk.min_edge = 0.01;
    cfg.strategy.mispricing.enabled = true;
    cfg.strategy.timedecay.enabled = true;
    cfg.strategy.marketmaking.enabled = true;
    cfg
}

fn market_set(now: chrono::DateTime<Utc>) -> Vec<MarketSnapshot> {
    // Deep mid-range market: market-making legs carry no Kelly edge and
    // are dropped by sizing on both paths
    let mut deep = binary("deep", "Will the index close higher?", 0.50, now);
    deep.total_liquidity = 2500.0;

    // Deadline question three quarters through its life
    let mut deadline = binary("deadline", "Will the bridge reopen by end of 2027?", 0.30, now);
    deadline.created_time = now - Duration::days(60);
    deadline.close_time = now + Duration::days(20);

    // Extreme, mature market
    let extreme = binary("extreme", "Will the sun rise tomorrow?", 0.955, now);

    vec![deep, deadline, extreme, overpriced_multi("multi", now)]
}

#[tokio::test]
async fn test_replay_matches_live_decisions() {
    let now = Utc::now().trunc_subsecs(0);
    let cfg = all_strategies();
    let provider = MockProvider::new(market_set(now), Portfolio::cash(dec!(2300)));

    // Live: one trading cycle against a fresh ledger
    let live_store = Store::in_memory().await.unwrap();
    let mut orch = Orchestrator::new(cfg.clone(), Arc::new(provider.clone()), live_store);
    let live = orch.run_trading_cycle_at(now).await.unwrap();

    // Replay: collect the same markets, then replay that snapshot
    let history = Store::in_memory().await.unwrap();
    let scanner = Scanner::new(Arc::new(provider.clone()));
    let collected = Collector::new(cfg.collector.clone())
        .collect_at(&scanner, &history, now)
        .await
        .unwrap();
    assert_eq!(collected.snapshotted, 4);

    let driver = ReplayDriver::new(
        history.clone(),
        StrategySet::from_config(&cfg.strategy),
        cfg.risk.clone(),
    );
    let replay = driver
        .run(now - Duration::days(1), now + Duration::days(1), dec!(2300))
        .await
        .unwrap();

    assert_eq!(replay.snapshots, 1);
    assert_eq!(replay.decisions[0].0, now);
    assert!(!live.sized.is_empty());
    assert_eq!(replay.decisions[0].1, live.sized);

    assert_eq!(live.sized.len(), 4);
    for name in ["arbitrage", "timedecay", "mispricing"] {
        assert!(
            live.sized.iter().any(|s| s.signal.strategy == name),
            "no {name} decision"
        );
    }

    // Replay bets stay out of the live ledger
    assert_eq!(history.replay_bet_count().await.unwrap(), live.sized.len() as i64);
    assert!(history.unresolved_exposure_by_market().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_of_lite_search_results_finds_arbitrage() {
    let now = Utc::now().trunc_subsecs(0);
    let cfg = AppConfig::default();
    // Search omits answers; only enrichment can supply them
    let provider = MockProvider::new(vec![overpriced_multi("multi", now)], Portfolio::cash(dec!(1000)));

    let history = Store::in_memory().await.unwrap();
    let scanner = Scanner::new(Arc::new(provider));
    Collector::new(cfg.collector.clone())
        .collect_at(&scanner, &history, now)
        .await
        .unwrap();

    let stored = history.markets_at(now).await.unwrap();
    assert_eq!(stored[0].answers.len(), 3);

    let replay = ReplayDriver::new(
        history.clone(),
        StrategySet::from_config(&cfg.strategy),
        cfg.risk.clone(),
    )
    .run(now - Duration::hours(1), now + Duration::hours(1), dec!(1000))
    .await
    .unwrap();

    let decided = &replay.decisions[0].1;
    assert_eq!(decided.len(), 2);
    assert!(decided.iter().all(|s| s.signal.strategy == "arbitrage"));
}

#[tokio::test]
async fn test_collected_snapshots_round_trip() {
    let now = Utc::now().trunc_subsecs(0);
    let markets = market_set(now);
    let provider = MockProvider::new(markets.clone(), Portfolio::cash(dec!(1000)));
    let store = Store::in_memory().await.unwrap();
    let scanner = Scanner::new(Arc::new(provider));

    let collector = Collector::new(AppConfig::default().collector);
    collector.collect_at(&scanner, &store, now).await.unwrap();
    collector
        .collect_at(&scanner, &store, now + Duration::minutes(15))
        .await
        .unwrap();

    let times = store
        .snapshot_times(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(times, vec![now, now + Duration::minutes(15)]);
    assert_eq!(store.markets_at(now).await.unwrap(), markets);
}
