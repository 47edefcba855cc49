//! Orchestration loop.
//!
//! Four independent timers (trading, collection, performance report and
//! order cleanup) plus a shutdown future, multiplexed in one `select!`.
//! A cycle body always runs to completion before the loop waits again,
//! so cycles never overlap. Ticks missed while a slow cycle runs are
//! skipped rather than queued.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use super::collector::Collector;
use super::executor::Executor;
use super::performance::PerformanceReport;
use crate::config::AppConfig;
use crate::market::scanner::DEFAULT_SCAN_LIMIT;
use crate::market::{Scanner, SnapshotCache};
use crate::platforms::MarketProvider;
use crate::risk::RiskManager;
use crate::storage::Store;
use crate::strategy::StrategySet;
use crate::types::{MarketSnapshot, Portfolio, SizedSignal};

/// Outcome of one trading cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub binary_markets: usize,
    pub multi_markets: usize,
    /// Signals that passed risk sizing, in execution order.
    pub sized: Vec<SizedSignal>,
    pub executed: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    cfg: AppConfig,
    provider: Arc<dyn MarketProvider>,
    scanner: Scanner,
    cache: Arc<SnapshotCache>,
    strategies: StrategySet,
    risk: RiskManager,
    executor: Executor,
    collector: Collector,
    store: Store,
    cycle_count: u64,
}

impl Orchestrator {
    pub fn new(cfg: AppConfig, provider: Arc<dyn MarketProvider>, store: Store) -> Self {
        let cache = Arc::new(SnapshotCache::new(ChronoDuration::seconds(
            cfg.schedule.cache_ttl_secs as i64,
        )));
        Self {
            scanner: Scanner::new(provider.clone()),
            strategies: StrategySet::from_config(&cfg.strategy),
            risk: RiskManager::new(cfg.risk.clone(), Portfolio::default()),
            executor: Executor::new(provider.clone(), store.clone(), cfg.general.dry_run),
            collector: Collector::new(cfg.collector.clone()),
            cache,
            provider,
            store,
            cfg,
            cycle_count: 0,
        }
    }

    /// Shared handle to the latest scanned markets.
    pub fn cache(&self) -> Arc<SnapshotCache> {
        self.cache.clone()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    /// Run until `shutdown` resolves. Shutdown is only observed between
    /// cycles.
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let sched = self.cfg.schedule.clone();
        info!(
            scan_secs = sched.scan_interval_secs,
            snapshot_secs = sched.snapshot_interval_secs,
            performance_secs = sched.performance_interval_secs,
            order_cleanup_secs = sched.order_cleanup_interval_secs,
            strategies = ?self.strategies.enabled_names(),
            dry_run = self.cfg.general.dry_run,
            "Orchestrator starting"
        );

        // A portfolio we cannot read at startup is fatal.
        let portfolio = self
            .provider
            .get_portfolio()
            .await
            .context("Initial portfolio refresh failed")?;
        self.risk.refresh(portfolio);
        self.snapshot_bankroll().await;

        // First trading and collection cycles run immediately.
        self.trading_tick().await;
        self.collection_tick().await;

        let mut scan = ticker(sched.scan_interval());
        let mut snapshot = ticker(sched.snapshot_interval());
        let mut performance = ticker(sched.performance_interval());
        let mut cleanup = ticker(sched.order_cleanup_interval());

        tokio::pin!(shutdown);
        info!("Entering main loop. Press Ctrl+C to stop.");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = scan.tick() => self.trading_tick().await,
                _ = snapshot.tick() => self.collection_tick().await,
                _ = performance.tick() => self.performance_tick().await,
                _ = cleanup.tick() => self.cleanup_tick().await,
            }
        }

        info!(
            cycles = self.cycle_count,
            total = format!("M{:.0}", self.risk.portfolio().total_value),
            "Orchestrator stopped"
        );
        Ok(())
    }

    async fn trading_tick(&mut self) {
        match self.run_trading_cycle().await {
            Ok(report) => info!(
                cycle = report.cycle,
                binary = report.binary_markets,
                multi = report.multi_markets,
                sized = report.sized.len(),
                executed = report.executed,
                failed = report.failed,
                "Trading cycle complete"
            ),
            Err(e) => error!(error = %format!("{e:#}"), "Trading cycle failed, continuing to next"),
        }
    }

    async fn collection_tick(&mut self) {
        if let Err(e) = self.collector.collect(&self.scanner, &self.store).await {
            error!(error = %format!("{e:#}"), "Collection failed");
        }
    }

    async fn performance_tick(&mut self) {
        match PerformanceReport::generate(&self.store).await {
            Ok(report) => report.log(),
            Err(e) => error!(error = %format!("{e:#}"), "Performance report failed"),
        }
    }

    async fn cleanup_tick(&mut self) {
        if let Err(e) = self.run_order_cleanup(Utc::now()).await {
            error!(error = %format!("{e:#}"), "Order cleanup failed");
        }
    }

    /// Cancel resting limit orders that have outlived
    /// `schedule.order_max_age_secs` as of `now`.
    pub async fn run_order_cleanup(&self, now: DateTime<Utc>) -> Result<usize> {
        let max_age = ChronoDuration::seconds(self.cfg.schedule.order_max_age_secs as i64);
        self.executor.cancel_stale_orders(max_age, now).await
    }

    /// One trading cycle evaluated at the current time.
    pub async fn run_trading_cycle(&mut self) -> Result<CycleReport> {
        self.run_trading_cycle_at(Utc::now()).await
    }

    /// One trading cycle evaluated as of `as_of`.
    pub async fn run_trading_cycle_at(&mut self, as_of: DateTime<Utc>) -> Result<CycleReport> {
        self.cycle_count += 1;
        let mut report = CycleReport {
            cycle: self.cycle_count,
            ..CycleReport::default()
        };
        info!(cycle = report.cycle, "Starting trading cycle");

        let portfolio = self
            .provider
            .get_portfolio()
            .await
            .context("Portfolio refresh failed")?;
        self.risk.refresh(portfolio);

        let exposure = self
            .store
            .unresolved_exposure_by_market()
            .await
            .context("Failed to load market exposure")?;
        if !exposure.is_empty() {
            info!(markets = exposure.len(), "Loaded per-market exposure");
        }
        self.risk.set_market_exposure(exposure);

        let binary = self
            .scanner
            .scan_binary(DEFAULT_SCAN_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %format!("{e:#}"), "Binary scan failed");
                Vec::new()
            });
        let multi = self
            .scanner
            .scan_multiple_choice(DEFAULT_SCAN_LIMIT)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %format!("{e:#}"), "Multiple-choice scan failed");
                Vec::new()
            });
        report.binary_markets = binary.len();
        report.multi_markets = multi.len();

        let mut markets = binary;
        markets.extend(multi);
        self.cache.set_all(&markets);
        self.cache.evict_expired();

        report.sized = super::decide(&self.strategies, &mut self.risk, &markets, as_of);

        if !report.sized.is_empty() {
            let by_id: HashMap<&str, &MarketSnapshot> =
                markets.iter().map(|m| (m.id.as_str(), m)).collect();
            for s in &report.sized {
                if let Some(m) = by_id.get(s.signal.market_id.as_str()) {
                    if let Err(e) = self.store.ensure_market_exists(m).await {
                        warn!(market_id = %m.id, error = %e, "Failed to catalogue market");
                    }
                }
            }

            let execution = self.executor.execute_batch(&report.sized).await;
            for (s, _) in &execution.executed {
                self.risk.record_trade(&s.signal.market_id, s.amount);
            }
            report.executed = execution.executed.len();
            report.failed = execution.failed.len();
        } else {
            info!("No trading signals this cycle");
        }

        self.snapshot_bankroll().await;
        Ok(report)
    }

    async fn snapshot_bankroll(&self) {
        if let Err(e) = self.store.snapshot_bankroll(self.risk.portfolio()).await {
            error!(error = %e, "Bankroll snapshot failed");
        }
    }
}

/// Periodic timer whose first tick is one full period away; the first
/// cycles run eagerly before the loop starts.
fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
