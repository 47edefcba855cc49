//! Snapshot collection.
//!
//! Periodically records every sufficiently liquid open market into the
//! catalog and appends one history row per market. The replay driver
//! reads these rows back.

use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, warn};

use crate::config::CollectorConfig;
use crate::market::Scanner;
use crate::storage::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionReport {
    pub scanned: usize,
    pub upserted: usize,
    pub snapshotted: usize,
}

pub struct Collector {
    cfg: CollectorConfig,
}

impl Collector {
    pub fn new(cfg: CollectorConfig) -> Self {
        Self { cfg }
    }

    /// Run one collection cycle stamped with the current time.
    pub async fn collect(&self, scanner: &Scanner, store: &Store) -> Result<CollectionReport> {
        self.collect_at(scanner, store, Utc::now()).await
    }

    /// Run one collection cycle. Every row written shares `at`, truncated
    /// to whole seconds to match the stored precision.
    pub async fn collect_at(
        &self,
        scanner: &Scanner,
        store: &Store,
        at: DateTime<Utc>,
    ) -> Result<CollectionReport> {
        let at = at.trunc_subsecs(0);
        let markets = scanner
            .scan_all(self.cfg.max_markets_per_scan)
            .await
            .context("Collection scan failed")?;

        let mut report = CollectionReport {
            scanned: markets.len(),
            ..CollectionReport::default()
        };

        for m in markets.iter().filter(|m| m.total_liquidity >= self.cfg.min_liquidity) {
            if let Err(e) = store.upsert_market(m).await {
                warn!(market_id = %m.id, error = %e, "Failed to upsert market");
                continue;
            }
            report.upserted += 1;

            if let Err(e) = store.insert_snapshot(m, at).await {
                warn!(market_id = %m.id, error = %e, "Failed to snapshot market");
                continue;
            }
            report.snapshotted += 1;
        }

        info!(
            scanned = report.scanned,
            upserted = report.upserted,
            snapshotted = report.snapshotted,
            "Collection complete"
        );
        Ok(report)
    }
}
