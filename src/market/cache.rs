//! TTL-bounded snapshot cache.
//!
//! Holds the latest snapshot per market. Bulk writes happen under a
//! single write lock so readers never observe a half-applied refresh.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::MarketSnapshot;

struct CacheEntry {
    market: MarketSnapshot,
    fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at <= ttl
    }
}

/// Latest snapshot per market id.
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached snapshot, if present and not older than the TTL.
    pub fn get(&self, id: &str) -> Option<MarketSnapshot> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<MarketSnapshot> {
        let entries = self.entries.read();
        entries
            .get(id)
            .filter(|e| e.is_fresh(now, self.ttl))
            .map(|e| e.market.clone())
    }

    /// Store every market with one shared fetch timestamp. Entries for
    /// markets not in `markets` are left to expire.
    pub fn set_all(&self, markets: &[MarketSnapshot]) {
        self.set_all_at(markets, Utc::now());
    }

    pub fn set_all_at(&self, markets: &[MarketSnapshot], fetched_at: DateTime<Utc>) {
        let mut entries = self.entries.write();
        for m in markets {
            entries.insert(
                m.id.clone(),
                CacheEntry {
                    market: m.clone(),
                    fetched_at,
                },
            );
        }
    }

    /// All fresh snapshots, ordered by market id.
    pub fn all(&self) -> Vec<MarketSnapshot> {
        self.all_at(Utc::now())
    }

    pub fn all_at(&self, now: DateTime<Utc>) -> Vec<MarketSnapshot> {
        let entries = self.entries.read();
        let mut fresh: Vec<MarketSnapshot> = entries
            .values()
            .filter(|e| e.is_fresh(now, self.ttl))
            .map(|e| e.market.clone())
            .collect();
        fresh.sort_by(|a, b| a.id.cmp(&b.id));
        fresh
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now, self.ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
