//! Persistence layer.
//!
//! SQLite via `sqlx`: market catalog, append-only snapshot history, the
//! bet ledger, replay bets, bankroll history and resting limit orders.
//! Schema creation is idempotent and runs on every open.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::types::{AnswerState, MarketSnapshot, OutcomeKind, Portfolio, Side, SizedSignal};

const SCHEMA_VERSION: i64 = 1;

/// Timestamp format shared by every TEXT time column.
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS markets (
    id              TEXT PRIMARY KEY,
    question        TEXT NOT NULL,
    outcome_type    TEXT NOT NULL,
    mechanism       TEXT NOT NULL DEFAULT '',
    creator_id      TEXT NOT NULL DEFAULT '',
    url             TEXT NOT NULL DEFAULT '',
    created_time    INTEGER NOT NULL,
    close_time      INTEGER NOT NULL,
    is_resolved     INTEGER NOT NULL DEFAULT 0,
    resolution      TEXT,
    first_seen_at   TEXT NOT NULL DEFAULT (datetime('now')),
    last_updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS market_snapshots (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id       TEXT NOT NULL REFERENCES markets(id),
    snapshot_at     TEXT NOT NULL,
    probability     REAL NOT NULL,
    answers         TEXT NOT NULL DEFAULT '[]',
    pool_yes        REAL,
    pool_no         REAL,
    volume          REAL NOT NULL DEFAULT 0,
    volume_24h      REAL NOT NULL DEFAULT 0,
    total_liquidity REAL NOT NULL DEFAULT 0,
    close_time      INTEGER NOT NULL,
    is_resolved     INTEGER NOT NULL DEFAULT 0,
    resolution      TEXT
);
CREATE INDEX IF NOT EXISTS idx_snapshots_market_time ON market_snapshots(market_id, snapshot_at);
CREATE INDEX IF NOT EXISTS idx_snapshots_time ON market_snapshots(snapshot_at);

CREATE TABLE IF NOT EXISTS bot_bets (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    bet_id        TEXT,
    market_id     TEXT NOT NULL REFERENCES markets(id),
    answer_id     TEXT,
    strategy      TEXT NOT NULL,
    outcome       TEXT NOT NULL,
    amount        REAL NOT NULL,
    limit_prob    REAL,
    expected_prob REAL NOT NULL,
    market_prob   REAL NOT NULL,
    resolved      INTEGER NOT NULL DEFAULT 0,
    resolution    TEXT,
    pnl           REAL,
    placed_at     TEXT NOT NULL DEFAULT (datetime('now')),
    resolved_at   TEXT
);
CREATE INDEX IF NOT EXISTS idx_bets_market ON bot_bets(market_id, resolved);

CREATE TABLE IF NOT EXISTS replay_bets (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    replayed_at TEXT NOT NULL,
    market_id   TEXT NOT NULL,
    answer_id   TEXT,
    strategy    TEXT NOT NULL,
    outcome     TEXT NOT NULL,
    amount      REAL NOT NULL,
    confidence  REAL NOT NULL,
    market_prob REAL NOT NULL,
    limit_prob  REAL
);

CREATE TABLE IF NOT EXISTS bankroll_snapshots (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    balance     REAL NOT NULL,
    invested    REAL NOT NULL,
    total_value REAL NOT NULL,
    snapshot_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS active_orders (
    bet_id     TEXT PRIMARY KEY,
    market_id  TEXT NOT NULL,
    answer_id  TEXT,
    outcome    TEXT NOT NULL,
    amount     REAL NOT NULL,
    limit_prob REAL NOT NULL,
    placed_at  TEXT NOT NULL,
    is_active  INTEGER NOT NULL DEFAULT 1
);
"#;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the bet ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct BetRecord {
    pub bet_id: Option<String>,
    pub market_id: String,
    pub answer_id: Option<String>,
    pub strategy: String,
    pub outcome: Side,
    pub amount: Decimal,
    pub limit_prob: Option<f64>,
    /// The generator's confidence at bet time.
    pub expected_prob: f64,
    pub market_prob: f64,
}

impl BetRecord {
    pub fn from_sized(sized: &SizedSignal, bet_id: Option<String>, limit_prob: Option<f64>) -> Self {
        let s = &sized.signal;
        Self {
            bet_id,
            market_id: s.market_id.clone(),
            answer_id: s.answer_id.clone(),
            strategy: s.strategy.clone(),
            outcome: s.side,
            amount: sized.amount,
            limit_prob,
            expected_prob: s.confidence,
            market_prob: s.market_prob,
        }
    }
}

/// Ledger fields the performance report reads.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub strategy: String,
    pub amount: Decimal,
    pub resolved: bool,
    pub pnl: Option<Decimal>,
}

/// A resting limit order.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOrder {
    pub bet_id: String,
    pub market_id: String,
    pub answer_id: Option<String>,
    pub outcome: Side,
    pub amount: Decimal,
    pub limit_prob: f64,
    pub placed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {path}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(path, "Database ready");
        Ok(store)
    }

    /// Private in-memory database. A single long-lived connection keeps
    /// the data alive for the lifetime of the pool.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("Failed to apply schema")?;
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await
            .context("Failed to record schema version")?;
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<i64> {
        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    // -- Market catalog --------------------------------------------------

    /// Insert or refresh a market. Existing rows get their resolution
    /// state and close time updated.
    pub async fn upsert_market(&self, m: &MarketSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO markets (id, question, outcome_type, mechanism, creator_id, url,
                                 created_time, close_time, is_resolved, resolution)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                is_resolved = excluded.is_resolved,
                resolution = excluded.resolution,
                close_time = excluded.close_time,
                last_updated_at = datetime('now')
            "#,
        )
        .bind(&m.id)
        .bind(&m.question)
        .bind(m.outcome.as_str())
        .bind(&m.mechanism)
        .bind(&m.creator_id)
        .bind(&m.url)
        .bind(m.created_time.timestamp_millis())
        .bind(m.close_time.timestamp_millis())
        .bind(m.is_resolved)
        .bind(&m.resolution)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert market {}", m.id))?;
        Ok(())
    }

    /// Insert the market only if it is not already catalogued.
    pub async fn ensure_market_exists(&self, m: &MarketSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO markets (id, question, outcome_type, mechanism, creator_id, url,
                                           created_time, close_time, is_resolved, resolution)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&m.id)
        .bind(&m.question)
        .bind(m.outcome.as_str())
        .bind(&m.mechanism)
        .bind(&m.creator_id)
        .bind(&m.url)
        .bind(m.created_time.timestamp_millis())
        .bind(m.close_time.timestamp_millis())
        .bind(m.is_resolved)
        .bind(&m.resolution)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to catalogue market {}", m.id))?;
        Ok(())
    }

    // -- Snapshot history ------------------------------------------------

    /// Append one snapshot row for `m` at `at` (second precision).
    pub async fn insert_snapshot(&self, m: &MarketSnapshot, at: DateTime<Utc>) -> Result<()> {
        let answers = serde_json::to_string(&m.answers).context("Failed to encode answers")?;
        sqlx::query(
            r#"
            INSERT INTO market_snapshots (market_id, snapshot_at, probability, answers, pool_yes, pool_no,
                                          volume, volume_24h, total_liquidity, close_time, is_resolved, resolution)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&m.id)
        .bind(format_ts(at))
        .bind(m.probability)
        .bind(answers)
        .bind(m.pool_yes())
        .bind(m.pool_no())
        .bind(m.volume)
        .bind(m.volume_24h)
        .bind(m.total_liquidity)
        .bind(m.close_time.timestamp_millis())
        .bind(m.is_resolved)
        .bind(&m.resolution)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert snapshot for {}", m.id))?;
        Ok(())
    }

    /// Distinct snapshot times within `[from, to]`, ascending.
    pub async fn snapshot_times(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT snapshot_at FROM market_snapshots
            WHERE snapshot_at >= ? AND snapshot_at <= ?
            ORDER BY snapshot_at ASC
            "#,
        )
        .bind(format_ts(from))
        .bind(format_ts(to))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load snapshot times")?;

        rows.iter().map(|s| parse_ts(s)).collect()
    }

    /// Market set as recorded at `at`, in insertion order. Rows that no
    /// longer decode are logged and left out.
    pub async fn markets_at(&self, at: DateTime<Utc>) -> Result<Vec<MarketSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT m.id, m.question, m.outcome_type, m.mechanism, m.creator_id, m.url, m.created_time,
                   s.probability, s.answers, s.pool_yes, s.pool_no, s.volume, s.volume_24h,
                   s.total_liquidity, s.close_time, s.is_resolved, s.resolution
            FROM market_snapshots s
            JOIN markets m ON m.id = s.market_id
            WHERE s.snapshot_at = ?
            ORDER BY s.id ASC
            "#,
        )
        .bind(format_ts(at))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load snapshot markets")?;

        let mut markets = Vec::with_capacity(rows.len());
        for row in &rows {
            match snapshot_from_row(row) {
                Ok(m) => markets.push(m),
                Err(e) => {
                    let market_id: String = row.try_get("id").unwrap_or_default();
                    warn!(market_id = %market_id, at = %format_ts(at), error = %format!("{e:#}"), "Skipping unreadable snapshot row");
                }
            }
        }
        Ok(markets)
    }

    // -- Bet ledger ------------------------------------------------------

    pub async fn record_bet(&self, bet: &BetRecord) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO bot_bets (bet_id, market_id, answer_id, strategy, outcome, amount,
                                  limit_prob, expected_prob, market_prob)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bet.bet_id)
        .bind(&bet.market_id)
        .bind(&bet.answer_id)
        .bind(&bet.strategy)
        .bind(bet.outcome.as_str())
        .bind(bet.amount.to_f64().unwrap_or(0.0))
        .bind(bet.limit_prob)
        .bind(bet.expected_prob)
        .bind(bet.market_prob)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record bet on {}", bet.market_id))?;
        Ok(result.last_insert_rowid())
    }

    /// Sum of unresolved bet amounts per market.
    pub async fn unresolved_exposure_by_market(&self) -> Result<HashMap<String, Decimal>> {
        let rows = sqlx::query(
            "SELECT market_id, SUM(amount) AS exposure FROM bot_bets WHERE resolved = 0 GROUP BY market_id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load market exposure")?;

        rows.iter()
            .map(|row| {
                let market_id: String = row.try_get("market_id")?;
                let exposure: f64 = row.try_get("exposure")?;
                Ok((market_id, Decimal::from_f64(exposure).unwrap_or_default()))
            })
            .collect()
    }

    pub async fn ledger(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT strategy, amount, resolved, pnl FROM bot_bets ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load bet ledger")?;

        rows.iter()
            .map(|row| {
                let amount: f64 = row.try_get("amount")?;
                let pnl: Option<f64> = row.try_get("pnl")?;
                Ok(LedgerEntry {
                    strategy: row.try_get("strategy")?,
                    amount: Decimal::from_f64(amount).unwrap_or_default(),
                    resolved: row.try_get("resolved")?,
                    pnl: pnl.and_then(Decimal::from_f64),
                })
            })
            .collect()
    }

    /// Settle a ledger row. Settlement itself happens outside this engine.
    pub async fn mark_bet_resolved(&self, id: i64, resolution: &str, pnl: Decimal) -> Result<()> {
        sqlx::query(
            "UPDATE bot_bets SET resolved = 1, resolution = ?, pnl = ?, resolved_at = datetime('now') WHERE id = ?",
        )
        .bind(resolution)
        .bind(pnl.to_f64().unwrap_or(0.0))
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to resolve bet {id}"))?;
        Ok(())
    }

    // -- Replay bets -----------------------------------------------------

    pub async fn record_replay_bet(&self, at: DateTime<Utc>, sized: &SizedSignal) -> Result<()> {
        let s = &sized.signal;
        sqlx::query(
            r#"
            INSERT INTO replay_bets (replayed_at, market_id, answer_id, strategy, outcome, amount,
                                     confidence, market_prob, limit_prob)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(format_ts(at))
        .bind(&s.market_id)
        .bind(&s.answer_id)
        .bind(&s.strategy)
        .bind(s.side.as_str())
        .bind(sized.amount.to_f64().unwrap_or(0.0))
        .bind(s.confidence)
        .bind(s.market_prob)
        .bind(s.limit_prob)
        .execute(&self.pool)
        .await
        .context("Failed to record replay bet")?;
        Ok(())
    }

    pub async fn replay_bet_count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replay_bets")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    // -- Bankroll history ------------------------------------------------

    pub async fn snapshot_bankroll(&self, p: &Portfolio) -> Result<()> {
        sqlx::query("INSERT INTO bankroll_snapshots (balance, invested, total_value) VALUES (?, ?, ?)")
            .bind(p.balance.to_f64().unwrap_or(0.0))
            .bind(p.invested.to_f64().unwrap_or(0.0))
            .bind(p.total_value.to_f64().unwrap_or(0.0))
            .execute(&self.pool)
            .await
            .context("Failed to record bankroll snapshot")?;
        debug!(total = %p.total_value, "Bankroll snapshot recorded");
        Ok(())
    }

    /// Total portfolio value over time, oldest first.
    pub async fn bankroll_history(&self) -> Result<Vec<Decimal>> {
        let totals: Vec<f64> = sqlx::query_scalar("SELECT total_value FROM bankroll_snapshots ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load bankroll history")?;
        Ok(totals.into_iter().filter_map(Decimal::from_f64).collect())
    }

    // -- Active limit orders ---------------------------------------------

    pub async fn record_active_order(&self, order: &ActiveOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO active_orders (bet_id, market_id, answer_id, outcome, amount,
                                                  limit_prob, placed_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(&order.bet_id)
        .bind(&order.market_id)
        .bind(&order.answer_id)
        .bind(order.outcome.as_str())
        .bind(order.amount.to_f64().unwrap_or(0.0))
        .bind(order.limit_prob)
        .bind(format_ts(order.placed_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to record active order {}", order.bet_id))?;
        Ok(())
    }

    /// Active orders placed before `cutoff`.
    pub async fn stale_active_orders(&self, cutoff: DateTime<Utc>) -> Result<Vec<ActiveOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT bet_id, market_id, answer_id, outcome, amount, limit_prob, placed_at
            FROM active_orders
            WHERE is_active = 1 AND placed_at < ?
            ORDER BY placed_at
            "#,
        )
        .bind(format_ts(cutoff))
        .fetch_all(&self.pool)
        .await
        .context("Failed to load active orders")?;

        rows.iter()
            .map(|row| {
                let outcome: String = row.try_get("outcome")?;
                let amount: f64 = row.try_get("amount")?;
                let placed_at: String = row.try_get("placed_at")?;
                Ok(ActiveOrder {
                    bet_id: row.try_get("bet_id")?,
                    market_id: row.try_get("market_id")?,
                    answer_id: row.try_get("answer_id")?,
                    outcome: if outcome == "NO" { Side::No } else { Side::Yes },
                    amount: Decimal::from_f64(amount).unwrap_or_default(),
                    limit_prob: row.try_get("limit_prob")?,
                    placed_at: parse_ts(&placed_at)?,
                })
            })
            .collect()
    }

    pub async fn deactivate_order(&self, bet_id: &str) -> Result<()> {
        sqlx::query("UPDATE active_orders SET is_active = 0 WHERE bet_id = ?")
            .bind(bet_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to deactivate order {bet_id}"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.format(TS_FORMAT).to_string()
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .with_context(|| format!("Invalid timestamp: {s}"))?;
    Ok(naive.and_utc())
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn snapshot_from_row(row: &SqliteRow) -> Result<MarketSnapshot> {
    let outcome: String = row.try_get("outcome_type")?;
    let answers: String = row.try_get("answers")?;
    let answers: Vec<AnswerState> =
        serde_json::from_str(&answers).context("Failed to decode snapshot answers")?;

    let mut pool = BTreeMap::new();
    if let Some(yes) = row.try_get::<Option<f64>, _>("pool_yes")? {
        pool.insert("YES".to_string(), yes);
    }
    if let Some(no) = row.try_get::<Option<f64>, _>("pool_no")? {
        pool.insert("NO".to_string(), no);
    }

    Ok(MarketSnapshot {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        outcome: OutcomeKind::from_tag(&outcome),
        probability: row.try_get("probability")?,
        answers,
        volume: row.try_get("volume")?,
        volume_24h: row.try_get("volume_24h")?,
        total_liquidity: row.try_get("total_liquidity")?,
        pool,
        created_time: ms_to_datetime(row.try_get("created_time")?),
        close_time: ms_to_datetime(row.try_get("close_time")?),
        is_resolved: row.try_get("is_resolved")?,
        resolution: row.try_get("resolution")?,
        creator_id: row.try_get("creator_id")?,
        mechanism: row.try_get("mechanism")?,
        url: row.try_get("url")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
