//! Persistent header index over SQLite
//!
//! One database per newsgroup (`<group>.sqlite`). Writes are idempotent:
//! `INSERT OR IGNORE` on the `(group_name, article_num)` unique key, so
//! re-fetching a range is a no-op. All writes go through a single writer
//! (the fetch orchestrator drains completed chunks into [`upsert_batch`]
//! from one task); readers may run concurrently.
//!
//! [`upsert_batch`]: HeaderStore::upsert_batch

use crate::error::Result;
use crate::overview::OverviewRow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Bind variables per row in the articles table
const BINDS_PER_ROW: usize = 10;

/// SQLite's default bind-variable cap is 999; stay safely under it
const MAX_ROWS_PER_INSERT: usize = 900 / BINDS_PER_ROW;

/// Result of one batch upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Rows newly inserted
    pub inserted: u64,
    /// Rows ignored because `(group_name, article_num)` already existed
    pub ignored: u64,
}

impl UpsertStats {
    /// Fold another batch's stats into this one
    pub fn merge(&mut self, other: UpsertStats) {
        self.inserted += other.inserted;
        self.ignored += other.ignored;
    }
}

/// Filter options for [`HeaderStore::query`]
///
/// Only `group_name` is required; with no other option set, the full group
/// is returned in ascending `article_num` order.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Newsgroup to query (required)
    pub group_name: String,
    /// Case-insensitive subject substring
    pub subject_like: Option<String>,
    /// Excluded subject substrings, `|`-separated alternatives
    pub not_subject: Option<String>,
    /// Case-insensitive From substring
    pub from_like: Option<String>,
    /// Inclusive lower bound on `date_unix`
    pub date_from_unix: Option<i64>,
    /// Inclusive upper bound on `date_unix`
    pub date_to_unix: Option<i64>,
    /// Row cap
    pub limit: Option<u32>,
}

impl QueryFilter {
    /// Filter matching everything in a group
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            group_name: name.into(),
            ..Default::default()
        }
    }

    /// Require a case-insensitive subject substring
    pub fn subject_like(mut self, term: impl Into<String>) -> Self {
        self.subject_like = Some(term.into());
        self
    }

    /// Exclude subjects containing any `|`-separated term
    pub fn not_subject(mut self, term: impl Into<String>) -> Self {
        self.not_subject = Some(term.into());
        self
    }

    /// Require a case-insensitive From substring
    pub fn from_like(mut self, term: impl Into<String>) -> Self {
        self.from_like = Some(term.into());
        self
    }

    /// Bound rows to an inclusive `date_unix` range
    pub fn date_range(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.date_from_unix = from;
        self.date_to_unix = to;
        self
    }

    /// Cap the number of rows returned
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Escape a user term for use inside a `LIKE ... ESCAPE '\'` pattern
fn like_contains(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// SQLite-backed header store
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct HeaderStore {
    pool: SqlitePool,
}

impl HeaderStore {
    /// Open (creating if missing) the store at `path` and ensure the schema
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("cache_size", "-64000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store (tests and dry runs)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection: each :memory: connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Database path for a newsgroup under `base_dir`
    pub fn db_path_for(base_dir: &Path, group: &str) -> PathBuf {
        base_dir.join(format!("{group}.sqlite"))
    }

    /// Create tables and indexes if absent; idempotent
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                article_num  INTEGER NOT NULL,
                group_name   TEXT NOT NULL,
                subject      TEXT NOT NULL DEFAULT '',
                from_addr    TEXT NOT NULL DEFAULT '',
                date_raw     TEXT NOT NULL DEFAULT '',
                date_unix    INTEGER,
                message_id   TEXT NOT NULL,
                bytes_len    INTEGER,
                line_count   INTEGER,
                xref         TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (group_name, article_num)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_subject ON articles(group_name, subject)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_from ON articles(group_name, from_addr)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_date ON articles(group_name, date_unix)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert rows with conflict-ignore semantics inside one transaction
    ///
    /// Statements are chunked to stay under SQLite's bind-variable limit.
    /// Returns how many rows were newly inserted vs ignored as duplicates.
    pub async fn upsert_batch(&self, rows: &[OverviewRow]) -> Result<UpsertStats> {
        if rows.is_empty() {
            return Ok(UpsertStats::default());
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(MAX_ROWS_PER_INSERT) {
            let mut qb = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (article_num, group_name, subject, from_addr, \
                 date_raw, date_unix, message_id, bytes_len, line_count, xref) ",
            );

            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.article_num as i64)
                    .push_bind(&row.group_name)
                    .push_bind(&row.subject)
                    .push_bind(&row.from_addr)
                    .push_bind(&row.date_raw)
                    .push_bind(row.date_unix)
                    .push_bind(&row.message_id)
                    .push_bind(row.bytes_len.map(|b| b as i64))
                    .push_bind(row.line_count.map(i64::from))
                    .push_bind(&row.xref);
            });

            let result = qb.build().execute(&mut *tx).await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        let stats = UpsertStats {
            inserted,
            ignored: rows.len() as u64 - inserted,
        };
        debug!(
            "Upserted {} rows ({} inserted, {} ignored)",
            rows.len(),
            stats.inserted,
            stats.ignored
        );
        Ok(stats)
    }

    /// Query rows matching a filter, ordered by ascending `article_num`
    pub async fn query(&self, filter: &QueryFilter) -> Result<Vec<OverviewRow>> {
        let mut qb = QueryBuilder::new(
            "SELECT article_num, group_name, subject, from_addr, date_raw, date_unix, \
             message_id, bytes_len, line_count, xref FROM articles WHERE group_name = ",
        );
        qb.push_bind(&filter.group_name);

        if let Some(term) = &filter.subject_like {
            qb.push(" AND subject LIKE ")
                .push_bind(like_contains(term))
                .push(" ESCAPE '\\'");
        }
        if let Some(terms) = &filter.not_subject {
            for term in terms.split('|').map(str::trim).filter(|t| !t.is_empty()) {
                qb.push(" AND subject NOT LIKE ")
                    .push_bind(like_contains(term))
                    .push(" ESCAPE '\\'");
            }
        }
        if let Some(term) = &filter.from_like {
            qb.push(" AND from_addr LIKE ")
                .push_bind(like_contains(term))
                .push(" ESCAPE '\\'");
        }
        if let Some(from) = filter.date_from_unix {
            qb.push(" AND date_unix IS NOT NULL AND date_unix >= ")
                .push_bind(from);
        }
        if let Some(to) = filter.date_to_unix {
            qb.push(" AND date_unix IS NOT NULL AND date_unix <= ")
                .push_bind(to);
        }

        qb.push(" ORDER BY article_num ASC");

        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }

        let db_rows = qb.build().fetch_all(&self.pool).await?;

        let mut rows = Vec::with_capacity(db_rows.len());
        for r in db_rows {
            rows.push(OverviewRow {
                article_num: r.try_get::<i64, _>("article_num")? as u64,
                group_name: r.try_get("group_name")?,
                subject: r.try_get("subject")?,
                from_addr: r.try_get("from_addr")?,
                date_raw: r.try_get("date_raw")?,
                date_unix: r.try_get("date_unix")?,
                message_id: r.try_get("message_id")?,
                bytes_len: r.try_get::<Option<i64>, _>("bytes_len")?.map(|b| b as u64),
                line_count: r.try_get::<Option<i64>, _>("line_count")?.map(|l| l as u32),
                xref: r.try_get("xref")?,
            });
        }
        Ok(rows)
    }

    /// Number of rows indexed for a group
    pub async fn count(&self, group: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE group_name = ?")
            .bind(group)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Lowest and highest article numbers indexed for a group, if any
    ///
    /// Drivers use this to resume: fetch forward from the local high mark
    /// and back-fill below the local low mark.
    pub async fn local_bounds(&self, group: &str) -> Result<Option<(u64, u64)>> {
        let row = sqlx::query(
            "SELECT MIN(article_num) AS low, MAX(article_num) AS high \
             FROM articles WHERE group_name = ?",
        )
        .bind(group)
        .fetch_one(&self.pool)
        .await?;

        let low: Option<i64> = row.try_get("low")?;
        let high: Option<i64> = row.try_get("high")?;
        match (low, high) {
            (Some(low), Some(high)) => Ok(Some((low as u64, high as u64))),
            _ => Ok(None),
        }
    }

    /// Close the underlying pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
