//! SQLite-backed [`RecordStore`].
//!
//! One database file holds any number of job tables, each with the
//! [`JOB_COLUMNS`] layout and `job_id` as primary key. Table names come
//! from operators and search terms, so they are always emitted as quoted
//! identifiers and never interpolated raw.
//!
//! The pool runs in WAL mode, which lets readers proceed during a write.
//! Writers still go through [`SqliteStore::write_lock`] so only one write
//! transaction is open at a time even when several tasks share the store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info};

use job_harvest_core::models::{ItemRecord, TableName, JOB_COLUMNS};
use job_harvest_core::store::{QueryResult, RecordStore, TableRows, UpsertOutcome};

use crate::config::Config;

pub struct SqliteStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteStore {
    /// Open the store configured in `[db]`.
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.db.path).await
    }

    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        debug!(path = %path.display(), "opened store");
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn table_exists(&self, table: &TableName) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    /// Every row of `table`, for export.
    pub async fn dump(&self, table: &TableName) -> Result<QueryResult> {
        self.select(table, None).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn select(&self, table: &TableName, limit: Option<usize>) -> Result<QueryResult> {
        if !self.table_exists(table).await? {
            return Ok(QueryResult::NotFound);
        }

        // LIMIT -1 is SQLite's "no limit".
        let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
        let sql = format!("SELECT * FROM {} LIMIT ?", quote_ident(table.as_str()));
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.column_names(table).await?,
        };
        let rows = rows.iter().map(decode_row).collect();
        Ok(QueryResult::Found(TableRows { columns, rows }))
    }

    async fn column_names(&self, table: &TableName) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table.as_str()));
        let info = sqlx::query(&sql).fetch_all(&self.pool).await?;
        info.iter()
            .map(|r| r.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }
}

/// Quote `name` as an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render every cell as display text. Tables created elsewhere may hold
/// non-text columns.
fn decode_row(row: &SqliteRow) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| {
            if let Ok(v) = row.try_get::<Option<String>, _>(i) {
                return v;
            }
            if let Ok(v) = row.try_get::<Option<i64>, _>(i) {
                return v.map(|n| n.to_string());
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(i) {
                return v.map(|n| n.to_string());
            }
            if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(i) {
                return v.map(|b| format!("<{} bytes>", b.len()));
            }
            None
        })
        .collect()
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn ensure_table(&self, table: &TableName) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                job_id TEXT PRIMARY KEY,
                url TEXT,
                job_title TEXT,
                company_name TEXT,
                job_description TEXT,
                scraped_date TEXT,
                scraped_timestamp TEXT
            )",
            quote_ident(table.as_str())
        );
        let _guard = self.write_lock.lock().await;
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create table {}", table))?;
        Ok(())
    }

    async fn upsert_ignore(&self, table: &TableName, record: &ItemRecord) -> Result<UpsertOutcome> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(job_id) DO NOTHING",
            quote_ident(table.as_str()),
            JOB_COLUMNS.join(", ")
        );
        let values = record.row_values(Local::now().naive_local());

        let _guard = self.write_lock.lock().await;
        let mut query = sqlx::query(&sql);
        for v in values {
            query = query.bind(v);
        }
        let result = query.execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            Ok(UpsertOutcome::Ignored)
        } else {
            Ok(UpsertOutcome::Inserted)
        }
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let names: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().map(|(n,)| n).collect())
    }

    async fn query(&self, table: &TableName, limit: usize) -> Result<QueryResult> {
        self.select(table, Some(limit)).await
    }

    async fn purge(&self, table: &TableName) -> Result<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(table.as_str()));
        let _guard = self.write_lock.lock().await;
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(%table, "purged table");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("data/jobs.db"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn record(key: &str, title: &str) -> ItemRecord {
        let mut r = ItemRecord::new(key, format!("https://www.linkedin.com/jobs/view/{}/", key))
            .with_title(title)
            .with_attributor("Acme")
            .with_body("Line one\nLine two");
        r.harvested_at = NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(8, 5, 9);
        r
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("jobs"), "\"jobs\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_ident("x; DROP TABLE y"), "\"x; DROP TABLE y\"");
    }

    #[tokio::test]
    async fn upsert_is_first_write_wins() {
        let (_tmp, store) = store().await;
        let t = TableName::parse("linkedin_jobs_pm_us").unwrap();
        store.ensure_table(&t).await.unwrap();
        store.ensure_table(&t).await.unwrap();

        assert_eq!(
            store.upsert_ignore(&t, &record("1", "First")).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(
            store.upsert_ignore(&t, &record("1", "Second")).await.unwrap(),
            UpsertOutcome::Ignored
        );

        let QueryResult::Found(rows) = store.query(&t, 5).await.unwrap() else {
            panic!("table should exist");
        };
        assert_eq!(rows.columns, JOB_COLUMNS.to_vec());
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(rows.rows[0][2].as_deref(), Some("First"));
        assert_eq!(rows.rows[0][5].as_deref(), Some("2025-06-14"));
        assert_eq!(rows.rows[0][6].as_deref(), Some("2025-06-14 08:05:09"));
    }

    #[tokio::test]
    async fn query_respects_limit_and_missing_tables() {
        let (_tmp, store) = store().await;
        let t = TableName::parse("t").unwrap();
        store.ensure_table(&t).await.unwrap();
        for i in 0..8 {
            store
                .upsert_ignore(&t, &record(&i.to_string(), "x"))
                .await
                .unwrap();
        }
        let QueryResult::Found(rows) = store.query(&t, 3).await.unwrap() else {
            panic!("table should exist");
        };
        assert_eq!(rows.rows.len(), 3);

        let QueryResult::Found(all) = store.dump(&t).await.unwrap() else {
            panic!("table should exist");
        };
        assert_eq!(all.rows.len(), 8);

        let missing = TableName::parse("nope").unwrap();
        assert_eq!(store.query(&missing, 5).await.unwrap(), QueryResult::NotFound);
    }

    #[tokio::test]
    async fn empty_table_still_reports_columns() {
        let (_tmp, store) = store().await;
        let t = TableName::parse("empty").unwrap();
        store.ensure_table(&t).await.unwrap();
        let QueryResult::Found(rows) = store.query(&t, 5).await.unwrap() else {
            panic!("table should exist");
        };
        assert!(rows.rows.is_empty());
        assert_eq!(rows.columns.len(), 7);
    }

    #[tokio::test]
    async fn awkward_table_names_round_trip() {
        let (_tmp, store) = store().await;
        let t = TableName::parse("jobs \"quoted\" name").unwrap();
        store.ensure_table(&t).await.unwrap();
        store.upsert_ignore(&t, &record("9", "x")).await.unwrap();
        assert!(store.list_tables().await.unwrap().contains(&t.to_string()));
        store.purge(&t).await.unwrap();
        assert!(!store.table_exists(&t).await.unwrap());
    }

    #[tokio::test]
    async fn purge_is_idempotent_and_listing_skips_internals() {
        let (_tmp, store) = store().await;
        let a = TableName::parse("a").unwrap();
        let b = TableName::parse("b").unwrap();
        store.ensure_table(&b).await.unwrap();
        store.ensure_table(&a).await.unwrap();
        assert_eq!(store.list_tables().await.unwrap(), vec!["a", "b"]);

        store.purge(&a).await.unwrap();
        store.purge(&a).await.unwrap();
        assert_eq!(store.list_tables().await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_duplicate() {
        let (_tmp, store) = store().await;
        let store = std::sync::Arc::new(store);
        let t = TableName::parse("race").unwrap();
        store.ensure_table(&t).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            let t = t.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..10 {
                    store
                        .upsert_ignore(&t, &record(&i.to_string(), "x"))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let QueryResult::Found(rows) = store.dump(&t).await.unwrap() else {
            panic!("table should exist");
        };
        assert_eq!(rows.rows.len(), 10);
    }
}
