//! Storage abstraction for harvested records.
//!
//! The [`RecordStore`] trait defines the keyed-table operations a run and
//! the inspection CLI need, so the harvest pipeline can write to SQLite in
//! production and to [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync`, and must serialize concurrent
//! writers: two runs sharing a store may both call
//! [`upsert_ignore`](RecordStore::upsert_ignore) at once.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ItemRecord, TableName};

/// Effect of one [`RecordStore::upsert_ignore`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A row with the same key already existed; nothing was written.
    Ignored,
}

/// Rows read back from a table, as display strings. `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Result of a read-only table query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Found(TableRows),
    /// The table does not exist.
    NotFound,
}

/// Abstract keyed-table store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_table`](RecordStore::ensure_table) | Create a job table if absent |
/// | [`upsert_ignore`](RecordStore::upsert_ignore) | Insert by key, first write wins |
/// | [`list_tables`](RecordStore::list_tables) | Names of all user tables |
/// | [`query`](RecordStore::query) | Bounded read-only fetch |
/// | [`purge`](RecordStore::purge) | Drop a table, idempotently |
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create `table` with the job column layout if it does not exist.
    async fn ensure_table(&self, table: &TableName) -> Result<()>;

    /// Insert `record` keyed by its natural key. An existing row with the
    /// same key is left untouched.
    async fn upsert_ignore(&self, table: &TableName, record: &ItemRecord) -> Result<UpsertOutcome>;

    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Fetch at most `limit` rows. Never mutates state.
    async fn query(&self, table: &TableName, limit: usize) -> Result<QueryResult>;

    /// Drop `table` and all its rows. Dropping a missing table is a no-op.
    async fn purge(&self, table: &TableName) -> Result<()>;
}
