//! In-memory [`RecordStore`] implementation for tests.
//!
//! Tables are `BTreeMap`s of rows behind one `std::sync::RwLock`, which
//! also gives the single-writer guarantee the trait asks for.

use std::collections::{BTreeMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Local;

use crate::models::{ItemRecord, TableName, JOB_COLUMNS};

use super::{QueryResult, RecordStore, TableRows, UpsertOutcome};

#[derive(Default)]
struct Table {
    keys: HashSet<String>,
    rows: Vec<[String; 7]>,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of rows in `table`, or `None` if it does not exist.
    pub fn row_count(&self, table: &TableName) -> Option<usize> {
        let tables = self.tables.read().unwrap();
        tables.get(table.as_str()).map(|t| t.rows.len())
    }

    /// All rows of `table` in insertion order.
    pub fn rows(&self, table: &TableName) -> Vec<[String; 7]> {
        let tables = self.tables.read().unwrap();
        tables
            .get(table.as_str())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn ensure_table(&self, table: &TableName) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.entry(table.as_str().to_string()).or_default();
        Ok(())
    }

    async fn upsert_ignore(&self, table: &TableName, record: &ItemRecord) -> Result<UpsertOutcome> {
        let mut tables = self.tables.write().unwrap();
        let Some(t) = tables.get_mut(table.as_str()) else {
            bail!("no such table: {}", table);
        };
        if !t.keys.insert(record.natural_key.clone()) {
            return Ok(UpsertOutcome::Ignored);
        }
        t.rows.push(record.row_values(Local::now().naive_local()));
        Ok(UpsertOutcome::Inserted)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.keys().cloned().collect())
    }

    async fn query(&self, table: &TableName, limit: usize) -> Result<QueryResult> {
        let tables = self.tables.read().unwrap();
        let Some(t) = tables.get(table.as_str()) else {
            return Ok(QueryResult::NotFound);
        };
        Ok(QueryResult::Found(TableRows {
            columns: JOB_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: t
                .rows
                .iter()
                .take(limit)
                .map(|r| r.iter().cloned().map(Some).collect())
                .collect(),
        }))
    }

    async fn purge(&self, table: &TableName) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        tables.remove(table.as_str());
        Ok(())
    }
}
