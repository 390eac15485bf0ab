//! Persistence half of a harvest run.
//!
//! [`harvest_and_persist`] runs one [`harvest`] against a page and writes
//! whatever it produced, including the partial batch of a stalled or
//! aborted harvest, before reporting the outcome. Session bootstrap,
//! search navigation and pagination live in the binary crate.

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, warn};

use crate::harvest::{harvest, Harvest, HarvestError, HarvestOptions};
use crate::models::{ItemRecord, TableName};
use crate::observe::{FieldExtractor, PageObserver};
use crate::store::{RecordStore, UpsertOutcome};

/// A record the store refused to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    pub key: String,
    pub error: String,
}

/// Outcome of persisting one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub inserted: usize,
    /// Rows skipped because the key was already stored.
    pub ignored: usize,
    pub failed: Vec<FailedWrite>,
}

impl PersistReport {
    pub fn merge(&mut self, other: PersistReport) {
        self.inserted += other.inserted;
        self.ignored += other.ignored;
        self.failed.extend(other.failed);
    }

    pub fn attempted(&self) -> usize {
        self.inserted + self.ignored + self.failed.len()
    }
}

/// Write `records` into `table`, stamping each with `harvested_at`.
///
/// Every upsert is its own atomic write, so a failure leaves rows already
/// committed intact; failed keys are collected instead of aborting.
pub async fn persist_batch<S>(
    store: &S,
    table: &TableName,
    records: &[ItemRecord],
    harvested_at: NaiveDateTime,
) -> PersistReport
where
    S: RecordStore + ?Sized,
{
    let mut report = PersistReport::default();
    for record in records {
        let mut stamped = record.clone();
        stamped.harvested_at = Some(harvested_at);
        match store.upsert_ignore(table, &stamped).await {
            Ok(UpsertOutcome::Inserted) => report.inserted += 1,
            Ok(UpsertOutcome::Ignored) => {
                debug!(key = %record.natural_key, "already stored");
                report.ignored += 1;
            }
            Err(e) => {
                warn!(key = %record.natural_key, %table, error = %e, "store write failed");
                report.failed.push(FailedWrite {
                    key: record.natural_key.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    report
}

/// One harvested and persisted page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRun {
    pub harvest: Harvest,
    pub persisted: PersistReport,
}

/// A page whose harvest failed after its partial batch was persisted.
#[derive(Debug, Error)]
#[error("{cause}")]
pub struct RunError {
    #[source]
    pub cause: HarvestError,
    pub persisted: PersistReport,
}

/// Harvest `observer` and persist the result into `table`.
///
/// `clock` is read once, after the harvest returns, so every row of the
/// batch carries its persistence time.
pub async fn harvest_and_persist<O, E, S, C>(
    observer: &O,
    extractor: &E,
    store: &S,
    table: &TableName,
    options: &HarvestOptions,
    clock: &C,
) -> Result<PageRun, RunError>
where
    O: PageObserver + ?Sized,
    E: FieldExtractor<O> + ?Sized,
    S: RecordStore + ?Sized,
    C: Fn() -> NaiveDateTime + ?Sized,
{
    let outcome = harvest(observer, extractor, options).await;
    let harvested_at = clock();
    match outcome {
        Ok(h) => {
            let persisted = persist_batch(store, table, &h.records, harvested_at).await;
            Ok(PageRun {
                harvest: h,
                persisted,
            })
        }
        Err(cause) => {
            let persisted = persist_batch(store, table, cause.partial(), harvested_at).await;
            Err(RunError { cause, persisted })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    /// Rejects one key, otherwise behaves like the in-memory store.
    struct FlakyStore {
        inner: InMemoryStore,
        poisoned_key: String,
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn ensure_table(&self, table: &TableName) -> Result<()> {
            self.inner.ensure_table(table).await
        }
        async fn upsert_ignore(&self, table: &TableName, record: &ItemRecord) -> Result<UpsertOutcome> {
            if record.natural_key == self.poisoned_key {
                anyhow::bail!("database is locked");
            }
            self.inner.upsert_ignore(table, record).await
        }
        async fn list_tables(&self) -> Result<Vec<String>> {
            self.inner.list_tables().await
        }
        async fn query(&self, table: &TableName, limit: usize) -> Result<crate::store::QueryResult> {
            self.inner.query(table, limit).await
        }
        async fn purge(&self, table: &TableName) -> Result<()> {
            self.inner.purge(table).await
        }
    }

    #[tokio::test]
    async fn persist_stamps_and_counts() {
        let store = InMemoryStore::new();
        let table = TableName::parse("t").unwrap();
        store.ensure_table(&table).await.unwrap();
        let batch = vec![ItemRecord::new("a", "u"), ItemRecord::new("b", "u")];

        let first = persist_batch(&store, &table, &batch, stamp()).await;
        assert_eq!((first.inserted, first.ignored), (2, 0));
        let again = persist_batch(&store, &table, &batch, stamp()).await;
        assert_eq!((again.inserted, again.ignored), (0, 2));
        assert_eq!(store.rows(&table)[0][6], "2025-06-14 12:00:00");
    }

    #[tokio::test]
    async fn failed_writes_are_enumerated_and_do_not_stop_the_batch() {
        let store = FlakyStore {
            inner: InMemoryStore::new(),
            poisoned_key: "b".into(),
        };
        let table = TableName::parse("t").unwrap();
        store.ensure_table(&table).await.unwrap();
        let batch = vec![
            ItemRecord::new("a", "u"),
            ItemRecord::new("b", "u"),
            ItemRecord::new("c", "u"),
        ];
        let report = persist_batch(&store, &table, &batch, stamp()).await;
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "b");
        assert!(report.failed[0].error.contains("locked"));
        assert_eq!(report.attempted(), 3);
    }

    #[test]
    fn merge_accumulates() {
        let mut a = PersistReport {
            inserted: 1,
            ignored: 2,
            failed: vec![],
        };
        a.merge(PersistReport {
            inserted: 3,
            ignored: 0,
            failed: vec![FailedWrite {
                key: "k".into(),
                error: "e".into(),
            }],
        });
        assert_eq!((a.inserted, a.ignored, a.failed.len()), (4, 2, 1));
    }
}
