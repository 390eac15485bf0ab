//! `jh harvest`: one end-to-end harvest run.
//!
//! ```text
//! SearchRequest ─▶ TableName ─▶ ensure_table
//!        │
//!        ▼
//! launch session ─▶ page 1 (start=0) ─▶ harvest + persist ─┐
//!                   page 2 (start=N) ─▶ harvest + persist ─┤ until target,
//!                   ...                                    │ no new records,
//!                                                          │ or max_pages
//! close session ◀──────────────────────────────────────────┘
//!        │
//!        ▼
//!     summary
//! ```
//!
//! Records are stamped with `harvested_at` when their page is persisted,
//! so stamps never decrease across the pages of a run. Partial batches of
//! a failed page are persisted before the failure is reported.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use std::collections::HashSet;
use tracing::{info, warn};
use url::Url;

use job_harvest_core::coordinator::{harvest_and_persist, PersistReport};
use job_harvest_core::harvest::{HarvestError, HarvestOptions};
use job_harvest_core::models::TableName;
use job_harvest_core::observe::{FieldExtractor, PageObserver};
use job_harvest_core::store::RecordStore;

use crate::browser::BrowserSession;
use crate::cdp::{CdpExtractor, CdpObserver};
use crate::config::{Config, SearchOverrides};
use crate::progress::{HarvestProgressEvent, HarvestProgressReporter};
use crate::search::{page_url, search_url};
use crate::sqlite_store::SqliteStore;

/// Loads a results page into the document the observer watches.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<()>;
}

#[async_trait]
impl Navigator for CdpObserver {
    async fn navigate(&self, url: &str) -> Result<()> {
        self.page()
            .goto(url)
            .await
            .map_err(|e| anyhow!("Navigation to {} failed: {}", url, e))?;
        Ok(())
    }
}

/// Why pagination stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    TargetReached,
    /// A page produced nothing not already seen in this run.
    NoNewRecords,
    PageLimit,
    Failed(String),
}

/// What pagination produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Pagination {
    pub pages: u32,
    /// Records extracted across all pages, including repeats between pages.
    pub fetched: usize,
    /// Distinct natural keys seen in this run.
    pub unique: usize,
    pub persisted: PersistReport,
    pub end: RunEnd,
}

/// Static inputs of [`paginate`].
pub struct PageLoop<'a> {
    pub search: &'a Url,
    pub table: &'a TableName,
    pub target: usize,
    /// Per-page options; `target_count` is replaced with what remains.
    pub options: HarvestOptions,
    pub max_pages: u32,
    /// Read once per page, after its harvest returns.
    pub clock: &'a (dyn Fn() -> NaiveDateTime + Send + Sync),
}

/// Wall-clock persistence stamp.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Walk result pages until the target is met, a page yields nothing new,
/// or `max_pages` pages were harvested. Never returns an error: failures
/// end the loop with [`RunEnd::Failed`] after the partial batch is stored.
pub async fn paginate<N, O, E, S>(
    nav: &N,
    observer: &O,
    extractor: &E,
    store: &S,
    plan: &PageLoop<'_>,
    progress: &dyn HarvestProgressReporter,
) -> Pagination
where
    N: Navigator + ?Sized,
    O: PageObserver + ?Sized,
    E: FieldExtractor<O> + ?Sized,
    S: RecordStore + ?Sized,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Pagination {
        pages: 0,
        fetched: 0,
        unique: 0,
        persisted: PersistReport::default(),
        end: RunEnd::PageLimit,
    };

    while out.pages < plan.max_pages {
        if seen.len() >= plan.target {
            out.end = RunEnd::TargetReached;
            break;
        }
        let page_no = out.pages + 1;
        let start = seen.len();
        let url = page_url(plan.search, start);
        if let Err(e) = nav.navigate(url.as_str()).await {
            out.end = RunEnd::Failed(format!("{:#}", e));
            break;
        }
        progress.report(HarvestProgressEvent::PageStarted {
            page: page_no,
            start,
        });

        let mut options = plan.options.clone();
        options.target_count = plan.target - seen.len();

        let (records, persisted, failure) = match harvest_and_persist(
            observer,
            extractor,
            store,
            plan.table,
            &options,
            plan.clock,
        )
        .await
        {
            Ok(run) => (run.harvest.records, run.persisted, None),
            Err(err) => {
                let persisted = err.persisted;
                let cause = err.cause;
                let stalled_late = matches!(cause, HarvestError::Stalled { .. }) && page_no > 1;
                let reason = cause.to_string();
                let records = cause.into_partial();
                if stalled_late {
                    // Offsets past the last result render an empty list.
                    warn!(page = page_no, %reason, "results page rendered nothing; stopping");
                    (records, persisted, Some(RunEnd::NoNewRecords))
                } else {
                    (records, persisted, Some(RunEnd::Failed(reason)))
                }
            }
        };

        out.pages = page_no;
        out.fetched += records.len();
        let new = records
            .iter()
            .filter(|r| seen.insert(r.natural_key.clone()))
            .count();
        let inserted = persisted.inserted;
        out.persisted.merge(persisted);
        out.unique = seen.len();
        info!(page = page_no, fetched = records.len(), new, inserted, total = out.unique, "page done");
        progress.report(HarvestProgressEvent::PageDone {
            page: page_no,
            fetched: records.len(),
            inserted,
            total: out.unique,
            target: plan.target,
        });

        if let Some(end) = failure {
            out.end = end;
            break;
        }
        if seen.len() >= plan.target {
            out.end = RunEnd::TargetReached;
            break;
        }
        if new == 0 {
            out.end = RunEnd::NoNewRecords;
            break;
        }
    }
    out
}

/// Outcome of `jh harvest`.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub table: TableName,
    pub pagination: Pagination,
}

impl RunSummary {
    pub fn print(&self) {
        let p = &self.pagination;
        println!("harvest {}", self.table);
        println!("  run: {}", self.run_id);
        println!("  pages: {}", p.pages);
        println!("  fetched: {} jobs ({} unique)", p.fetched, p.unique);
        println!("  inserted: {}", p.persisted.inserted);
        println!("  duplicates: {}", p.persisted.ignored);
        println!("  failed: {}", p.persisted.failed.len());
        for f in &p.persisted.failed {
            println!("    {}: {}", f.key, f.error);
        }
        match &p.end {
            RunEnd::TargetReached => println!("ok"),
            RunEnd::NoNewRecords => println!("ok (no more results)"),
            RunEnd::PageLimit => println!("ok (page limit reached)"),
            RunEnd::Failed(reason) => println!("failed: {}", reason),
        }
    }
}

/// Run `jh harvest` end to end.
pub async fn run_harvest(
    config: &Config,
    overrides: &SearchOverrides,
    progress: &dyn HarvestProgressReporter,
) -> Result<RunSummary> {
    let request = config.search_request(overrides)?;
    let started = local_now();
    let table = TableName::for_request(&request, config.search.table_naming, started);
    let run_id = uuid::Uuid::new_v4().to_string();
    let search = search_url(&config.site.search_url, &request)?;
    info!(
        run_id = %run_id,
        %table,
        query = request.query(),
        location = request.location(),
        target = request.target_count(),
        recency = %request.recency(),
        "starting harvest"
    );

    let store = SqliteStore::connect(config).await?;
    store.ensure_table(&table).await?;

    let session = BrowserSession::launch(&config.browser).await?;
    let observer = CdpObserver::new(session.page().clone(), config.site.card_selector.clone());
    let extractor = CdpExtractor::new(&config.site, &config.harvest);
    let plan = PageLoop {
        search: &search,
        table: &table,
        target: request.target_count(),
        options: config.harvest.options(request.target_count()),
        max_pages: config.search.max_pages,
        clock: &local_now,
    };

    let pagination = paginate(&observer, &observer, &extractor, &store, &plan, progress).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }
    store.close().await;

    let summary = RunSummary {
        run_id,
        table,
        pagination,
    };
    summary.print();
    if let RunEnd::Failed(reason) = &summary.pagination.end {
        anyhow::bail!(
            "harvest failed after persisting {} records: {}",
            summary.pagination.persisted.inserted,
            reason
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use job_harvest_core::harvest::{DelayRange, RetryPolicy};
    use job_harvest_core::models::ItemRecord;
    use job_harvest_core::observe::{ExtractError, ObserverError};
    use job_harvest_core::store::memory::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::progress::NoProgress;

    /// Results pages keyed by `start` offset. The observer shows whichever
    /// page was last navigated to.
    struct FakeSite {
        pages: HashMap<usize, Vec<String>>,
        current: Mutex<Vec<String>>,
        visited: Mutex<Vec<String>>,
        fail_navigation: bool,
    }

    impl FakeSite {
        fn new(pages: Vec<(usize, Vec<&str>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(s, keys)| (s, keys.into_iter().map(String::from).collect()))
                    .collect(),
                current: Mutex::new(Vec::new()),
                visited: Mutex::new(Vec::new()),
                fail_navigation: false,
            }
        }
    }

    #[async_trait]
    impl Navigator for FakeSite {
        async fn navigate(&self, url: &str) -> Result<()> {
            if self.fail_navigation {
                anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
            }
            self.visited.lock().unwrap().push(url.to_string());
            let parsed = Url::parse(url)?;
            let start = parsed
                .query_pairs()
                .find(|(k, _)| k == "start")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(0);
            *self.current.lock().unwrap() = self.pages.get(&start).cloned().unwrap_or_default();
            Ok(())
        }
    }

    #[async_trait]
    impl PageObserver for FakeSite {
        type Handle = String;

        async fn current_handles(&self) -> Result<Vec<String>, ObserverError> {
            Ok(self.current.lock().unwrap().clone())
        }
        async fn scroll_into_view(&self, _h: &String) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn click(&self, _h: &String, _t: Duration) -> Result<(), ObserverError> {
            Ok(())
        }
        async fn current_location(&self) -> Result<String, ObserverError> {
            Ok(String::new())
        }
        async fn wait(&self, _d: Duration) {}
    }

    struct KeyExtractor;

    #[async_trait]
    impl FieldExtractor<FakeSite> for KeyExtractor {
        async fn extract(&self, _o: &FakeSite, h: &String) -> Result<ItemRecord, ExtractError> {
            if h == "DEAD" {
                return Err(ExtractError::Session("target closed".into()));
            }
            Ok(ItemRecord::new(h.clone(), format!("https://jobs.test/view/{}/", h)))
        }
    }

    fn options() -> HarvestOptions {
        HarvestOptions {
            target_count: 0,
            empty_retry: RetryPolicy {
                max_attempts: 2,
                backoff: Duration::ZERO,
            },
            pass_delay: DelayRange::fixed(Duration::ZERO),
            item_attempts: 1,
        }
    }

    fn stamp() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2025, 6, 14)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap()
    }

    async fn run(site: &FakeSite, store: &InMemoryStore, target: usize, max_pages: u32) -> Pagination {
        let search = Url::parse("https://jobs.test/search?keywords=rust").unwrap();
        let table = TableName::parse("t").unwrap();
        store.ensure_table(&table).await.unwrap();
        let plan = PageLoop {
            search: &search,
            table: &table,
            target,
            options: options(),
            max_pages,
            clock: &stamp,
        };
        paginate(site, site, &KeyExtractor, store, &plan, &NoProgress).await
    }

    #[tokio::test]
    async fn pages_until_target() {
        let site = FakeSite::new(vec![(0, vec!["a", "b", "c"]), (3, vec!["d", "e", "f"])]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 5, 10).await;

        assert_eq!(p.end, RunEnd::TargetReached);
        assert_eq!(p.pages, 2);
        assert_eq!(p.unique, 5);
        assert_eq!(p.persisted.inserted, 5);
        let visited = site.visited.lock().unwrap();
        assert_eq!(visited[0], "https://jobs.test/search?keywords=rust");
        assert_eq!(visited[1], "https://jobs.test/search?keywords=rust&start=3");
    }

    #[tokio::test]
    async fn overlapping_page_with_nothing_new_stops() {
        let site = FakeSite::new(vec![(0, vec!["a", "b"]), (2, vec!["a", "b"])]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 10).await;

        assert_eq!(p.end, RunEnd::NoNewRecords);
        assert_eq!(p.pages, 2);
        assert_eq!(p.fetched, 4);
        assert_eq!(p.unique, 2);
        assert_eq!(p.persisted.ignored, 2);
    }

    #[tokio::test]
    async fn empty_later_page_ends_quietly() {
        let site = FakeSite::new(vec![(0, vec!["a", "b"])]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 10).await;
        assert_eq!(p.end, RunEnd::NoNewRecords);
        assert_eq!(p.unique, 2);
    }

    #[tokio::test]
    async fn empty_first_page_fails() {
        let site = FakeSite::new(vec![]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 10).await;
        assert!(matches!(p.end, RunEnd::Failed(_)));
        assert_eq!(p.pages, 1);
    }

    #[tokio::test]
    async fn page_limit_is_honored() {
        let site = FakeSite::new(vec![(0, vec!["a"]), (1, vec!["b"]), (2, vec!["c"])]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 2).await;
        assert_eq!(p.end, RunEnd::PageLimit);
        assert_eq!(p.unique, 2);
    }

    #[tokio::test]
    async fn session_loss_persists_partial_then_fails() {
        let site = FakeSite::new(vec![(0, vec!["a", "b", "DEAD", "c"])]);
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 10).await;
        assert!(matches!(&p.end, RunEnd::Failed(r) if r.contains("target closed")));
        assert_eq!(p.persisted.inserted, 2);
        assert_eq!(store.row_count(&TableName::parse("t").unwrap()), Some(2));
    }

    #[tokio::test]
    async fn navigation_failure_fails_the_run() {
        let mut site = FakeSite::new(vec![(0, vec!["a"])]);
        site.fail_navigation = true;
        let store = InMemoryStore::new();
        let p = run(&site, &store, 10, 10).await;
        assert!(matches!(&p.end, RunEnd::Failed(r) if r.contains("ERR_NAME_NOT_RESOLVED")));
        assert_eq!(p.pages, 0);
    }

    /// Advances a shared minute counter on every extraction.
    struct TickingExtractor {
        minutes: Arc<AtomicI64>,
    }

    #[async_trait]
    impl FieldExtractor<FakeSite> for TickingExtractor {
        async fn extract(&self, _o: &FakeSite, h: &String) -> Result<ItemRecord, ExtractError> {
            self.minutes.fetch_add(1, Ordering::SeqCst);
            Ok(ItemRecord::new(h.clone(), format!("https://jobs.test/view/{}/", h)))
        }
    }

    #[tokio::test]
    async fn rows_are_stamped_after_their_page_is_harvested() {
        let site = FakeSite::new(vec![(0, vec!["a", "b"]), (2, vec!["c", "d"])]);
        let store = InMemoryStore::new();
        let table = TableName::parse("t").unwrap();
        store.ensure_table(&table).await.unwrap();
        let search = Url::parse("https://jobs.test/search?keywords=rust").unwrap();

        let minutes = Arc::new(AtomicI64::new(0));
        let extractor = TickingExtractor {
            minutes: minutes.clone(),
        };
        let clock_minutes = minutes.clone();
        let clock = move || stamp() + chrono::Duration::minutes(clock_minutes.load(Ordering::SeqCst));
        let plan = PageLoop {
            search: &search,
            table: &table,
            target: 4,
            options: options(),
            max_pages: 10,
            clock: &clock,
        };
        let p = paginate(&site, &site, &extractor, &store, &plan, &NoProgress).await;
        assert_eq!(p.end, RunEnd::TargetReached);

        let stamps: Vec<(String, String)> = store
            .rows(&table)
            .into_iter()
            .map(|row| (row[0].clone(), row[6].clone()))
            .collect();
        let at = |key: &str| {
            stamps
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, ts)| ts.clone())
                .unwrap()
        };
        // Page one finished after two extractions, page two after four.
        assert_eq!(at("a"), "2025-06-14 07:02:00");
        assert_eq!(at("b"), "2025-06-14 07:02:00");
        assert_eq!(at("c"), "2025-06-14 07:04:00");
        assert_eq!(at("d"), "2025-06-14 07:04:00");
        assert!(at("a") > stamp().format("%Y-%m-%d %H:%M:%S").to_string());
    }
}
