//! Incremental list harvesting.
//!
//! The result list is virtualized: there is no upfront total, and items
//! appear only as the list is scrolled. [`harvest`] therefore runs
//! observe → extract → scroll passes until one of three things happens:
//!
//! - `target_count` records have been collected,
//! - a pass sees no more visible items than the previous one (the list is
//!   exhausted), or
//! - the observer fails fatally, or never renders anything at all.
//!
//! Every pass re-extracts **all** currently visible handles, not only the
//! new ones. Handles are page-relative and positions shift after a scroll,
//! so tracking "new" handles would miss items. Re-visited items are
//! dropped by natural key here and absorbed by `upsert_ignore` in the
//! store.
//!
//! ```text
//!   ┌────────────┐  empty   ┌──────────┐ past bound
//!   │ observe    │────────▶ │ backoff  │──────────▶ Stalled
//!   └─────┬──────┘ ◀────────└──────────┘
//!         ▼
//!   ┌────────────┐  per-item failure: log + skip
//!   │ extract all│  session failure:  Aborted
//!   └─────┬──────┘
//!         ▼
//!   no growth? ──yes──▶ Exhausted
//!         │no
//!         ▼
//!   scroll last handle, jittered pause, next pass
//! ```

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::ItemRecord;
use crate::observe::{ExtractError, FieldExtractor, PageObserver};

/// Bounded retry for "nothing rendered yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of observations before giving up. Values below 1 act as 1.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Randomized pause between passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    /// Uniform sample in `[min, max]`. An inverted range yields `min`.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1500),
            max: Duration::from_millis(3000),
        }
    }
}

/// Knobs for one [`harvest`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    pub target_count: usize,
    pub empty_retry: RetryPolicy,
    pub pass_delay: DelayRange,
    /// Extraction attempts per item within a pass. Values below 1 act as 1.
    pub item_attempts: u32,
}

impl HarvestOptions {
    pub fn new(target_count: usize) -> Self {
        Self {
            target_count,
            empty_retry: RetryPolicy::default(),
            pass_delay: DelayRange::default(),
            item_attempts: 2,
        }
    }
}

/// Why a successful harvest stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarvestEnd {
    TargetReached,
    /// The visible count stopped growing before the target was met.
    Exhausted,
}

/// A completed harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    /// Unique by natural key, in first-seen order, at most `target_count` long.
    pub records: Vec<ItemRecord>,
    pub passes: u32,
    /// Item extractions abandoned after all attempts failed.
    pub skipped: u32,
    pub end: HarvestEnd,
}

/// A harvest that could not finish. Both variants carry what was collected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarvestError {
    #[error("no items rendered after {attempts} observations ({} records collected)", .partial.len())]
    Stalled {
        attempts: u32,
        partial: Vec<ItemRecord>,
    },
    #[error("harvest aborted: {reason} ({} records collected)", .partial.len())]
    Aborted {
        reason: String,
        partial: Vec<ItemRecord>,
    },
}

impl HarvestError {
    pub fn partial(&self) -> &[ItemRecord] {
        match self {
            HarvestError::Stalled { partial, .. } | HarvestError::Aborted { partial, .. } => {
                partial
            }
        }
    }

    pub fn into_partial(self) -> Vec<ItemRecord> {
        match self {
            HarvestError::Stalled { partial, .. } | HarvestError::Aborted { partial, .. } => {
                partial
            }
        }
    }
}

enum HandleWait<H> {
    Ready(Vec<H>),
    Stalled(u32),
    Fatal(String),
}

enum ItemOutcome {
    Record(ItemRecord),
    Skipped(String),
    Fatal(String),
}

/// Harvest up to `options.target_count` records from `observer`.
///
/// Not resumable: to continue after an error, call again from a fresh
/// observer position.
pub async fn harvest<O, E>(
    observer: &O,
    extractor: &E,
    options: &HarvestOptions,
) -> Result<Harvest, HarvestError>
where
    O: PageObserver + ?Sized,
    E: FieldExtractor<O> + ?Sized,
{
    let target = options.target_count;
    let mut collected: Vec<ItemRecord> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut previous_visible = 0usize;
    let mut passes = 0u32;
    let mut skipped = 0u32;

    loop {
        if collected.len() >= target {
            return Ok(finish(collected, passes, skipped, HarvestEnd::TargetReached));
        }

        let handles = match wait_for_handles(observer, options.empty_retry).await {
            HandleWait::Ready(h) => h,
            HandleWait::Stalled(attempts) => {
                warn!(attempts, collected = collected.len(), "no items rendered; giving up");
                return Err(HarvestError::Stalled {
                    attempts,
                    partial: collected,
                });
            }
            HandleWait::Fatal(reason) => {
                return Err(HarvestError::Aborted {
                    reason,
                    partial: collected,
                })
            }
        };
        passes += 1;
        let visible = handles.len();
        debug!(pass = passes, visible, collected = collected.len(), "harvest pass");

        for (idx, handle) in handles.iter().enumerate() {
            if collected.len() >= target {
                break;
            }
            match extract_item(observer, extractor, handle, options.item_attempts).await {
                ItemOutcome::Record(record) => {
                    if seen.insert(record.natural_key.clone()) {
                        if record.is_partial() {
                            debug!(key = %record.natural_key, missing = ?record.missing_fields, "partial record");
                        }
                        collected.push(record);
                    }
                }
                ItemOutcome::Skipped(reason) => {
                    skipped += 1;
                    warn!(pass = passes, item = idx + 1, %reason, "skipping item");
                }
                ItemOutcome::Fatal(reason) => {
                    return Err(HarvestError::Aborted {
                        reason,
                        partial: collected,
                    });
                }
            }
        }

        if collected.len() >= target {
            return Ok(finish(collected, passes, skipped, HarvestEnd::TargetReached));
        }

        if visible == previous_visible {
            info!(visible, collected = collected.len(), "no new items loaded; list exhausted");
            return Ok(finish(collected, passes, skipped, HarvestEnd::Exhausted));
        }
        previous_visible = visible;

        if let Some(last) = handles.last() {
            if let Err(e) = observer.scroll_into_view(last).await {
                if e.is_fatal() {
                    return Err(HarvestError::Aborted {
                        reason: e.to_string(),
                        partial: collected,
                    });
                }
                warn!(error = %e, "could not scroll last item into view");
            }
        }
        observer.wait(options.pass_delay.sample()).await;
    }
}

fn finish(records: Vec<ItemRecord>, passes: u32, skipped: u32, end: HarvestEnd) -> Harvest {
    Harvest {
        records,
        passes,
        skipped,
        end,
    }
}

async fn wait_for_handles<O>(observer: &O, policy: RetryPolicy) -> HandleWait<O::Handle>
where
    O: PageObserver + ?Sized,
{
    let max = policy.max_attempts.max(1);
    let mut attempts = 0u32;
    loop {
        match observer.current_handles().await {
            Ok(h) if !h.is_empty() => return HandleWait::Ready(h),
            Ok(_) => {}
            Err(e) if e.is_fatal() => return HandleWait::Fatal(e.to_string()),
            Err(e) => debug!(error = %e, "observation failed; treating as not rendered"),
        }
        attempts += 1;
        if attempts >= max {
            return HandleWait::Stalled(attempts);
        }
        debug!(attempt = attempts, "no items rendered yet; waiting");
        observer.wait(policy.backoff).await;
    }
}

async fn extract_item<O, E>(observer: &O, extractor: &E, handle: &O::Handle, attempts: u32) -> ItemOutcome
where
    O: PageObserver + ?Sized,
    E: FieldExtractor<O> + ?Sized,
{
    let max = attempts.max(1);
    let mut last = String::new();
    for attempt in 1..=max {
        match extractor.extract(observer, handle).await {
            Ok(record) => return ItemOutcome::Record(record),
            Err(ExtractError::Session(reason)) => return ItemOutcome::Fatal(reason),
            Err(ExtractError::Item(reason)) => {
                if attempt < max {
                    debug!(attempt, %reason, "retrying item");
                }
                last = reason;
            }
        }
    }
    ItemOutcome::Skipped(last)
}
