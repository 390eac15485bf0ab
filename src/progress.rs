//! Harvest progress reporting.
//!
//! Reports what `jh harvest` is doing page by page. Progress goes to
//! **stderr** so stdout keeps only the run summary.

use std::io::Write;

/// A single progress event for a harvest run.
#[derive(Clone, Debug, PartialEq)]
pub enum HarvestProgressEvent {
    /// Navigated to a results page; harvesting starts.
    PageStarted { page: u32, start: usize },
    /// A page finished and its batch was persisted.
    PageDone {
        page: u32,
        fetched: usize,
        inserted: usize,
        /// Unique records so far in this run.
        total: usize,
        target: usize,
    },
}

/// Receives progress events from the run coordinator.
pub trait HarvestProgressReporter: Send + Sync {
    fn report(&self, event: HarvestProgressEvent);
}

/// Human-friendly progress on stderr: "harvest page 2  57 / 100 jobs (+25 new)".
pub struct StderrProgress;

impl HarvestProgressReporter for StderrProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let line = match &event {
            HarvestProgressEvent::PageStarted { page, start } => {
                format!("harvest page {}  scrolling from offset {}...\n", page, start)
            }
            HarvestProgressEvent::PageDone {
                page,
                inserted,
                total,
                target,
                ..
            } => format!(
                "harvest page {}  {} / {} jobs (+{} new)\n",
                page,
                format_number(*total as u64),
                format_number(*target as u64),
                inserted
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl HarvestProgressReporter for JsonProgress {
    fn report(&self, event: HarvestProgressEvent) {
        let obj = match &event {
            HarvestProgressEvent::PageStarted { page, start } => serde_json::json!({
                "event": "progress",
                "phase": "page_started",
                "page": page,
                "start": start
            }),
            HarvestProgressEvent::PageDone {
                page,
                fetched,
                inserted,
                total,
                target,
            } => serde_json::json!({
                "event": "progress",
                "phase": "page_done",
                "page": page,
                "fetched": fetched,
                "inserted": inserted,
                "total": total,
                "target": target
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl HarvestProgressReporter for NoProgress {
    fn report(&self, _event: HarvestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn HarvestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
