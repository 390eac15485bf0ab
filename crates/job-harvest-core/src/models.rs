//! Core data models shared by the harvester, the stores, and the CLI.
//!
//! An [`ItemRecord`] is one harvested job posting. A [`SearchRequest`] is
//! the immutable configuration of one run, and a [`TableName`] is the
//! deterministic name of the table a run writes into.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Column layout of every job table, in storage order.
///
/// Existing stores depend on these names and on `job_id` being the key.
pub const JOB_COLUMNS: [&str; 7] = [
    "job_id",
    "url",
    "job_title",
    "company_name",
    "job_description",
    "scraped_date",
    "scraped_timestamp",
];

/// Prefix shared by every table this tool creates.
pub const TABLE_PREFIX: &str = "linkedin_jobs";

/// A field of an [`ItemRecord`] that extraction can fail to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    /// The identifier parameter was absent; the raw locator became the key.
    NaturalKey,
    Title,
    Attributor,
    Body,
}

impl RecordField {
    /// Storage column backing this field.
    pub fn column(&self) -> &'static str {
        match self {
            RecordField::NaturalKey => "job_id",
            RecordField::Title => "job_title",
            RecordField::Attributor => "company_name",
            RecordField::Body => "job_description",
        }
    }
}

/// One harvested job posting.
///
/// Optional text fields use the empty string as the "unknown" sentinel.
/// Fields that extraction could not find are additionally listed in
/// `missing_fields`, so a partial record is still a valid record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub natural_key: String,
    pub location: String,
    pub title: String,
    pub attributor: String,
    pub body: String,
    /// Stamped by the run coordinator at persistence time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvested_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<RecordField>,
}

impl ItemRecord {
    pub fn new(natural_key: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            natural_key: natural_key.into(),
            location: location.into(),
            title: String::new(),
            attributor: String::new(),
            body: String::new(),
            harvested_at: None,
            missing_fields: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_attributor(mut self, attributor: impl Into<String>) -> Self {
        self.attributor = attributor.into();
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Flag `field` as not found. Idempotent.
    pub fn mark_missing(&mut self, field: RecordField) {
        if !self.missing_fields.contains(&field) {
            self.missing_fields.push(field);
        }
    }

    pub fn is_partial(&self) -> bool {
        !self.missing_fields.is_empty()
    }

    /// Row values in [`JOB_COLUMNS`] order, stamped with `harvested_at`
    /// (or `fallback` when the record was never stamped).
    pub fn row_values(&self, fallback: NaiveDateTime) -> [String; 7] {
        let ts = self.harvested_at.unwrap_or(fallback);
        [
            self.natural_key.clone(),
            self.location.clone(),
            self.title.clone(),
            self.attributor.clone(),
            self.body.clone(),
            ts.format("%Y-%m-%d").to_string(),
            ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]
    }
}

/// Posting-date filter offered by the search page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecencyFilter {
    AnyTime,
    #[default]
    Past24Hours,
    PastWeek,
    PastMonth,
}

impl RecencyFilter {
    /// Label as shown in the site's filter menu.
    pub fn label(&self) -> &'static str {
        match self {
            RecencyFilter::AnyTime => "Any time",
            RecencyFilter::Past24Hours => "Past 24 hours",
            RecencyFilter::PastWeek => "Past week",
            RecencyFilter::PastMonth => "Past month",
        }
    }

    /// Value of the `f_TPR` search parameter, if the filter restricts anything.
    pub fn url_param(&self) -> Option<&'static str> {
        match self {
            RecencyFilter::AnyTime => None,
            RecencyFilter::Past24Hours => Some("r86400"),
            RecencyFilter::PastWeek => Some("r604800"),
            RecencyFilter::PastMonth => Some("r2592000"),
        }
    }
}

impl fmt::Display for RecencyFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecencyFilter {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "any time" | "any" | "anytime" => Ok(RecencyFilter::AnyTime),
            "past 24 hours" | "24h" | "day" | "past day" => Ok(RecencyFilter::Past24Hours),
            "past week" | "week" | "7d" => Ok(RecencyFilter::PastWeek),
            "past month" | "month" | "30d" => Ok(RecencyFilter::PastMonth),
            _ => Err(ModelError::UnknownRecency(s.to_string())),
        }
    }
}

/// Validation failures for model values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("target item count must be > 0")]
    ZeroTarget,
    #[error("unknown recency filter '{0}'; expected Any time, Past 24 hours, Past week, or Past month")]
    UnknownRecency(String),
    #[error("table name must not be empty")]
    EmptyTableName,
}

/// Search configuration for one run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    query: String,
    location: String,
    target_count: usize,
    recency: RecencyFilter,
}

impl SearchRequest {
    pub fn new(
        query: impl Into<String>,
        location: impl Into<String>,
        target_count: usize,
        recency: RecencyFilter,
    ) -> Result<Self, ModelError> {
        if target_count == 0 {
            return Err(ModelError::ZeroTarget);
        }
        Ok(Self {
            query: query.into(),
            location: location.into(),
            target_count,
            recency,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn recency(&self) -> RecencyFilter {
        self.recency
    }
}

/// How run tables are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableNaming {
    /// One table per (query, location), reused across runs. Re-runs
    /// deduplicate against everything harvested before.
    #[default]
    Durable,
    /// A fresh timestamp-suffixed table per run. No cross-run dedup.
    PerRun,
}

/// Name of a run table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TableName(String);

impl TableName {
    /// Wrap an operator-supplied name as-is (stores quote it).
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ModelError::EmptyTableName);
        }
        Ok(Self(raw.to_string()))
    }

    /// Derive the table for `request` under `naming`.
    ///
    /// `started_at` is only used by [`TableNaming::PerRun`].
    pub fn for_request(
        request: &SearchRequest,
        naming: TableNaming,
        started_at: NaiveDateTime,
    ) -> Self {
        let mut name = format!(
            "{}_{}_{}",
            TABLE_PREFIX,
            sanitize_identifier(request.query()),
            sanitize_identifier(request.location())
        );
        if naming == TableNaming::PerRun {
            name.push('_');
            name.push_str(&started_at.format("%Y%m%d_%H%M%S").to_string());
        }
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce `raw` to `[a-z0-9_]`, collapsing runs of separators.
///
/// Empty input (or input with no usable characters) becomes `any`.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("any");
    }
    out
}
