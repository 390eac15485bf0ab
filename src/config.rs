//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults that
//! reproduce the behavior of a plain `jh harvest` against LinkedIn's job
//! search. See `config/jh.example.toml` for an annotated file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use job_harvest_core::harvest::{DelayRange, HarvestOptions, RetryPolicy};
use job_harvest_core::key::KeyRule;
use job_harvest_core::models::{RecencyFilter, SearchRequest, TableNaming};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub apply: ApplyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_cookie_file")]
    pub cookie_file: PathBuf,
    /// Persistent Chromium profile. A throwaway profile is used when unset.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: false,
            cookie_file: default_cookie_file(),
            profile_dir: None,
            executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            launch_timeout_secs: default_launch_timeout_secs(),
        }
    }
}

fn default_cookie_file() -> PathBuf {
    PathBuf::from("linkedin_cookies.json")
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_launch_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    #[serde(default = "default_recency")]
    pub recency: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub table_naming: TableNaming,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            location: default_location(),
            target_count: default_target_count(),
            recency: default_recency(),
            max_pages: default_max_pages(),
            table_naming: TableNaming::default(),
        }
    }
}

fn default_query() -> String {
    "product manager".to_string()
}
fn default_location() -> String {
    "United States".to_string()
}
fn default_target_count() -> usize {
    100
}
fn default_recency() -> String {
    RecencyFilter::Past24Hours.label().to_string()
}
fn default_max_pages() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    #[serde(default = "default_empty_retry_max_attempts")]
    pub empty_retry_max_attempts: u32,
    #[serde(default = "default_empty_retry_backoff_ms")]
    pub empty_retry_backoff_ms: u64,
    #[serde(default = "default_pass_delay_min_ms")]
    pub pass_delay_min_ms: u64,
    #[serde(default = "default_pass_delay_max_ms")]
    pub pass_delay_max_ms: u64,
    #[serde(default = "default_click_timeout_ms")]
    pub click_timeout_ms: u64,
    /// Pause after activating a card, before reading the details pane.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_item_attempts")]
    pub item_attempts: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            empty_retry_max_attempts: default_empty_retry_max_attempts(),
            empty_retry_backoff_ms: default_empty_retry_backoff_ms(),
            pass_delay_min_ms: default_pass_delay_min_ms(),
            pass_delay_max_ms: default_pass_delay_max_ms(),
            click_timeout_ms: default_click_timeout_ms(),
            settle_ms: default_settle_ms(),
            item_attempts: default_item_attempts(),
        }
    }
}

fn default_empty_retry_max_attempts() -> u32 {
    30
}
fn default_empty_retry_backoff_ms() -> u64 {
    1000
}
fn default_pass_delay_min_ms() -> u64 {
    1500
}
fn default_pass_delay_max_ms() -> u64 {
    3000
}
fn default_click_timeout_ms() -> u64 {
    5000
}
fn default_settle_ms() -> u64 {
    1000
}
fn default_item_attempts() -> u32 {
    2
}

impl HarvestConfig {
    /// Harvester knobs for a page that should yield `target_count` records.
    pub fn options(&self, target_count: usize) -> HarvestOptions {
        HarvestOptions {
            target_count,
            empty_retry: RetryPolicy {
                max_attempts: self.empty_retry_max_attempts,
                backoff: Duration::from_millis(self.empty_retry_backoff_ms),
            },
            pass_delay: DelayRange {
                min: Duration::from_millis(self.pass_delay_min_ms),
                max: Duration::from_millis(self.pass_delay_max_ms),
            },
            item_attempts: self.item_attempts,
        }
    }

    pub fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.click_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Site-specific locations and selectors.
#[derive(Debug, Deserialize, Clone)]
pub struct SiteConfig {
    #[serde(default = "default_search_url")]
    pub search_url: String,
    #[serde(default = "default_view_base_url")]
    pub view_base_url: String,
    #[serde(default = "default_key_param")]
    pub key_param: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default = "default_card_selector")]
    pub card_selector: String,
    /// Scoped to the card.
    #[serde(default = "default_title_selector")]
    pub title_selector: String,
    /// Scoped to the card.
    #[serde(default = "default_company_selector")]
    pub company_selector: String,
    /// Text of the heading that precedes the description container.
    #[serde(default = "default_description_heading")]
    pub description_heading: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            search_url: default_search_url(),
            view_base_url: default_view_base_url(),
            key_param: default_key_param(),
            login_url: default_login_url(),
            card_selector: default_card_selector(),
            title_selector: default_title_selector(),
            company_selector: default_company_selector(),
            description_heading: default_description_heading(),
        }
    }
}

fn default_search_url() -> String {
    "https://www.linkedin.com/jobs/search/".to_string()
}
fn default_view_base_url() -> String {
    "https://www.linkedin.com/jobs/view".to_string()
}
fn default_key_param() -> String {
    "currentJobId".to_string()
}
fn default_login_url() -> String {
    "https://www.linkedin.com/login".to_string()
}
fn default_card_selector() -> String {
    "li.scaffold-layout__list-item".to_string()
}
fn default_title_selector() -> String {
    ".job-card-list__title--link".to_string()
}
fn default_company_selector() -> String {
    ".artdeco-entity-lockup__subtitle".to_string()
}
fn default_description_heading() -> String {
    "About the job".to_string()
}

impl SiteConfig {
    pub fn key_rule(&self) -> KeyRule {
        KeyRule::new(self.key_param.clone(), self.view_base_url.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplyConfig {
    #[serde(default = "default_resume_path")]
    pub resume_path: PathBuf,
    #[serde(default)]
    pub task_prompt_path: Option<PathBuf>,
    /// Extra instructions for the agent, served alongside the task.
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
    #[serde(default = "default_apply_bind")]
    pub bind: String,
    #[serde(default = "default_delay_min_secs")]
    pub delay_min_secs: u64,
    #[serde(default = "default_delay_max_secs")]
    pub delay_max_secs: u64,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_registration_keywords")]
    pub registration_keywords: Vec<String>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            resume_path: default_resume_path(),
            task_prompt_path: None,
            system_prompt_path: None,
            bind: default_apply_bind(),
            delay_min_secs: default_delay_min_secs(),
            delay_max_secs: default_delay_max_secs(),
            max_steps: default_max_steps(),
            registration_keywords: default_registration_keywords(),
        }
    }
}

fn default_resume_path() -> PathBuf {
    PathBuf::from("resumes/resume.pdf")
}
fn default_apply_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_delay_min_secs() -> u64 {
    10
}
fn default_delay_max_secs() -> u64 {
    25
}
fn default_max_steps() -> u32 {
    50
}
fn default_registration_keywords() -> Vec<String> {
    [
        "create account",
        "sign up",
        "register",
        "new account",
        "workday",
        "indeed account",
        "facebook jobs login",
        "create profile",
        "join now",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl ApplyConfig {
    pub fn job_delay(&self) -> DelayRange {
        DelayRange {
            min: Duration::from_secs(self.delay_min_secs),
            max: Duration::from_secs(self.delay_max_secs),
        }
    }
}

/// One-run overrides of the `[search]` section, from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct SearchOverrides {
    pub query: Option<String>,
    pub location: Option<String>,
    pub count: Option<usize>,
    pub recency: Option<String>,
}

impl Config {
    /// Build the immutable request for one run.
    pub fn search_request(&self, overrides: &SearchOverrides) -> Result<SearchRequest> {
        let recency_label = overrides
            .recency
            .as_deref()
            .unwrap_or(&self.search.recency);
        let recency: RecencyFilter = recency_label.parse()?;
        let request = SearchRequest::new(
            overrides
                .query
                .clone()
                .unwrap_or_else(|| self.search.query.clone()),
            overrides
                .location
                .clone()
                .unwrap_or_else(|| self.search.location.clone()),
            overrides.count.unwrap_or(self.search.target_count),
            recency,
        )?;
        Ok(request)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate search
    if config.search.target_count == 0 {
        anyhow::bail!("search.target_count must be > 0");
    }
    if config.search.max_pages == 0 {
        anyhow::bail!("search.max_pages must be >= 1");
    }
    config
        .search
        .recency
        .parse::<RecencyFilter>()
        .with_context(|| "Invalid search.recency")?;

    // Validate harvest
    if config.harvest.item_attempts == 0 {
        anyhow::bail!("harvest.item_attempts must be >= 1");
    }
    if config.harvest.empty_retry_max_attempts == 0 {
        anyhow::bail!("harvest.empty_retry_max_attempts must be >= 1");
    }
    if config.harvest.pass_delay_min_ms > config.harvest.pass_delay_max_ms {
        anyhow::bail!(
            "harvest.pass_delay_min_ms ({}) must not exceed harvest.pass_delay_max_ms ({})",
            config.harvest.pass_delay_min_ms,
            config.harvest.pass_delay_max_ms
        );
    }

    // Validate site
    if config.site.card_selector.trim().is_empty() {
        anyhow::bail!("site.card_selector must not be empty");
    }
    if config.site.key_param.trim().is_empty() {
        anyhow::bail!("site.key_param must not be empty");
    }

    // Validate apply
    if config.apply.delay_min_secs > config.apply.delay_max_secs {
        anyhow::bail!(
            "apply.delay_min_secs ({}) must not exceed apply.delay_max_secs ({})",
            config.apply.delay_min_secs,
            config.apply.delay_max_secs
        );
    }
    if config.apply.max_steps == 0 {
        anyhow::bail!("apply.max_steps must be >= 1");
    }

    Ok(())
}
