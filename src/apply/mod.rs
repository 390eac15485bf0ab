//! Application-assist mode (`jh apply`).
//!
//! `jh` does not decide how to fill an application. An external agent
//! does, and `jh` gives it a fixed set of named actions over HTTP: read the
//! resume, upload it, look for registration walls, ask the operator for
//! help or field values, and work dropdowns with the operator's choice.
//!
//! ```text
//!   agent ──GET /task──────────────▶ ┌──────────────┐
//!         ──GET /actions/list──────▶ │ action server│──▶ ActionRegistry
//!         ──POST /actions/{name}───▶ │   (axum)     │        │
//!         ──POST /result───────────▶ └──────────────┘        ▼
//!                                                     ApplyPage  HumanPrompt
//!                                                     (CDP tab)  (terminal)
//! ```
//!
//! Every job ends with exactly one [`ApplicationResult`]: the one the
//! agent posts, or `NEEDS_HUMAN_INTERVENTION` once the step budget is spent.

pub mod actions;
pub mod human;
pub mod page;
pub mod server;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::browser::BrowserSession;
use crate::config::Config;

use self::human::{HumanPrompt, StdinPrompt};
use self::page::{ApplyPage, CdpApplyPage};
use self::server::{serve_until_result, JobTask};

/// Terminal state of one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Submitted,
    RequiresAccountRegistration,
    NeedsHumanIntervention,
    Failed,
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApplicationStatus::Submitted => "SUBMITTED",
            ApplicationStatus::RequiresAccountRegistration => "REQUIRES_ACCOUNT_REGISTRATION",
            ApplicationStatus::NeedsHumanIntervention => "NEEDS_HUMAN_INTERVENTION",
            ApplicationStatus::Failed => "FAILED",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationResult {
    pub status: ApplicationStatus,
    #[serde(default)]
    pub notes: String,
}

impl ApplicationResult {
    pub fn new(status: ApplicationStatus, notes: impl Into<String>) -> Self {
        Self {
            status,
            notes: notes.into(),
        }
    }
}

/// Result of one action call, as returned to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Ok { content: String },
    Err { error: String },
}

impl ActionOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        ActionOutcome::Ok {
            content: content.into(),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        ActionOutcome::Err {
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ActionOutcome::Ok { .. })
    }
}

/// Everything an action may touch while it runs.
pub struct ActionContext {
    pub page: Arc<dyn ApplyPage>,
    pub human: Arc<dyn HumanPrompt>,
    pub resume_path: PathBuf,
    pub registration_keywords: Vec<String>,
}

/// A named operation the agent can invoke.
///
/// Failures the agent should see and recover from are returned as
/// [`ActionOutcome::Err`], never as a transport error.
#[async_trait]
pub trait Action: Send + Sync {
    /// Route segment for `POST /actions/{name}`.
    fn name(&self) -> &str;

    /// One line for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ActionContext) -> ActionOutcome;
}

/// Listing entry served by `GET /actions/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub struct ActionRegistry {
    actions: Vec<Box<dyn Action>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Registry holding the seven application-assist actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(actions::ReadResume));
        registry.register(Box::new(actions::UploadResume));
        registry.register(Box::new(actions::CheckRegistrationRequired));
        registry.register(Box::new(actions::AskHumanForHelp));
        registry.register(Box::new(actions::AskHumanForFieldValue));
        registry.register(Box::new(actions::HandleDropdownSmart));
        registry.register(Box::new(actions::CheckIfDropdown));
        registry
    }

    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    pub fn find(&self, name: &str) -> Option<&dyn Action> {
        self.actions
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    pub fn infos(&self) -> Vec<ActionInfo> {
        self.actions
            .iter()
            .map(|a| ActionInfo {
                name: a.name().to_string(),
                description: a.description().to_string(),
                parameters: a.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed lead-in of every job's task text.
pub const TASK_PREAMBLE: &str = "Apply for the job, following the provided instructions.";

/// Task text handed to the agent: the preamble plus the prompt file.
pub fn build_task(prompt: &str) -> String {
    format!("{}\n\n{}", TASK_PREAMBLE, prompt)
}

fn read_optional(path: Option<&PathBuf>) -> Result<Option<String>> {
    path.map(|p| {
        std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read prompt file: {}", p.display()))
    })
    .transpose()
}

/// Run `jh apply` over `urls`, one job at a time, in one browser session.
pub async fn run_apply(config: &Config, urls: &[String]) -> Result<Vec<(String, ApplicationResult)>> {
    let apply = &config.apply;
    if !apply.resume_path.exists() {
        anyhow::bail!("Resume file not found at {}", apply.resume_path.display());
    }
    let task = build_task(&read_optional(apply.task_prompt_path.as_ref())?.unwrap_or_default());
    let system_prompt = read_optional(apply.system_prompt_path.as_ref())?;

    let registry = Arc::new(ActionRegistry::with_builtins());
    let human: Arc<dyn HumanPrompt> = Arc::new(StdinPrompt);
    let session = BrowserSession::launch(&config.browser).await?;

    let mut results = Vec::with_capacity(urls.len());
    for (i, url) in urls.iter().enumerate() {
        info!(job = %url, "starting application");
        let result = match apply_one(config, &session, url, &task, &system_prompt, &registry, &human).await {
            Ok(r) => r,
            Err(e) => {
                error!(job = %url, error = %format!("{:#}", e), "application failed");
                ApplicationResult::new(ApplicationStatus::Failed, format!("{:#}", e))
            }
        };
        info!(job = %url, status = %result.status, notes = %result.notes, "application finished");
        results.push((url.clone(), result));

        if i + 1 < urls.len() {
            let delay = apply.job_delay().sample();
            info!(secs = delay.as_secs(), "pausing before next application");
            tokio::time::sleep(delay).await;
        }
    }

    if let Err(e) = session.close().await {
        warn!(error = %e, "browser did not close cleanly");
    }

    println!("apply");
    for (url, r) in &results {
        if r.notes.is_empty() {
            println!("  {}: {}", url, r.status);
        } else {
            println!("  {}: {} ({})", url, r.status, r.notes);
        }
    }
    Ok(results)
}

async fn apply_one(
    config: &Config,
    session: &BrowserSession,
    url: &str,
    task: &str,
    system_prompt: &Option<String>,
    registry: &Arc<ActionRegistry>,
    human: &Arc<dyn HumanPrompt>,
) -> Result<ApplicationResult> {
    let tab = session.new_tab(url).await?;
    let ctx = Arc::new(ActionContext {
        page: Arc::new(CdpApplyPage::new(tab.clone())),
        human: Arc::clone(human),
        resume_path: config.apply.resume_path.clone(),
        registration_keywords: config.apply.registration_keywords.clone(),
    });
    let job = JobTask {
        job_url: url.to_string(),
        task: task.to_string(),
        system_prompt: system_prompt.clone(),
        max_steps: config.apply.max_steps,
    };

    let listener = TcpListener::bind(&config.apply.bind)
        .await
        .with_context(|| format!("Failed to bind action server to {}", config.apply.bind))?;
    println!("Action server for {} listening on http://{}", url, config.apply.bind);

    let result = serve_until_result(listener, job, Arc::clone(registry), ctx).await;
    if let Err(e) = tab.close().await {
        warn!(job = %url, error = %e, "could not close tab");
    }
    result
}
