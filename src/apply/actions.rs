//! The application-assist actions.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

use super::page::DropdownInfo;
use super::{Action, ActionContext, ActionOutcome};

/// Decode an action's parameters; a malformed body becomes an agent-visible
/// error rather than a transport failure.
fn params<T: for<'de> Deserialize<'de>>(action: &str, value: Value) -> Result<T, ActionOutcome> {
    serde_json::from_value(value)
        .map_err(|e| ActionOutcome::err(format!("Invalid parameters for {}: {}", action, e)))
}

#[derive(Deserialize)]
struct IndexParams {
    index: usize,
}

/// Extract the text of a PDF resume.
pub async fn read_resume_text(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read resume {}: {}", path.display(), e))?;
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await?
        .map_err(|e| anyhow::anyhow!("Failed to extract resume text: {}", e))?;
    Ok(text)
}

pub struct ReadResume;

#[async_trait]
impl Action for ReadResume {
    fn name(&self) -> &str {
        "read_resume"
    }

    fn description(&self) -> &str {
        "Read my resume for context to fill forms"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ActionContext) -> ActionOutcome {
        match read_resume_text(&ctx.resume_path).await {
            Ok(text) => {
                info!(chars = text.chars().count(), "read resume");
                ActionOutcome::ok(text)
            }
            Err(e) => ActionOutcome::err(format!("{:#}", e)),
        }
    }
}

pub struct UploadResume;

#[async_trait]
impl Action for UploadResume {
    fn name(&self) -> &str {
        "upload_resume"
    }

    fn description(&self) -> &str {
        "Upload resume to file input element"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "index": { "type": "integer", "minimum": 0 } },
            "required": ["index"]
        })
    }

    async fn execute(&self, params_value: Value, ctx: &ActionContext) -> ActionOutcome {
        let p: IndexParams = match params(self.name(), params_value) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.page.element_info(p.index).await {
            Ok(Some(info)) if info.is_file_input() => {}
            Ok(_) => return ActionOutcome::err(format!("No file upload element found at index {}", p.index)),
            Err(e) => return ActionOutcome::err(format!("No file upload element found at index {}: {:#}", p.index, e)),
        }

        let path = std::path::absolute(&ctx.resume_path).unwrap_or_else(|_| ctx.resume_path.clone());
        match ctx.page.set_file(p.index, &path).await {
            Ok(()) => {
                let msg = format!("Successfully uploaded resume to file input at index {}", p.index);
                info!("{}", msg);
                ActionOutcome::ok(msg)
            }
            Err(e) => {
                warn!(index = p.index, error = %format!("{:#}", e), "resume upload failed");
                ActionOutcome::err("Failed to upload resume file.")
            }
        }
    }
}

/// First keyword (in list order) found in `content`, case-insensitively.
pub fn detect_registration<'k>(content: &str, keywords: &'k [String]) -> Option<&'k str> {
    let lower = content.to_lowercase();
    keywords
        .iter()
        .find(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
        .map(String::as_str)
}

pub struct CheckRegistrationRequired;

#[async_trait]
impl Action for CheckRegistrationRequired {
    fn name(&self) -> &str {
        "check_registration_required"
    }

    fn description(&self) -> &str {
        "Check if page requires account registration"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ActionContext) -> ActionOutcome {
        let content = match ctx.page.content().await {
            Ok(c) => c,
            Err(e) => {
                return ActionOutcome::err(format!("Failed to check registration requirement: {:#}", e))
            }
        };
        match detect_registration(&content, &ctx.registration_keywords) {
            Some(kw) => ActionOutcome::ok(format!("Registration required - detected: {}", kw)),
            None => ActionOutcome::ok("No registration requirement detected"),
        }
    }
}

#[derive(Deserialize)]
struct HelpParams {
    question: String,
}

pub struct AskHumanForHelp;

#[async_trait]
impl Action for AskHumanForHelp {
    fn name(&self) -> &str {
        "ask_human_for_help"
    }

    fn description(&self) -> &str {
        "Ask human for help when unsure about form fields or next steps"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        })
    }

    async fn execute(&self, params_value: Value, ctx: &ActionContext) -> ActionOutcome {
        let p: HelpParams = match params(self.name(), params_value) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let prompt = format!("AGENT NEEDS HELP: {}\n{}", p.question, "=".repeat(50));
        match ctx.human.ask(&prompt).await {
            Ok(answer) => ActionOutcome::ok(format!("Human provided guidance: {}", answer)),
            Err(e) => ActionOutcome::err(format!("No answer from operator: {:#}", e)),
        }
    }
}

#[derive(Deserialize)]
struct FieldParams {
    field_name: String,
    #[serde(default)]
    field_description: String,
}

pub struct AskHumanForFieldValue;

#[async_trait]
impl Action for AskHumanForFieldValue {
    fn name(&self) -> &str {
        "ask_human_for_field_value"
    }

    fn description(&self) -> &str {
        "Ask human for specific form field value"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "field_name": { "type": "string" },
                "field_description": { "type": "string", "default": "" }
            },
            "required": ["field_name"]
        })
    }

    async fn execute(&self, params_value: Value, ctx: &ActionContext) -> ActionOutcome {
        let p: FieldParams = match params(self.name(), params_value) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let mut prompt = format!("NEED FORM DATA: Please provide value for '{}'", p.field_name);
        if !p.field_description.is_empty() {
            prompt.push_str(&format!("\nField description: {}", p.field_description));
        }
        prompt.push('\n');
        prompt.push_str(&"=".repeat(50));
        match ctx.human.ask(&prompt).await {
            Ok(value) => ActionOutcome::ok(format!("Human provided value for {}: {}", p.field_name, value)),
            Err(e) => ActionOutcome::err(format!("No answer from operator: {:#}", e)),
        }
    }
}

/// How the operator answered a dropdown question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropdownChoice {
    Skip,
    /// Position in the option list.
    Pick(usize),
    NoMatch,
}

/// Interpret an answer: `skip`, an option number, or exact option text
/// (both case-insensitive). A number out of range matches nothing; it is
/// not retried as text.
pub fn parse_dropdown_choice(answer: &str, options: &[String]) -> DropdownChoice {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("skip") {
        return DropdownChoice::Skip;
    }
    if let Ok(n) = answer.parse::<i64>() {
        return match usize::try_from(n) {
            Ok(i) if i < options.len() => DropdownChoice::Pick(i),
            _ => DropdownChoice::NoMatch,
        };
    }
    let wanted = answer.to_lowercase();
    options
        .iter()
        .position(|o| o.trim().to_lowercase() == wanted)
        .map(DropdownChoice::Pick)
        .unwrap_or(DropdownChoice::NoMatch)
}

/// The question shown to the operator for a dropdown.
pub fn format_dropdown_question(info: &DropdownInfo) -> String {
    let options: Vec<String> = info
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| format!("{}: {}", i, o.text))
        .collect();
    let or_na = |s: &str| if s.is_empty() { "N/A".to_string() } else { s.to_string() };
    let current = if info.current_value.is_empty() {
        "None".to_string()
    } else {
        info.current_value.clone()
    };
    format!(
        "DROPDOWN SELECTION NEEDED:\n\
         Found dropdown with {} options:\n{}\n\n\
         Current selection: {}\n\
         Dropdown ID: {}\n\
         Dropdown Name: {}\n\n\
         Which option should I select? Please provide either:\n\
         - The option number (0, 1, 2, etc.)\n\
         - The exact text of the option\n\
         - 'skip' to leave unchanged",
        info.options.len(),
        options.join("\n"),
        current,
        or_na(&info.id),
        or_na(&info.name),
    )
}

pub struct HandleDropdownSmart;

#[async_trait]
impl Action for HandleDropdownSmart {
    fn name(&self) -> &str {
        "handle_dropdown_smart"
    }

    fn description(&self) -> &str {
        "Smart dropdown handler - detects dropdown and selects option with human help if needed"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "index": { "type": "integer", "minimum": 0 } },
            "required": ["index"]
        })
    }

    async fn execute(&self, params_value: Value, ctx: &ActionContext) -> ActionOutcome {
        let p: IndexParams = match params(self.name(), params_value) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let index = p.index;

        let element = match ctx.page.element_info(index).await {
            Ok(Some(el)) => el,
            Ok(None) => return ActionOutcome::err(format!("Element with index {} not found", index)),
            Err(e) => return ActionOutcome::err(format!("Smart dropdown handler failed: {:#}", e)),
        };
        if !element.is_select() {
            return ActionOutcome::ok(format!(
                "Element at index {} is not a dropdown (tag: {})",
                index, element.tag
            ));
        }

        let info = match ctx.page.dropdown(index).await {
            Ok(Some(info)) if !info.options.is_empty() => info,
            Ok(_) => {
                return ActionOutcome::err(format!("Could not retrieve options for dropdown at index {}", index))
            }
            Err(e) => {
                debug!(index, error = %format!("{:#}", e), "dropdown probe failed");
                return ActionOutcome::err(format!("Could not retrieve options for dropdown at index {}", index));
            }
        };

        let answer = match ctx.human.ask(&format_dropdown_question(&info)).await {
            Ok(a) => a,
            Err(e) => return ActionOutcome::err(format!("No answer from operator: {:#}", e)),
        };
        let texts: Vec<String> = info.options.iter().map(|o| o.text.clone()).collect();
        let pick = match parse_dropdown_choice(&answer, &texts) {
            DropdownChoice::Skip => {
                return ActionOutcome::ok(format!("Skipped dropdown selection at index {} as requested", index))
            }
            DropdownChoice::NoMatch => {
                return ActionOutcome::err(format!(
                    "Could not find option matching \"{}\". Please try again.",
                    answer.trim()
                ))
            }
            DropdownChoice::Pick(i) => &info.options[i],
        };

        match ctx.page.select_option(index, pick.index).await {
            Ok(text) => {
                let msg = format!("Successfully selected \"{}\" from dropdown at index {}", text, index);
                info!("{}", msg);
                ActionOutcome::ok(msg)
            }
            Err(e) => {
                debug!(index, error = %format!("{:#}", e), "option selection failed");
                ActionOutcome::err(format!(
                    "Failed to select option \"{}\" in dropdown at index {}",
                    pick.text, index
                ))
            }
        }
    }
}

pub struct CheckIfDropdown;

#[async_trait]
impl Action for CheckIfDropdown {
    fn name(&self) -> &str {
        "check_if_dropdown"
    }

    fn description(&self) -> &str {
        "Check if element is a dropdown and get basic info"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "index": { "type": "integer", "minimum": 0 } },
            "required": ["index"]
        })
    }

    async fn execute(&self, params_value: Value, ctx: &ActionContext) -> ActionOutcome {
        let p: IndexParams = match params(self.name(), params_value) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match ctx.page.element_info(p.index).await {
            Ok(Some(el)) if el.is_select() => {
                ActionOutcome::ok(format!("Element at index {} IS a dropdown (select element)", p.index))
            }
            Ok(Some(el)) => ActionOutcome::ok(format!(
                "Element at index {} is NOT a dropdown (tag: {})",
                p.index, el.tag
            )),
            Ok(None) => ActionOutcome::err(format!("Element with index {} not found", p.index)),
            Err(e) => ActionOutcome::err(format!("Failed to check element: {:#}", e)),
        }
    }
}
