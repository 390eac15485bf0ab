//! The page an application is filled in on.
//!
//! Actions address form controls by *index*: the position of the element
//! among all matches of [`INTERACTIVE_SELECTOR`] in document order. The
//! agent sees the same numbering because it reads the page through the
//! same selector.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Elements that can be addressed by index.
pub const INTERACTIVE_SELECTOR: &str = "input, select, textarea, button, a[href]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Lowercase tag name.
    pub tag: String,
    /// The `type` attribute, when present.
    #[serde(default, rename = "type")]
    pub input_type: Option<String>,
}

impl ElementInfo {
    pub fn is_select(&self) -> bool {
        self.tag == "select"
    }

    pub fn is_file_input(&self) -> bool {
        self.tag == "input" && self.input_type.as_deref() == Some("file")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub text: String,
    pub value: String,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub current_value: String,
    pub options: Vec<DropdownOption>,
}

/// What the actions need from a live page.
#[async_trait]
pub trait ApplyPage: Send + Sync {
    /// Full HTML of the current document.
    async fn content(&self) -> Result<String>;

    /// `None` when no element has that index.
    async fn element_info(&self, index: usize) -> Result<Option<ElementInfo>>;

    /// Options of the `<select>` at `index`; `None` when the element is
    /// missing or is not a `<select>`.
    async fn dropdown(&self, index: usize) -> Result<Option<DropdownInfo>>;

    /// Select option `option_index` and fire `input`/`change`. Returns the
    /// selected option's text.
    async fn select_option(&self, index: usize, option_index: usize) -> Result<String>;

    /// Attach `path` to the file input at `index`.
    async fn set_file(&self, index: usize, path: &Path) -> Result<()>;
}

/// [`ApplyPage`] over a browser tab.
pub struct CdpApplyPage {
    page: Page,
}

impl CdpApplyPage {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn probe<T: DeserializeOwned>(&self, script: String) -> Result<T> {
        let result = self
            .page
            .evaluate(script)
            .await
            .context("Page script failed")?;
        result
            .into_value::<T>()
            .map_err(|e| anyhow!("Unexpected page script result: {}", e))
    }
}

#[derive(Debug, Deserialize)]
struct Probe<T> {
    found: bool,
    #[serde(flatten)]
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Selected {
    text: String,
}

#[async_trait]
impl ApplyPage for CdpApplyPage {
    async fn content(&self) -> Result<String> {
        self.page.content().await.context("Failed to read page content")
    }

    async fn element_info(&self, index: usize) -> Result<Option<ElementInfo>> {
        let probe: Probe<ElementInfo> = self.probe(element_script(index, ELEMENT_INFO_BODY)).await?;
        Ok(if probe.found { probe.body } else { None })
    }

    async fn dropdown(&self, index: usize) -> Result<Option<DropdownInfo>> {
        let probe: Probe<DropdownInfo> = self.probe(element_script(index, DROPDOWN_BODY)).await?;
        Ok(if probe.found { probe.body } else { None })
    }

    async fn select_option(&self, index: usize, option_index: usize) -> Result<String> {
        let body = SELECT_BODY.replace("__OPTION__", &option_index.to_string());
        let probe: Probe<Selected> = self.probe(element_script(index, &body)).await?;
        match probe.body {
            Some(sel) if probe.found => Ok(sel.text),
            _ => Err(anyhow!("Option {} of element {} could not be selected", option_index, index)),
        }
    }

    async fn set_file(&self, index: usize, path: &Path) -> Result<()> {
        let elements = self
            .page
            .find_elements(INTERACTIVE_SELECTOR)
            .await
            .context("Failed to list page elements")?;
        let element = elements
            .get(index)
            .ok_or_else(|| anyhow!("Element with index {} not found", index))?;

        let mut params = SetFileInputFilesParams::new(vec![path.display().to_string()]);
        params.backend_node_id = Some(element.backend_node_id);
        self.page
            .execute(params)
            .await
            .context("Failed to set file input")?;
        Ok(())
    }
}

/// Wrap `body` so it runs against the element at `index`, bound as `el`.
/// The body must return an object; `found: true` is merged into it.
fn element_script(index: usize, body: &str) -> String {
    let selector = serde_json::to_string(INTERACTIVE_SELECTOR).unwrap_or_else(|_| "\"*\"".to_string());
    format!(
        r#"(() => {{
  const el = document.querySelectorAll({selector})[{index}];
  if (!el) return {{ found: false }};
  const out = (() => {{ {body} }})();
  return out ? Object.assign({{ found: true }}, out) : {{ found: false }};
}})()"#
    )
}

const ELEMENT_INFO_BODY: &str =
    "return { tag: el.tagName.toLowerCase(), type: el.getAttribute('type') };";

const DROPDOWN_BODY: &str = r#"
  if (el.tagName.toLowerCase() !== 'select') return null;
  return {
    id: el.id || '',
    name: el.name || '',
    current_value: el.value || '',
    options: Array.from(el.options).map((o, i) => ({
      text: (o.text || '').trim(),
      value: o.value || '',
      index: i,
    })),
  };"#;

const SELECT_BODY: &str = r#"
  if (el.tagName.toLowerCase() !== 'select') return null;
  const opt = el.options[__OPTION__];
  if (!opt) return null;
  el.selectedIndex = __OPTION__;
  el.dispatchEvent(new Event('input', { bubbles: true }));
  el.dispatchEvent(new Event('change', { bubbles: true }));
  return { text: (opt.text || '').trim() };"#;
