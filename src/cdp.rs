//! CDP-backed page observer and field extractor.
//!
//! [`CdpObserver`] hands out `chromiumoxide` elements matching the card
//! selector. [`CdpExtractor`] activates a card, waits for the details pane
//! to settle and reads the posting from the resolved page location, the
//! card itself and the details pane.

use async_trait::async_trait;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use job_harvest_core::key::{derive_key, KeyRule};
use job_harvest_core::models::{ItemRecord, RecordField};
use job_harvest_core::observe::{ExtractError, FieldExtractor, ObserverError, PageObserver};

use crate::config::{HarvestConfig, SiteConfig};

/// Map a CDP failure onto the observer taxonomy.
///
/// chromiumoxide reports most failures as message-bearing variants, so the
/// classification goes by message.
pub fn classify_cdp_error(err: &CdpError) -> ObserverError {
    classify_message(&err.to_string())
}

fn classify_message(msg: &str) -> ObserverError {
    let lower = msg.to_ascii_lowercase();
    if lower.contains("channel")
        || lower.contains("target closed")
        || lower.contains("no target")
        || lower.contains("browser closed")
        || lower.contains("connection closed")
        || lower.contains("websocket")
        || lower.contains("receiver is gone")
        || lower.contains("process exited")
    {
        ObserverError::SessionLost(msg.to_string())
    } else {
        ObserverError::Detached(msg.to_string())
    }
}

pub struct CdpObserver {
    page: Page,
    card_selector: String,
}

impl CdpObserver {
    pub fn new(page: Page, card_selector: impl Into<String>) -> Self {
        Self {
            page,
            card_selector: card_selector.into(),
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl PageObserver for CdpObserver {
    type Handle = Element;

    async fn current_handles(&self) -> Result<Vec<Element>, ObserverError> {
        self.page
            .find_elements(self.card_selector.as_str())
            .await
            .map_err(|e| classify_cdp_error(&e))
    }

    async fn scroll_into_view(&self, handle: &Element) -> Result<(), ObserverError> {
        handle
            .scroll_into_view()
            .await
            .map(|_| ())
            .map_err(|e| classify_cdp_error(&e))
    }

    async fn click(&self, handle: &Element, timeout: Duration) -> Result<(), ObserverError> {
        match tokio::time::timeout(timeout, handle.click()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(classify_cdp_error(&e)),
            Err(_) => Err(ObserverError::Timeout(timeout)),
        }
    }

    async fn current_location(&self) -> Result<String, ObserverError> {
        let url = self.page.url().await.map_err(|e| classify_cdp_error(&e))?;
        Ok(url.unwrap_or_default())
    }

    async fn wait(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Reads one posting per card.
pub struct CdpExtractor {
    key_rule: KeyRule,
    title_selector: String,
    company_selector: String,
    description_heading: String,
    click_timeout: Duration,
    settle: Duration,
}

impl CdpExtractor {
    pub fn new(site: &SiteConfig, harvest: &HarvestConfig) -> Self {
        Self {
            key_rule: site.key_rule(),
            title_selector: site.title_selector.clone(),
            company_selector: site.company_selector.clone(),
            description_heading: site.description_heading.clone(),
            click_timeout: harvest.click_timeout(),
            settle: harvest.settle(),
        }
    }

    /// Trimmed text of the first `selector` match inside `card`.
    async fn card_text(&self, card: &Element, selector: &str) -> Result<Option<String>, ExtractError> {
        let el = match card.find_element(selector).await {
            Ok(el) => el,
            Err(e) => {
                let err = classify_cdp_error(&e);
                if err.is_fatal() {
                    return Err(err.into());
                }
                return Ok(None);
            }
        };
        match el.inner_text().await {
            Ok(text) => Ok(text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())),
            Err(e) => {
                let err = classify_cdp_error(&e);
                if err.is_fatal() {
                    return Err(err.into());
                }
                Ok(None)
            }
        }
    }

    async fn body_text(&self, page: &Page) -> Result<Option<String>, ExtractError> {
        let script = body_probe_script(&self.description_heading);
        let probe: BodyProbe = match page.evaluate(script).await {
            Ok(result) => match result.into_value() {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "body probe returned an unexpected shape");
                    return Ok(None);
                }
            },
            Err(e) => {
                let err = classify_cdp_error(&e);
                if err.is_fatal() {
                    return Err(err.into());
                }
                debug!(error = %err, "body probe failed");
                return Ok(None);
            }
        };
        if !probe.found {
            return Ok(None);
        }
        let body = join_paragraphs(&probe.parts);
        Ok(if body.is_empty() { None } else { Some(body) })
    }
}

#[async_trait]
impl FieldExtractor<CdpObserver> for CdpExtractor {
    async fn extract(&self, observer: &CdpObserver, card: &Element) -> Result<ItemRecord, ExtractError> {
        observer.scroll_into_view(card).await?;
        observer.click(card, self.click_timeout).await?;
        observer.wait(self.settle).await;

        let raw = observer.current_location().await?;
        let derived = derive_key(&raw, &self.key_rule);
        let mut record = ItemRecord::new(derived.natural_key, derived.location);
        if !derived.from_param {
            warn!(location = %raw, param = %self.key_rule.param, "identifier missing; keying by location");
            record.mark_missing(RecordField::NaturalKey);
        }

        match self.card_text(card, &self.title_selector).await? {
            Some(t) => record.title = t,
            None => {
                debug!(key = %record.natural_key, "title not found");
                record.mark_missing(RecordField::Title);
            }
        }
        match self.card_text(card, &self.company_selector).await? {
            Some(c) => record.attributor = c,
            None => {
                debug!(key = %record.natural_key, "company not found");
                record.mark_missing(RecordField::Attributor);
            }
        }
        match self.body_text(observer.page()).await? {
            Some(b) => record.body = b,
            None => {
                debug!(key = %record.natural_key, heading = %self.description_heading, "description not found");
                record.mark_missing(RecordField::Body);
            }
        }

        Ok(record)
    }
}

#[derive(Debug, Deserialize)]
struct BodyProbe {
    found: bool,
    #[serde(default)]
    parts: Vec<String>,
}

/// Script locating the section headed `heading` and returning the text of
/// each paragraph in the container that follows it.
fn body_probe_script(heading: &str) -> String {
    let literal = serde_json::to_string(heading).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        r#"(() => {{
  const want = {literal}.trim().toLowerCase();
  const heading = Array.from(document.querySelectorAll('h1, h2, h3, h4'))
    .find(h => (h.textContent || '').trim().toLowerCase() === want);
  if (!heading) return {{ found: false, parts: [] }};
  const container = heading.nextElementSibling;
  if (!container) return {{ found: true, parts: [] }};
  const paras = Array.from(container.querySelectorAll('p'));
  const nodes = paras.length ? paras : [container];
  return {{ found: true, parts: nodes.map(n => n.innerText || n.textContent || '') }};
}})()"#
    )
}

/// Join paragraph texts with newlines, dropping blank paragraphs.
pub fn join_paragraphs(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
