//! Collaborator contracts for the live page.
//!
//! A [`PageObserver`] wraps one stateful, dynamically rendering document
//! and hands out opaque item handles that stay valid only while the
//! document keeps its current state. A [`FieldExtractor`] turns one handle
//! into an [`ItemRecord`].
//!
//! The CDP layer in the binary crate implements both; tests use scripted
//! fakes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ItemRecord;

/// Failure reported by the observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// The handle no longer refers to a rendered element.
    #[error("item handle detached: {0}")]
    Detached(String),
    /// An interaction did not complete in time.
    #[error("interaction timed out after {0:?}")]
    Timeout(Duration),
    /// Navigation was lost or the session closed. Fatal for the run.
    #[error("session lost: {0}")]
    SessionLost(String),
}

impl ObserverError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ObserverError::SessionLost(_))
    }
}

/// Failure reported by the extractor for one item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// Per-item failure (detached element, click timeout, navigation
    /// race). The harvester logs it and moves on.
    #[error("item processing failed: {0}")]
    Item(String),
    /// The session itself is gone. Aborts the harvest.
    #[error("session lost during extraction: {0}")]
    Session(String),
}

impl From<ObserverError> for ExtractError {
    fn from(err: ObserverError) -> Self {
        if err.is_fatal() {
            ExtractError::Session(err.to_string())
        } else {
            ExtractError::Item(err.to_string())
        }
    }
}

/// A live, dynamically loaded list of items.
#[async_trait]
pub trait PageObserver: Send + Sync {
    /// Opaque, page-relative reference to one rendered item.
    type Handle: Send + Sync;

    /// All items currently matching the list selector, in document order.
    async fn current_handles(&self) -> Result<Vec<Self::Handle>, ObserverError>;

    /// Bring `handle` into view, which on infinite lists triggers loading
    /// of further items.
    async fn scroll_into_view(&self, handle: &Self::Handle) -> Result<(), ObserverError>;

    /// Activate `handle`, failing with [`ObserverError::Timeout`] after `timeout`.
    async fn click(&self, handle: &Self::Handle, timeout: Duration) -> Result<(), ObserverError>;

    /// The document's current resolved location.
    async fn current_location(&self) -> Result<String, ObserverError>;

    /// Cooperative pause. Test observers may return immediately.
    async fn wait(&self, duration: Duration);
}

/// Turns one item handle into a record.
///
/// Individual field lookups must be guarded: a missing optional field is
/// reported through [`ItemRecord::mark_missing`], never as an error.
#[async_trait]
pub trait FieldExtractor<O: PageObserver + ?Sized>: Send + Sync {
    async fn extract(&self, observer: &O, handle: &O::Handle) -> Result<ItemRecord, ExtractError>;
}
