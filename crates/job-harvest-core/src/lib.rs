//! # Job Harvest Core
//!
//! Runtime-agnostic logic for Job Harvest: the harvested item model,
//! natural-key derivation, the incremental list harvester, the record
//! store abstraction, and the persistence half of a harvest run.
//!
//! This crate contains no tokio, sqlx, browser, or filesystem I/O. The
//! live page and the storage engine are reached only through the
//! [`observe::PageObserver`], [`observe::FieldExtractor`], and
//! [`store::RecordStore`] traits, so the whole loop can be driven by
//! scripted fakes in tests.

pub mod coordinator;
pub mod harvest;
pub mod key;
pub mod models;
pub mod observe;
pub mod store;
