//! # Job Harvest
//!
//! Harvests job postings from a logged-in search session into SQLite, and
//! assists with applications through a small set of agent-callable actions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │   Browser    │──▶│  harvest loop     │──▶│  SQLite   │
//! │ (CDP, cookies)│   │ scroll+extract   │   │ per-query │
//! └──────────────┘   └──────────────────┘   └────┬─────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌──────────────┐                      ┌───────────────────┐
//! │ action server│◀── agent             │ list/query/export │
//! │   (apply)    │                      │      /purge       │
//! └──────────────┘                      └───────────────────┘
//! ```
//!
//! The scroll/extract/dedupe logic and the store seam live in the
//! `job-harvest-core` crate; this crate binds them to Chrome and SQLite.
//!
//! ## Quick Start
//!
//! ```bash
//! jh init                                   # create the database
//! jh session save                           # log in once, keep the cookies
//! jh harvest --query "data engineer" --count 50
//! jh list
//! jh query linkedin_jobs_data_engineer_united_states 5
//! jh export linkedin_jobs_data_engineer_united_states --format csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`browser`] | Chrome session, cookie file |
//! | [`cdp`] | Page observer and field extractor over CDP |
//! | [`search`] | Search and page URLs |
//! | [`run`] | Pagination and the harvest command |
//! | [`sqlite_store`] | SQLite record store |
//! | [`inspect`] | list, query, purge, export |
//! | [`progress`] | Harvest progress reporting |
//! | [`apply`] | Application-assist action server |

pub mod apply;
pub mod browser;
pub mod cdp;
pub mod config;
pub mod inspect;
pub mod progress;
pub mod run;
pub mod search;
pub mod sqlite_store;
