//! # Booru
//!
//! Server-side ingestion and post-processing pipeline for a self-hosted
//! media library: library synchronization, derived-data jobs (metadata
//! extraction, perceptual hashing, thumbnails, folder tags, tag sanitation,
//! duplicate detection), a cron-driven job engine, and duplicate
//! resolution.
//!
//! ## Architecture
//!
//! - [`sync`] reconciles one library's on-disk state with the catalog
//! - [`jobs`] runs named background jobs (one per derived-data concern) with
//!   at-most-one-per-key execution and cooperative cancellation
//! - [`resolver`] applies user (or bulk) decisions to proposed duplicate
//!   groups
//! - [`db`] is the persistence layer: free functions over a `SqlitePool`
//! - [`api`] exposes a thin HTTP mapping layer over the above

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fs;
pub mod hashing;
pub mod ingestion;
pub mod jobs;
pub mod media;
pub mod resolver;
pub mod similarity;
pub mod sync;
pub mod tags;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Commonly imported items, re-exported for binaries and tests.
pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::db::{self, DbError, DbResult};
    pub use crate::error::{AppError, AppResult};
    pub use crate::jobs::{JobEngine, JobMode};
}
