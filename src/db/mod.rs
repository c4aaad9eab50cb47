//! Persistence layer.
//!
//! Each submodule exposes free functions over `&SqlitePool` (or an open
//! transaction) returning `DbResult<T>` — no ORM, no entity tracking.
//! Schema is created idempotently at startup by [`core::init_schema`].

pub mod audit;
pub mod core;
pub mod duplicates;
pub mod exclusions;
pub mod jobs;
pub mod libraries;
pub mod posts;
pub mod schedules;
pub mod sources;
pub mod tags;

pub use core::{init_pool, init_schema, DbError, DbResult};
