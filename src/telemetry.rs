//! Tracing/logging initialization.
//!
//! One-shot setup for the whole process: an `EnvFilter` driven by `RUST_LOG`
//! (defaulting to `info`), formatted to stdout. Call once from each binary's
//! `main`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
