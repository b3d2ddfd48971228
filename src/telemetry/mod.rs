//! Opt-in tracing setup for host applications.
//!
//! The store instruments its lifecycle (domain instantiation, invalidation
//! cascades, collection, pipeline start/stop) with [`tracing`] events; this
//! module wires a subscriber for hosts that do not bring their own. Library
//! consumers embedding the store in an application with existing tracing
//! infrastructure should skip this entirely.
//!
//! # Examples
//!
//! ```rust,no_run
//! loomstate::telemetry::init();
//! ```

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install a global subscriber: `RUST_LOG`-driven filtering (default
/// `warn`), compact fmt output, and span-trace capture for error reports.
///
/// # Panics
///
/// Panics when a global subscriber is already set; use [`try_init`] to
/// tolerate that.
pub fn init() {
    try_init().expect("global tracing subscriber already set");
}

/// Fallible variant of [`init`] for tests and embedders that may race on
/// subscriber installation.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .try_init()?;
    Ok(())
}
