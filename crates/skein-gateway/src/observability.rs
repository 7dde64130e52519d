//! Tracing setup for the gateway binary.
//!
//! The subscriber is installed once at startup behind a reload layer, so the
//! filter can be swapped later without rebuilding the stack. An operator's
//! `RUST_LOG` always beats the level from the config file.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

pub fn init_tracing_with_level(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (filter, handle) = reload::Layer::new(filter);
    let _ = FILTER_HANDLE.set(handle);
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// Swap in the level from the loaded configuration.
///
/// A no-op when `RUST_LOG` is set or tracing was never initialized here.
pub fn apply_logging_level(level: &str) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let Some(level) = effective_runtime_level(rust_log.as_deref(), level) else {
        return;
    };
    if let Some(handle) = FILTER_HANDLE.get() {
        let filter = EnvFilter::new(level);
        let _ = handle.modify(|f| *f = filter);
    }
}

fn effective_runtime_level<'a>(rust_log: Option<&str>, configured: &'a str) -> Option<&'a str> {
    match rust_log {
        Some(env) if !env.is_empty() => None,
        _ => Some(configured),
    }
}
