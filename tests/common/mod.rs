//! Common test utilities.
//!
//! Call [`init_tracing`] at the top of a test to get structured log
//! output, filtered through `RUST_LOG` (e.g.
//! `RUST_LOG=blinktree=trace cargo test --features tracing`).

#![allow(dead_code)]

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Ensures tracing is only initialized once across all tests.
static INIT: Once = Once::new();

/// Initialize the tracing subscriber with console logging.
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter: EnvFilter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .with_target(true)
            .compact()
            .try_init();
    });
}

/// Fixed-width integer key, preserving numeric order under byte-wise
/// comparison.
pub fn int_key(i: u64) -> Vec<u8> {
    format!("key-{i:010}").into_bytes()
}
