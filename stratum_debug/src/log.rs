// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `tracing` subscriber setup for tools and tests.
//!
//! `stratum_core` logs through the `tracing` macros and never installs a
//! subscriber itself. Binaries and tests call [`init`] once to route those
//! records to stderr, filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "stratum_core=info,stratum_fence_harness=info";

/// Error returned when a global subscriber is already installed.
pub type InitError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_FILTER`].
pub fn try_init() -> Result<(), InitError> {
    try_init_with(DEFAULT_FILTER)
}

/// Like [`try_init`] with an explicit fallback filter.
pub fn try_init_with(fallback: &str) -> Result<(), InitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
}

/// Installs the default subscriber, ignoring an already-installed one.
///
/// Safe to call from every test.
pub fn init() {
    let _ = try_init();
}

/// Installs a subscriber that writes through the test harness's captured
/// output, so log lines only show for failing tests.
pub fn init_for_tests() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stratum_core=debug"));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
