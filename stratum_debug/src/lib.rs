// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Logging setup, recording, pretty-printing, and Chrome trace export for
//! stratum diagnostics.
//!
//! This crate provides [`TraceSink`](stratum_core::trace::TraceSink)
//! implementations for development and post-mortem analysis:
//!
//! - [`pretty::PrettyPrintSink`]: human-readable one-line-per-event output.
//! - [`recorder::RecorderSink`]: compact binary recording with
//!   [`recorder::decode`] for playback.
//! - [`chrome::export`]: writes Chrome Trace Event Format JSON from recorded
//!   bytes.
//!
//! [`log`] installs a `tracing-subscriber` formatter for the `tracing`
//! records `stratum_core` emits.

pub mod chrome;
pub mod log;
pub mod pretty;
pub mod recorder;
