// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame composition decisions for display hardware with a fixed number
//! of overlay windows.
//!
//! `stratum_core` sits between a compositor client and a display driver.
//! Every frame it decides which layers go on their own hardware window, which
//! are composed by the client into a single target, and which go through a
//! secondary compositor. It then builds the plane descriptors, narrows the
//! panel refresh to the damaged region, submits the frame, and routes every
//! synchronization fence to exactly one owner.
//!
//! # Architecture
//!
//! ```text
//!   Client ──► Display::set_layer_*() ──► LayerStore (dirty channels)
//!                                              │
//!   Display::validate() ◄──────────────────────┘
//!       │  recomp::RecompController, recomp::low_fps_range
//!       │  classify::classify() ──► Classification ──► WindowPlan
//!       │  SkipStatic::evaluate()
//!       ▼
//!   Display::accept_changes()
//!       │
//!       ▼
//!   Display::present()
//!       │  window::configure_layer() / configure_target() ──► WinConfigSet
//!       │  window_update::compute() ──► partial region
//!       │  plane::validate_win_config()
//!       ▼
//!   DisplayInterface::deliver_win_config() ──► release / retire fences
//! ```
//!
//! **[`display`]**: The [`Display`] handle and its frame lifecycle
//! ([`FrameState`]), including skip-validate and failure recovery.
//!
//! **[`layer`]**: Struct-of-arrays layer storage with generational handles
//! and per-layer refresh-rate counters.
//!
//! **[`dirty`]**: Change channels marked by layer setters, via
//! `understory_dirty`.
//!
//! **[`classify`]**: Composition path assignment, window budgeting, and the
//! client/secondary target ranges.
//!
//! **[`skip_static`]**: Reuse of the previous client target when nothing
//! under it changed.
//!
//! **[`recomp`]**: Whole-frame and per-layer switching to client composition
//! for slowly updating content.
//!
//! **[`window`]** and **[`plane`]**: Plane descriptor construction and
//! pre-submission validation.
//!
//! **[`window_update`]**: Partial-refresh region computation.
//!
//! **[`fence`]**: Owned fence handles over a pluggable
//! [`SyncPrimitives`](fence::SyncPrimitives) implementation.
//!
//! **[`driver`]** and **[`resource`]**: The seams to the display driver and
//! the hardware resource manager.
//!
//! **[`trace`]**: [`TraceSink`](trace::TraceSink) trait and event types for
//! frame instrumentation, with the [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one
//!   branch per call site).

pub mod classify;
pub mod config;
pub mod dirty;
pub mod display;
pub mod driver;
pub mod error;
pub mod fence;
pub mod format;
pub mod geometry;
pub mod image;
pub mod layer;
pub mod plane;
pub mod recomp;
pub mod resource;
pub mod skip_static;
pub mod time;
pub mod trace;
pub mod window;
pub mod window_update;

pub use config::DisplayConfig;
pub use display::{Display, DisplayRequest, FrameState, Validation};
pub use error::{Error, Status};
pub use fence::Fence;
pub use layer::{CompositionType, LayerId};
