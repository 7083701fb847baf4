// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame tracing for the validate/present cycle.
//!
//! This module provides a [`TraceSink`] trait with per-event methods that the
//! display calls at each decision point. All method bodies default to no-ops,
//! so implementing only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! Trace events are independent of `tracing` logs: logs explain a decision to
//! a human, trace events feed tools ([`FrameSummaryBuilder`] and the sinks in
//! `stratum_debug`).
//!
//! # Crate features
//!
//! - `trace` enables the `Tracer` method bodies (one branch per call).

use crate::error::Status;
use crate::geometry::Rect;
use crate::recomp::RecompSwitch;
use crate::skip_static::SkipOutcome;
use crate::time::HostTime;
use crate::window_update::WindowUpdate;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which phase of the frame cycle is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    /// Classification and resource assignment.
    Validate,
    /// Committing resolved composition types.
    Accept,
    /// Descriptor building, fence routing, submission.
    Present,
    /// The driver call inside present.
    Submit,
}

impl PhaseKind {
    /// Returns a short label for exporters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Accept => "accept",
            Self::Present => "present",
            Self::Submit => "submit",
        }
    }
}

/// Which fence operation failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceFault {
    /// Duplicating a fence failed; the consumer got none.
    DupFailed,
    /// The previous retire fence did not signal within the wait budget.
    RetireTimeout,
    /// An acquire fence was still held after present.
    Leftover,
}

impl FenceFault {
    /// Returns a short label for exporters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DupFailed => "dup_failed",
            Self::RetireTimeout => "retire_timeout",
            Self::Leftover => "leftover",
        }
    }
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Marks the beginning of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseBeginEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is starting.
    pub phase: PhaseKind,
    /// Host time at the start of the phase.
    pub timestamp: HostTime,
}

/// Marks the end of a phase.
#[derive(Clone, Copy, Debug)]
pub struct PhaseEndEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Which phase is ending.
    pub phase: PhaseKind,
    /// Host time at the end of the phase.
    pub timestamp: HostTime,
}

/// Emitted after classification.
#[derive(Clone, Copy, Debug)]
pub struct ClassificationEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Number of layers.
    pub layers: usize,
    /// Layers on their own plane.
    pub device: usize,
    /// Layers composed by the client.
    pub client: usize,
    /// Layers composed by the secondary compositor.
    pub secondary: usize,
    /// Layers demoted to fit the window budget.
    pub demoted: usize,
    /// Whether classification failed and every layer fell back to client.
    pub fallback: bool,
}

/// Emitted with the skip-static decision.
#[derive(Clone, Copy, Debug)]
pub struct SkipStaticEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Decision.
    pub outcome: SkipOutcome,
    /// Layers under the client target.
    pub layers: usize,
}

/// Emitted when the recomposition mode changes.
#[derive(Clone, Copy, Debug)]
pub struct RecompSwitchEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Transition.
    pub switch: RecompSwitch,
    /// Host time of the evaluation.
    pub timestamp: HostTime,
}

/// Emitted with the partial-refresh result.
#[derive(Clone, Copy, Debug)]
pub struct WindowUpdateEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Result.
    pub update: WindowUpdate,
}

impl WindowUpdateEvent {
    /// The partial region, if one is used.
    #[must_use]
    pub const fn region(&self) -> Option<Rect> {
        self.update.region()
    }
}

/// Emitted when a fence operation fails or a fence is found leaked.
#[derive(Clone, Copy, Debug)]
pub struct FenceFaultEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// What went wrong.
    pub fault: FenceFault,
    /// Raw handle involved.
    pub fd: i32,
}

/// Emitted when present enters the recovery path.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryEvent {
    /// Frame counter.
    pub frame_index: u64,
    /// Client status the frame reported.
    pub status: Status,
}

/// Per-frame timing summary produced by [`FrameSummaryBuilder`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummary {
    /// Frame counter.
    pub frame_index: u64,
    /// Validate phase duration in nanoseconds (0 if not measured).
    pub validate_ns: u64,
    /// Accept phase duration in nanoseconds (0 if not measured).
    pub accept_ns: u64,
    /// Present phase duration in nanoseconds (0 if not measured).
    pub present_ns: u64,
    /// Driver submission duration in nanoseconds (0 if not measured).
    pub submit_ns: u64,
    /// Whether the client target was reused.
    pub skipped_static: bool,
    /// Whether the frame went through recovery.
    pub recovered: bool,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from a display.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called at the beginning of a phase.
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        _ = e;
    }

    /// Called at the end of a phase.
    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        _ = e;
    }

    /// Called after classification.
    fn on_classification(&mut self, e: &ClassificationEvent) {
        _ = e;
    }

    /// Called with the skip-static decision.
    fn on_skip_static(&mut self, e: &SkipStaticEvent) {
        _ = e;
    }

    /// Called when the recomposition mode changes.
    fn on_recomp_switch(&mut self, e: &RecompSwitchEvent) {
        _ = e;
    }

    /// Called with the partial-refresh result.
    fn on_window_update(&mut self, e: &WindowUpdateEvent) {
        _ = e;
    }

    /// Called on a fence fault.
    fn on_fence_fault(&mut self, e: &FenceFaultEvent) {
        _ = e;
    }

    /// Called when present recovers from a failure.
    fn on_recovery(&mut self, e: &RecoveryEvent) {
        _ = e;
    }

    /// Called with a per-frame timing summary.
    fn on_frame_summary(&mut self, s: &FrameSummary) {
        _ = s;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

/// Generates a `Tracer` method forwarding one event to the sink.
macro_rules! forward {
    ($(#[$doc:meta])* $name:ident, $hook:ident, $event:ty) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(&mut self, e: &$event) {
            #[cfg(feature = "trace")]
            if let Some(s) = &mut self.sink {
                s.$hook(e);
            }
            #[cfg(not(feature = "trace"))]
            {
                _ = e;
            }
        }
    };
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    forward!(
        /// Emits a [`PhaseBeginEvent`].
        phase_begin, on_phase_begin, PhaseBeginEvent
    );
    forward!(
        /// Emits a [`PhaseEndEvent`].
        phase_end, on_phase_end, PhaseEndEvent
    );
    forward!(
        /// Emits a [`ClassificationEvent`].
        classification, on_classification, ClassificationEvent
    );
    forward!(
        /// Emits a [`SkipStaticEvent`].
        skip_static, on_skip_static, SkipStaticEvent
    );
    forward!(
        /// Emits a [`RecompSwitchEvent`].
        recomp_switch, on_recomp_switch, RecompSwitchEvent
    );
    forward!(
        /// Emits a [`WindowUpdateEvent`].
        window_update, on_window_update, WindowUpdateEvent
    );
    forward!(
        /// Emits a [`FenceFaultEvent`].
        fence_fault, on_fence_fault, FenceFaultEvent
    );
    forward!(
        /// Emits a [`RecoveryEvent`].
        recovery, on_recovery, RecoveryEvent
    );
    forward!(
        /// Emits a [`FrameSummary`].
        frame_summary, on_frame_summary, FrameSummary
    );
}

// ---------------------------------------------------------------------------
// FrameSummaryBuilder
// ---------------------------------------------------------------------------

/// Collects phase timestamps during a frame and produces a [`FrameSummary`].
#[derive(Clone, Copy, Debug)]
pub struct FrameSummaryBuilder {
    frame_index: u64,
    phase_starts: [Option<HostTime>; 4],
    phase_ends: [Option<HostTime>; 4],
    skipped_static: bool,
    recovered: bool,
}

impl FrameSummaryBuilder {
    /// Starts building a summary for `frame_index`.
    #[must_use]
    pub const fn new(frame_index: u64) -> Self {
        Self {
            frame_index,
            phase_starts: [None; 4],
            phase_ends: [None; 4],
            skipped_static: false,
            recovered: false,
        }
    }

    /// Frame the summary is for.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Records the start of a phase.
    pub fn phase_begin(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_starts[phase_index(phase)] = Some(t);
    }

    /// Records the end of a phase.
    pub fn phase_end(&mut self, phase: PhaseKind, t: HostTime) {
        self.phase_ends[phase_index(phase)] = Some(t);
    }

    /// Sets whether the client target was reused.
    pub fn set_skipped_static(&mut self, skipped: bool) {
        self.skipped_static = skipped;
    }

    /// Sets whether the frame went through recovery.
    pub fn set_recovered(&mut self, recovered: bool) {
        self.recovered = recovered;
    }

    /// Consumes the builder and produces the final [`FrameSummary`].
    #[must_use]
    pub fn finish(self) -> FrameSummary {
        FrameSummary {
            frame_index: self.frame_index,
            validate_ns: self.phase_duration(PhaseKind::Validate),
            accept_ns: self.phase_duration(PhaseKind::Accept),
            present_ns: self.phase_duration(PhaseKind::Present),
            submit_ns: self.phase_duration(PhaseKind::Submit),
            skipped_static: self.skipped_static,
            recovered: self.recovered,
        }
    }

    fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let idx = phase_index(phase);
        match (self.phase_starts[idx], self.phase_ends[idx]) {
            (Some(start), Some(end)) => end.saturating_duration_since(start).nanos(),
            _ => 0,
        }
    }
}

/// Maps a [`PhaseKind`] to an array index.
const fn phase_index(phase: PhaseKind) -> usize {
    match phase {
        PhaseKind::Validate => 0,
        PhaseKind::Accept => 1,
        PhaseKind::Present => 2,
        PhaseKind::Submit => 3,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window_update::FullFrameReason;

    fn sample_update() -> WindowUpdateEvent {
        WindowUpdateEvent {
            frame_index: 3,
            update: WindowUpdate::Partial(Rect::new(0, 0, 64, 64)),
        }
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_window_update(&sample_update());
        sink.on_fence_fault(&FenceFaultEvent {
            frame_index: 1,
            fault: FenceFault::Leftover,
            fd: 9,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.window_update(&sample_update());
        tracer.phase_begin(&PhaseBeginEvent {
            frame_index: 0,
            phase: PhaseKind::Validate,
            timestamp: HostTime(0),
        });
    }

    #[test]
    fn window_update_event_region() {
        assert_eq!(sample_update().region(), Some(Rect::new(0, 0, 64, 64)), "partial region");
        let full = WindowUpdateEvent {
            frame_index: 3,
            update: WindowUpdate::Full(FullFrameReason::Scaled),
        };
        assert_eq!(full.region(), None, "full frame has no region");
    }

    #[test]
    fn summary_builder_computes_durations() {
        let mut builder = FrameSummaryBuilder::new(42);
        builder.phase_begin(PhaseKind::Validate, HostTime(1_000));
        builder.phase_end(PhaseKind::Validate, HostTime(1_400));
        builder.phase_begin(PhaseKind::Present, HostTime(2_000));
        builder.phase_begin(PhaseKind::Submit, HostTime(2_100));
        builder.phase_end(PhaseKind::Submit, HostTime(2_150));
        builder.phase_end(PhaseKind::Present, HostTime(2_500));
        builder.set_skipped_static(true);

        let summary = builder.finish();
        assert_eq!(summary.validate_ns, 400, "validate");
        assert_eq!(summary.accept_ns, 0, "accept not measured");
        assert_eq!(summary.present_ns, 500, "present");
        assert_eq!(summary.submit_ns, 50, "submit");
        assert!(summary.skipped_static, "skip flag carried");
        assert!(!summary.recovered, "no recovery");
        assert_eq!(summary.frame_index, 42, "frame index");
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        struct RecordingSink {
            updates: Vec<u64>,
        }
        impl TraceSink for RecordingSink {
            fn on_window_update(&mut self, e: &WindowUpdateEvent) {
                self.updates.push(e.frame_index);
            }
        }

        let mut sink = RecordingSink { updates: Vec::new() };
        let mut tracer = Tracer::new(&mut sink);
        tracer.window_update(&sample_update());
        // Access sink after tracer is dropped.
        drop(tracer);
        assert_eq!(sink.updates, &[3], "event recorded");
    }
}
