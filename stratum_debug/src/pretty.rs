// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are printed in microseconds.

use std::io::Write;

use stratum_core::time::HostTime;
use stratum_core::trace::{
    ClassificationEvent, FenceFaultEvent, FrameSummary, PhaseBeginEvent, PhaseEndEvent,
    RecompSwitchEvent, RecoveryEvent, SkipStaticEvent, TraceSink, WindowUpdateEvent,
};
use stratum_core::window_update::WindowUpdate;

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }

    /// Creates a sink that writes to a boxed writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write>) -> Self {
        Self { writer }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn us(t: HostTime) -> f64 {
    t.nanos() as f64 / 1000.0
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        let _ = writeln!(
            self.writer,
            "[begin] frame={} phase={} t={:.1}µs",
            e.frame_index,
            e.phase.as_str(),
            us(e.timestamp),
        );
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        let _ = writeln!(
            self.writer,
            "[end] frame={} phase={} t={:.1}µs",
            e.frame_index,
            e.phase.as_str(),
            us(e.timestamp),
        );
    }

    fn on_classification(&mut self, e: &ClassificationEvent) {
        let _ = writeln!(
            self.writer,
            "[classify] frame={} layers={} device={} client={} secondary={} demoted={}{}",
            e.frame_index,
            e.layers,
            e.device,
            e.client,
            e.secondary,
            e.demoted,
            if e.fallback { " FALLBACK" } else { "" },
        );
    }

    fn on_skip_static(&mut self, e: &SkipStaticEvent) {
        let _ = writeln!(
            self.writer,
            "[skip] frame={} outcome={} layers={}",
            e.frame_index,
            e.outcome.as_str(),
            e.layers,
        );
    }

    fn on_recomp_switch(&mut self, e: &RecompSwitchEvent) {
        let _ = writeln!(
            self.writer,
            "[recomp] frame={} {} -> {} reason={} t={:.1}µs",
            e.frame_index,
            e.switch.from.as_str(),
            e.switch.to.as_str(),
            e.switch.reason.as_str(),
            us(e.timestamp),
        );
    }

    fn on_window_update(&mut self, e: &WindowUpdateEvent) {
        let _ = match e.update {
            WindowUpdate::Full(reason) => writeln!(
                self.writer,
                "[update] frame={} full reason={}",
                e.frame_index,
                reason.as_str(),
            ),
            WindowUpdate::Partial(r) => writeln!(
                self.writer,
                "[update] frame={} partial=({},{})-({},{})",
                e.frame_index, r.left, r.top, r.right, r.bottom,
            ),
        };
    }

    fn on_fence_fault(&mut self, e: &FenceFaultEvent) {
        let _ = writeln!(
            self.writer,
            "[fence] frame={} fault={} fd={}",
            e.frame_index,
            e.fault.as_str(),
            e.fd,
        );
    }

    fn on_recovery(&mut self, e: &RecoveryEvent) {
        let _ = writeln!(
            self.writer,
            "[recover] frame={} status={:?} code={}",
            e.frame_index,
            e.status,
            e.status.code(),
        );
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        let _ = writeln!(
            self.writer,
            "[summary] frame={} validate={:.1}µs accept={:.1}µs present={:.1}µs submit={:.1}µs{}{}",
            s.frame_index,
            ns_to_us(s.validate_ns),
            ns_to_us(s.accept_ns),
            ns_to_us(s.present_ns),
            ns_to_us(s.submit_ns),
            if s.skipped_static { " SKIPPED" } else { "" },
            if s.recovered { " RECOVERED" } else { "" },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::error::Status;
    use stratum_core::geometry::Rect;
    use stratum_core::trace::PhaseKind;
    use stratum_core::window_update::FullFrameReason;

    fn output(sink: PrettyPrintSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn phase_lines_use_microseconds() {
        let mut sink = PrettyPrintSink::with_writer(Vec::new());
        sink.on_phase_begin(&PhaseBeginEvent {
            frame_index: 2,
            phase: PhaseKind::Present,
            timestamp: HostTime(1_500),
        });
        let out = output(sink);
        assert!(out.starts_with("[begin] frame=2"), "got {out:?}");
        assert!(out.contains("t=1.5µs"), "got {out:?}");
    }

    #[test]
    fn window_updates_name_reason_or_region() {
        let mut sink = PrettyPrintSink::with_writer(Vec::new());
        sink.on_window_update(&WindowUpdateEvent {
            frame_index: 1,
            update: WindowUpdate::Full(FullFrameReason::Scaled),
        });
        sink.on_window_update(&WindowUpdateEvent {
            frame_index: 2,
            update: WindowUpdate::Partial(Rect::new(0, 16, 64, 32)),
        });
        let out = output(sink);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2, "one line per event");
        assert!(lines[0].contains(FullFrameReason::Scaled.as_str()), "got {out:?}");
        assert!(lines[1].contains("partial=(0,16)-(64,32)"), "got {out:?}");
    }

    #[test]
    fn recovery_prints_status_code() {
        let mut sink = PrettyPrintSink::with_writer(Vec::new());
        sink.on_recovery(&RecoveryEvent {
            frame_index: 7,
            status: Status::NotValidated,
        });
        let out = output(sink);
        assert!(out.contains("status=NotValidated code=7"), "got {out:?}");
    }
}
