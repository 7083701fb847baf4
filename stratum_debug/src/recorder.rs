// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as tagged little-endian records. [`decode`] reads them back as
//! an iterator of [`RecordedEvent`].

use stratum_core::error::Status;
use stratum_core::geometry::Rect;
use stratum_core::recomp::{RecompMode, RecompSwitch, SwitchReason};
use stratum_core::skip_static::SkipOutcome;
use stratum_core::time::HostTime;
use stratum_core::trace::{
    ClassificationEvent, FenceFault, FenceFaultEvent, FrameSummary, PhaseBeginEvent,
    PhaseEndEvent, PhaseKind, RecompSwitchEvent, RecoveryEvent, SkipStaticEvent, TraceSink,
    WindowUpdateEvent,
};
use stratum_core::window_update::{FullFrameReason, WindowUpdate};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_PHASE_BEGIN: u8 = 1;
const TAG_PHASE_END: u8 = 2;
const TAG_CLASSIFICATION: u8 = 3;
const TAG_SKIP_STATIC: u8 = 4;
const TAG_RECOMP_SWITCH: u8 = 5;
const TAG_WINDOW_UPDATE: u8 = 6;
const TAG_FENCE_FAULT: u8 = 7;
const TAG_RECOVERY: u8 = 8;
const TAG_FRAME_SUMMARY: u8 = 9;

const PHASES: [PhaseKind; 4] = [
    PhaseKind::Validate,
    PhaseKind::Accept,
    PhaseKind::Present,
    PhaseKind::Submit,
];

const OUTCOMES: [SkipOutcome; 5] = [
    SkipOutcome::Inactive,
    SkipOutcome::Snapshotted,
    SkipOutcome::Changed,
    SkipOutcome::Blocked,
    SkipOutcome::Skip,
];

const MODES: [RecompMode; 3] = [
    RecompMode::NoModeSwitch,
    RecompMode::DeviceToClient,
    RecompMode::ClientToDevice,
];

const REASONS: [SwitchReason; 5] = [
    SwitchReason::Disabled,
    SwitchReason::Priority,
    SwitchReason::Bandwidth,
    SwitchReason::LowFps,
    SwitchReason::HighFps,
];

const FULL_REASONS: [FullFrameReason; 12] = [
    FullFrameReason::Disabled,
    FullFrameReason::GeometryChanged,
    FullFrameReason::CursorOnPlane,
    FullFrameReason::SecondaryTarget,
    FullFrameReason::ClientTarget,
    FullFrameReason::M2mLayer,
    FullFrameReason::NullBuffer,
    FullFrameReason::Transformed,
    FullFrameReason::Scaled,
    FullFrameReason::WindowChanged,
    FullFrameReason::NoDamage,
    FullFrameReason::WholePanel,
];

const FAULTS: [FenceFault; 3] = [
    FenceFault::DupFailed,
    FenceFault::RetireTimeout,
    FenceFault::Leftover,
];

const STATUSES: [Status; 7] = [
    Status::BadLayer,
    Status::BadDisplay,
    Status::NotValidated,
    Status::Unsupported,
    Status::BadParameter,
    Status::NoResources,
    Status::Internal,
];

/// Position of `v` in `table`, as a record byte.
#[expect(
    clippy::cast_possible_truncation,
    reason = "the enum tables have fewer than 256 entries"
)]
fn code_of<T: PartialEq>(table: &[T], v: &T) -> u8 {
    table.iter().position(|t| t == v).unwrap_or(0) as u8
}

fn from_code<T: Copy>(table: &[T], code: u8) -> Option<T> {
    table.get(usize::from(code)).copied()
}

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "per-frame layer counts are capped at u32::MAX for recording"
    )]
    fn write_count(&mut self, v: usize) {
        self.write_u32(v.min(u32::MAX as usize) as u32);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_rect(&mut self, r: Rect) {
        self.write_i32(r.left);
        self.write_i32(r.top);
        self.write_i32(r.right);
        self.write_i32(r.bottom);
    }
}

impl TraceSink for RecorderSink {
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.write_u8(TAG_PHASE_BEGIN);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&PHASES, &e.phase));
        self.write_u64(e.timestamp.nanos());
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.write_u8(TAG_PHASE_END);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&PHASES, &e.phase));
        self.write_u64(e.timestamp.nanos());
    }

    fn on_classification(&mut self, e: &ClassificationEvent) {
        self.write_u8(TAG_CLASSIFICATION);
        self.write_u64(e.frame_index);
        self.write_count(e.layers);
        self.write_count(e.device);
        self.write_count(e.client);
        self.write_count(e.secondary);
        self.write_count(e.demoted);
        self.write_bool(e.fallback);
    }

    fn on_skip_static(&mut self, e: &SkipStaticEvent) {
        self.write_u8(TAG_SKIP_STATIC);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&OUTCOMES, &e.outcome));
        self.write_count(e.layers);
    }

    fn on_recomp_switch(&mut self, e: &RecompSwitchEvent) {
        self.write_u8(TAG_RECOMP_SWITCH);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&MODES, &e.switch.from));
        self.write_u8(code_of(&MODES, &e.switch.to));
        self.write_u8(code_of(&REASONS, &e.switch.reason));
        self.write_u64(e.timestamp.nanos());
    }

    fn on_window_update(&mut self, e: &WindowUpdateEvent) {
        self.write_u8(TAG_WINDOW_UPDATE);
        self.write_u64(e.frame_index);
        match e.update {
            WindowUpdate::Full(reason) => {
                self.write_u8(0);
                self.write_u8(code_of(&FULL_REASONS, &reason));
            }
            WindowUpdate::Partial(rect) => {
                self.write_u8(1);
                self.write_rect(rect);
            }
        }
    }

    fn on_fence_fault(&mut self, e: &FenceFaultEvent) {
        self.write_u8(TAG_FENCE_FAULT);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&FAULTS, &e.fault));
        self.write_i32(e.fd);
    }

    fn on_recovery(&mut self, e: &RecoveryEvent) {
        self.write_u8(TAG_RECOVERY);
        self.write_u64(e.frame_index);
        self.write_u8(code_of(&STATUSES, &e.status));
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.write_u8(TAG_FRAME_SUMMARY);
        self.write_u64(s.frame_index);
        self.write_u64(s.validate_ns);
        self.write_u64(s.accept_ns);
        self.write_u64(s.present_ns);
        self.write_u64(s.submit_ns);
        self.write_bool(s.skipped_static);
        self.write_bool(s.recovered);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Debug)]
pub enum RecordedEvent {
    /// A [`PhaseBeginEvent`].
    PhaseBegin(PhaseBeginEvent),
    /// A [`PhaseEndEvent`].
    PhaseEnd(PhaseEndEvent),
    /// A [`ClassificationEvent`].
    Classification(ClassificationEvent),
    /// A [`SkipStaticEvent`].
    SkipStatic(SkipStaticEvent),
    /// A [`RecompSwitchEvent`].
    RecompSwitch(RecompSwitchEvent),
    /// A [`WindowUpdateEvent`].
    WindowUpdate(WindowUpdateEvent),
    /// A [`FenceFaultEvent`].
    FenceFault(FenceFaultEvent),
    /// A [`RecoveryEvent`].
    Recovery(RecoveryEvent),
    /// A [`FrameSummary`].
    FrameSummary(FrameSummary),
}

impl RecordedEvent {
    /// Frame the event belongs to.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        match self {
            Self::PhaseBegin(e) => e.frame_index,
            Self::PhaseEnd(e) => e.frame_index,
            Self::Classification(e) => e.frame_index,
            Self::SkipStatic(e) => e.frame_index,
            Self::RecompSwitch(e) => e.frame_index,
            Self::WindowUpdate(e) => e.frame_index,
            Self::FenceFault(e) => e.frame_index,
            Self::Recovery(e) => e.frame_index,
            Self::FrameSummary(s) => s.frame_index,
        }
    }
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
///
/// Stops at the first unknown tag or truncated record.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?;
        self.pos += N;
        bytes.try_into().ok()
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[b]| b)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_count(&mut self) -> Option<usize> {
        usize::try_from(self.read_u32()?).ok()
    }

    fn read_bool(&mut self) -> Option<bool> {
        Some(self.read_u8()? != 0)
    }

    fn read_rect(&mut self) -> Option<Rect> {
        Some(Rect::new(
            self.read_i32()?,
            self.read_i32()?,
            self.read_i32()?,
            self.read_i32()?,
        ))
    }

    fn read_phase(&mut self) -> Option<PhaseKind> {
        from_code(&PHASES, self.read_u8()?)
    }

    fn decode_phase_begin(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseBegin(PhaseBeginEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_phase_end(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::PhaseEnd(PhaseEndEvent {
            frame_index: self.read_u64()?,
            phase: self.read_phase()?,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_classification(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Classification(ClassificationEvent {
            frame_index: self.read_u64()?,
            layers: self.read_count()?,
            device: self.read_count()?,
            client: self.read_count()?,
            secondary: self.read_count()?,
            demoted: self.read_count()?,
            fallback: self.read_bool()?,
        }))
    }

    fn decode_skip_static(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::SkipStatic(SkipStaticEvent {
            frame_index: self.read_u64()?,
            outcome: from_code(&OUTCOMES, self.read_u8()?)?,
            layers: self.read_count()?,
        }))
    }

    fn decode_recomp_switch(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let switch = RecompSwitch {
            from: from_code(&MODES, self.read_u8()?)?,
            to: from_code(&MODES, self.read_u8()?)?,
            reason: from_code(&REASONS, self.read_u8()?)?,
        };
        Some(RecordedEvent::RecompSwitch(RecompSwitchEvent {
            frame_index,
            switch,
            timestamp: HostTime(self.read_u64()?),
        }))
    }

    fn decode_window_update(&mut self) -> Option<RecordedEvent> {
        let frame_index = self.read_u64()?;
        let update = match self.read_u8()? {
            0 => WindowUpdate::Full(from_code(&FULL_REASONS, self.read_u8()?)?),
            _ => WindowUpdate::Partial(self.read_rect()?),
        };
        Some(RecordedEvent::WindowUpdate(WindowUpdateEvent {
            frame_index,
            update,
        }))
    }

    fn decode_fence_fault(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FenceFault(FenceFaultEvent {
            frame_index: self.read_u64()?,
            fault: from_code(&FAULTS, self.read_u8()?)?,
            fd: self.read_i32()?,
        }))
    }

    fn decode_recovery(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Recovery(RecoveryEvent {
            frame_index: self.read_u64()?,
            status: from_code(&STATUSES, self.read_u8()?)?,
        }))
    }

    fn decode_frame_summary(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::FrameSummary(FrameSummary {
            frame_index: self.read_u64()?,
            validate_ns: self.read_u64()?,
            accept_ns: self.read_u64()?,
            present_ns: self.read_u64()?,
            submit_ns: self.read_u64()?,
            skipped_static: self.read_bool()?,
            recovered: self.read_bool()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let tag = self.read_u8()?;
        match tag {
            TAG_PHASE_BEGIN => self.decode_phase_begin(),
            TAG_PHASE_END => self.decode_phase_end(),
            TAG_CLASSIFICATION => self.decode_classification(),
            TAG_SKIP_STATIC => self.decode_skip_static(),
            TAG_RECOMP_SWITCH => self.decode_recomp_switch(),
            TAG_WINDOW_UPDATE => self.decode_window_update(),
            TAG_FENCE_FAULT => self.decode_fence_fault(),
            TAG_RECOVERY => self.decode_recovery(),
            TAG_FRAME_SUMMARY => self.decode_frame_summary(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_a_frame() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 3,
            phase: PhaseKind::Validate,
            timestamp: HostTime(1_000),
        });
        rec.on_classification(&ClassificationEvent {
            frame_index: 3,
            layers: 4,
            device: 2,
            client: 2,
            secondary: 0,
            demoted: 1,
            fallback: false,
        });
        rec.on_skip_static(&SkipStaticEvent {
            frame_index: 3,
            outcome: SkipOutcome::Skip,
            layers: 2,
        });
        rec.on_window_update(&WindowUpdateEvent {
            frame_index: 3,
            update: WindowUpdate::Partial(Rect::new(0, 40, 1080, 80)),
        });
        rec.on_recovery(&RecoveryEvent {
            frame_index: 3,
            status: Status::Internal,
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 5);
        assert!(events.iter().all(|e| e.frame_index() == 3));
        match &events[1] {
            RecordedEvent::Classification(e) => {
                assert_eq!((e.layers, e.device, e.client, e.demoted), (4, 2, 2, 1));
            }
            other => panic!("expected Classification, got {other:?}"),
        }
        match &events[2] {
            RecordedEvent::SkipStatic(e) => assert_eq!(e.outcome, SkipOutcome::Skip),
            other => panic!("expected SkipStatic, got {other:?}"),
        }
        match &events[3] {
            RecordedEvent::WindowUpdate(e) => {
                assert_eq!(e.region(), Some(Rect::new(0, 40, 1080, 80)));
            }
            other => panic!("expected WindowUpdate, got {other:?}"),
        }
        match &events[4] {
            RecordedEvent::Recovery(e) => assert_eq!(e.status, Status::Internal),
            other => panic!("expected Recovery, got {other:?}"),
        }
    }

    #[test]
    fn recomp_switch_keeps_reason() {
        let mut rec = RecorderSink::new();
        rec.on_recomp_switch(&RecompSwitchEvent {
            frame_index: 9,
            switch: RecompSwitch {
                from: RecompMode::DeviceToClient,
                to: RecompMode::ClientToDevice,
                reason: SwitchReason::Priority,
            },
            timestamp: HostTime(42),
        });
        let events: Vec<_> = decode(rec.as_bytes()).collect();
        match &events[..] {
            [RecordedEvent::RecompSwitch(e)] => {
                assert_eq!(e.switch.reason, SwitchReason::Priority);
                assert_eq!(e.switch.to, RecompMode::ClientToDevice);
                assert_eq!(e.timestamp, HostTime(42));
            }
            other => panic!("expected one RecompSwitch, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_stops_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_fence_fault(&FenceFaultEvent {
            frame_index: 1,
            fault: FenceFault::Leftover,
            fd: 17,
        });
        rec.on_frame_summary(&FrameSummary {
            frame_index: 1,
            validate_ns: 10,
            accept_ns: 0,
            present_ns: 30,
            submit_ns: 5,
            skipped_static: false,
            recovered: false,
        });
        let bytes = rec.into_bytes();
        let events: Vec<_> = decode(&bytes[..bytes.len() - 1]).collect();
        assert_eq!(events.len(), 1, "summary is cut short");
        assert!(matches!(events[0], RecordedEvent::FenceFault(FenceFaultEvent { fd: 17, .. })));
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0);
    }
}
