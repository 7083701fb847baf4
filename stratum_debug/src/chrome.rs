// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use stratum_core::window_update::WindowUpdate;

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
/// Phases become duration slices; everything else is an instant event on the
/// same track. `pid` is the display id passed in.
pub fn export(bytes: &[u8], display: u64, writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();
    // Instant events carry no timestamp of their own; pin them to the most
    // recent phase boundary.
    let mut last_ts = 0.0;

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::PhaseBegin(e) => {
                last_ts = ns_to_us(e.timestamp.nanos());
                events.push(json!({
                    "ph": "B",
                    "name": e.phase.as_str(),
                    "cat": "Frame",
                    "ts": last_ts,
                    "pid": display,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::PhaseEnd(e) => {
                last_ts = ns_to_us(e.timestamp.nanos());
                events.push(json!({
                    "ph": "E",
                    "name": e.phase.as_str(),
                    "cat": "Frame",
                    "ts": last_ts,
                    "pid": display,
                    "tid": 0,
                    "args": {
                        "frame_index": e.frame_index,
                    }
                }));
            }
            RecordedEvent::Classification(e) => {
                events.push(instant(
                    "Classification",
                    "Validate",
                    last_ts,
                    display,
                    json!({
                        "frame_index": e.frame_index,
                        "layers": e.layers,
                        "device": e.device,
                        "client": e.client,
                        "secondary": e.secondary,
                        "demoted": e.demoted,
                        "fallback": e.fallback,
                    }),
                ));
            }
            RecordedEvent::SkipStatic(e) => {
                events.push(instant(
                    "SkipStatic",
                    "Validate",
                    last_ts,
                    display,
                    json!({
                        "frame_index": e.frame_index,
                        "outcome": e.outcome.as_str(),
                        "layers": e.layers,
                    }),
                ));
            }
            RecordedEvent::RecompSwitch(e) => {
                last_ts = ns_to_us(e.timestamp.nanos());
                events.push(instant(
                    "RecompSwitch",
                    "Validate",
                    last_ts,
                    display,
                    json!({
                        "frame_index": e.frame_index,
                        "from": e.switch.from.as_str(),
                        "to": e.switch.to.as_str(),
                        "reason": e.switch.reason.as_str(),
                    }),
                ));
            }
            RecordedEvent::WindowUpdate(e) => {
                let args = match e.update {
                    WindowUpdate::Full(reason) => json!({
                        "frame_index": e.frame_index,
                        "full": reason.as_str(),
                    }),
                    WindowUpdate::Partial(r) => json!({
                        "frame_index": e.frame_index,
                        "region": [r.left, r.top, r.right, r.bottom],
                    }),
                };
                events.push(instant("WindowUpdate", "Present", last_ts, display, args));
            }
            RecordedEvent::FenceFault(e) => {
                events.push(instant(
                    "FenceFault",
                    "Fence",
                    last_ts,
                    display,
                    json!({
                        "frame_index": e.frame_index,
                        "fault": e.fault.as_str(),
                        "fd": e.fd,
                    }),
                ));
            }
            RecordedEvent::Recovery(e) => {
                events.push(instant(
                    "Recovery",
                    "Present",
                    last_ts,
                    display,
                    json!({
                        "frame_index": e.frame_index,
                        "status": format!("{:?}", e.status),
                        "code": e.status.code(),
                    }),
                ));
            }
            RecordedEvent::FrameSummary(s) => {
                events.push(instant(
                    "FrameSummary",
                    "Summary",
                    last_ts,
                    display,
                    json!({
                        "frame_index": s.frame_index,
                        "validate_us": ns_to_us(s.validate_ns),
                        "accept_us": ns_to_us(s.accept_ns),
                        "present_us": ns_to_us(s.present_ns),
                        "submit_us": ns_to_us(s.submit_ns),
                        "skipped_static": s.skipped_static,
                        "recovered": s.recovered,
                    }),
                ));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events).map_err(io::Error::other)
}

fn instant(name: &str, cat: &str, ts: f64, display: u64, args: Value) -> Value {
    json!({
        "ph": "i",
        "name": name,
        "cat": cat,
        "ts": ts,
        "pid": display,
        "tid": 0,
        "s": "t",
        "args": args,
    })
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use stratum_core::time::HostTime;
    use stratum_core::trace::{
        FrameSummary, PhaseBeginEvent, PhaseEndEvent, PhaseKind, TraceSink, WindowUpdateEvent,
    };
    use stratum_core::window_update::FullFrameReason;

    fn exported(rec: &RecorderSink) -> Vec<Value> {
        let mut out = Vec::new();
        export(rec.as_bytes(), 0, &mut out).unwrap();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        parsed.as_array().cloned().unwrap()
    }

    #[test]
    fn phases_become_slices() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 0,
            phase: PhaseKind::Validate,
            timestamp: HostTime(2_000),
        });
        rec.on_phase_end(&PhaseEndEvent {
            frame_index: 0,
            phase: PhaseKind::Validate,
            timestamp: HostTime(5_000),
        });
        let events = exported(&rec);
        assert_eq!(events.len(), 2, "one slice begin and end");
        assert_eq!(events[0]["ph"], "B", "begin first");
        assert_eq!(events[1]["ph"], "E", "end second");
        assert_eq!(events[0]["name"], PhaseKind::Validate.as_str(), "phase name");
        assert_eq!(events[1]["ts"].as_f64(), Some(5.0), "microseconds");
    }

    #[test]
    fn instants_follow_the_last_phase_boundary() {
        let mut rec = RecorderSink::new();
        rec.on_phase_begin(&PhaseBeginEvent {
            frame_index: 4,
            phase: PhaseKind::Present,
            timestamp: HostTime(10_000),
        });
        rec.on_window_update(&WindowUpdateEvent {
            frame_index: 4,
            update: WindowUpdate::Full(FullFrameReason::ClientTarget),
        });
        rec.on_frame_summary(&FrameSummary {
            frame_index: 4,
            validate_ns: 0,
            accept_ns: 0,
            present_ns: 3_000,
            submit_ns: 1_000,
            skipped_static: true,
            recovered: false,
        });
        let events = exported(&rec);
        assert_eq!(events.len(), 3, "all events exported");
        assert_eq!(events[1]["ph"], "i", "instant");
        assert_eq!(events[1]["ts"].as_f64(), Some(10.0), "pinned to phase begin");
        assert_eq!(
            events[1]["args"]["full"],
            FullFrameReason::ClientTarget.as_str(),
            "reason in args"
        );
        assert_eq!(events[2]["args"]["skipped_static"], true, "summary flags");
        assert_eq!(events[2]["args"]["present_us"].as_f64(), Some(3.0), "summary timing");
    }

    #[test]
    fn empty_recording_is_an_empty_array() {
        let rec = RecorderSink::new();
        assert!(exported(&rec).is_empty(), "no events");
    }
}
