// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fence accounting and mock collaborators for exercising stratum displays.
//!
//! [`Harness`] wires a [`Display`] to a [`MockDriver`], a [`MockResources`]
//! and a [`ManualClock`], with every fence drawn from one [`FenceLedger`].
//! Tests drive whole frames with [`Harness::frame`] and check the ledger for
//! leaked or double-closed fences afterwards.

pub mod ledger;
pub mod mock;

use std::sync::Arc;

use parking_lot::Mutex;

use stratum_core::classify::CompositionPath;
use stratum_core::error::{ConfigError, Error};
use stratum_core::fence::Fence;
use stratum_core::format::{Dataspace, PixelFormat};
use stratum_core::geometry::Rect;
use stratum_core::image::BufferHandle;
use stratum_core::time::{Duration, HostTime};
use stratum_core::trace::{
    ClassificationEvent, FenceFaultEvent, FrameSummary, PhaseBeginEvent, PhaseEndEvent,
    RecompSwitchEvent, RecoveryEvent, SkipStaticEvent, TraceSink, WindowUpdateEvent,
};
use stratum_core::{Display, DisplayConfig, LayerId, Validation};

pub use ledger::{FenceLedger, LedgerReport};
pub use mock::{DeliveredFrame, DriverLog, ManualClock, MockDriver, MockResources};

/// Client target buffers are numbered from here.
pub const TARGET_BUFFER_BASE: u64 = 1 << 40;

/// Outcome of one [`Harness::frame`].
#[derive(Debug)]
pub struct FrameReport {
    /// What validate reported.
    pub validation: Validation,
    /// The previous client target was reused.
    pub skipped_static: bool,
    /// The driver received a new configuration.
    pub submitted: bool,
    /// Release fences handed back to layers (already closed).
    pub released: usize,
    /// The frame's retire fence.
    pub retire: Option<Fence>,
}

/// Forwards trace events to a sink the test keeps a handle to.
#[derive(Debug)]
pub struct SharedSink<S>(pub Arc<Mutex<S>>);

impl<S: TraceSink> TraceSink for SharedSink<S> {
    fn on_phase_begin(&mut self, e: &PhaseBeginEvent) {
        self.0.lock().on_phase_begin(e);
    }

    fn on_phase_end(&mut self, e: &PhaseEndEvent) {
        self.0.lock().on_phase_end(e);
    }

    fn on_classification(&mut self, e: &ClassificationEvent) {
        self.0.lock().on_classification(e);
    }

    fn on_skip_static(&mut self, e: &SkipStaticEvent) {
        self.0.lock().on_skip_static(e);
    }

    fn on_recomp_switch(&mut self, e: &RecompSwitchEvent) {
        self.0.lock().on_recomp_switch(e);
    }

    fn on_window_update(&mut self, e: &WindowUpdateEvent) {
        self.0.lock().on_window_update(e);
    }

    fn on_fence_fault(&mut self, e: &FenceFaultEvent) {
        self.0.lock().on_fence_fault(e);
    }

    fn on_recovery(&mut self, e: &RecoveryEvent) {
        self.0.lock().on_recovery(e);
    }

    fn on_frame_summary(&mut self, s: &FrameSummary) {
        self.0.lock().on_frame_summary(s);
    }
}

#[derive(Clone, Copy, Debug)]
struct Tracked {
    id: LayerId,
    width: u32,
    height: u32,
}

/// A display wired to mocks, plus the handles to inspect them.
#[derive(Debug)]
pub struct Harness {
    /// The display under test.
    pub display: Display,
    ledger: Arc<FenceLedger>,
    clock: ManualClock,
    driver: Arc<Mutex<DriverLog>>,
    layers: Mutex<Vec<Tracked>>,
    targets: Mutex<u64>,
}

impl Harness {
    /// A display whose layers all fit on overlays.
    pub fn new(config: DisplayConfig) -> Result<Self, ConfigError> {
        Self::with_resources(config, |r| r)
    }

    /// A display with scripted resources.
    pub fn with_resources(
        config: DisplayConfig,
        script: impl FnOnce(MockResources) -> MockResources,
    ) -> Result<Self, ConfigError> {
        let ledger = FenceLedger::new();
        let clock = ManualClock::new(HostTime(1));
        let (driver, log) = MockDriver::new(Arc::clone(&ledger));
        let resources = script(MockResources::new(Arc::clone(&ledger), config.xres, config.yres));
        let display = Display::new(
            config,
            Box::new(driver),
            Box::new(resources),
            Box::new(clock.clone()),
        )?;
        Ok(Self {
            display,
            ledger,
            clock,
            driver: log,
            layers: Mutex::new(Vec::new()),
            targets: Mutex::new(0),
        })
    }

    /// The shared fence ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<FenceLedger> {
        &self.ledger
    }

    /// The driver's log and failure script.
    #[must_use]
    pub fn driver(&self) -> parking_lot::MutexGuard<'_, DriverLog> {
        self.driver.lock()
    }

    /// Moves the display's clock forward.
    pub fn advance(&self, d: Duration) {
        self.clock.advance(d);
    }

    /// Routes the display's trace events into `sink` and returns a handle to
    /// it.
    pub fn attach_sink<S: TraceSink + Send + 'static>(&self, sink: S) -> Arc<Mutex<S>> {
        let shared = Arc::new(Mutex::new(sink));
        self.display
            .set_trace_sink(Some(Box::new(SharedSink(Arc::clone(&shared)))));
        shared
    }

    /// Creates a layer showing an unscaled buffer at `frame`.
    pub fn layer(&self, z: u32, frame: Rect, buffer_id: u64) -> Result<LayerId, Error> {
        let size = Rect::from_xywh(0, 0, frame.width(), frame.height());
        self.scaled_layer(z, frame, size, buffer_id)
    }

    /// Creates a layer showing `crop` of a crop-sized buffer at `frame`.
    pub fn scaled_layer(
        &self,
        z: u32,
        frame: Rect,
        crop: Rect,
        buffer_id: u64,
    ) -> Result<LayerId, Error> {
        let id = self.display.create_layer();
        self.display.set_layer_z_order(id, z)?;
        self.display.set_layer_frame(id, frame)?;
        self.display.set_layer_crop(id, crop)?;
        self.layers.lock().push(Tracked {
            id,
            width: crop.right.unsigned_abs(),
            height: crop.bottom.unsigned_abs(),
        });
        self.flip(id, buffer_id)?;
        Ok(id)
    }

    /// Attaches a new buffer with a fresh acquire fence.
    pub fn flip(&self, id: LayerId, buffer_id: u64) -> Result<(), Error> {
        let tracked = self.layers.lock().iter().find(|t| t.id == id).copied();
        let (width, height) = tracked.map_or((1, 1), |t| (t.width, t.height));
        let buffer = BufferHandle::packed(buffer_id, width, height, PixelFormat::Rgba8888);
        self.display
            .set_layer_buffer(id, Some(buffer), Some(self.ledger.make()))
    }

    /// Destroys a layer.
    pub fn destroy(&self, id: LayerId) -> Result<(), Error> {
        self.layers.lock().retain(|t| t.id != id);
        self.display.destroy_layer(id)
    }

    fn needs_client_target(&self) -> Result<bool, Error> {
        let ids: Vec<LayerId> = self.layers.lock().iter().map(|t| t.id).collect();
        for id in ids {
            if self.display.layer_path(id)? == CompositionPath::Client {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn client_target(&self) -> BufferHandle {
        let mut n = self.targets.lock();
        *n += 1;
        let config = self.display.config();
        BufferHandle::packed(
            TARGET_BUFFER_BASE + *n,
            config.xres,
            config.yres,
            PixelFormat::Rgba8888,
        )
    }

    /// Runs validate, accept and present the way a compositor client would.
    ///
    /// A fresh client target is supplied whenever layers are composed by the
    /// client and the previous target is not being reused. Release fences
    /// handed back to layers are closed before returning.
    pub fn frame(&self) -> Result<FrameReport, Error> {
        let validation = self.display.validate();
        self.display.accept_changes()?;
        let skipped_static = self.display.is_skipping_static();
        if !skipped_static && self.needs_client_target()? {
            self.display.set_client_target(
                Some(self.client_target()),
                Some(self.ledger.make()),
                Dataspace::UNKNOWN,
            )?;
        }

        let before = self.driver.lock().frames.len();
        let result = self.display.present();
        let submitted = self.driver.lock().frames.len() > before;
        let released = self.display.take_release_fences().len();
        tracing::debug!(
            frame = self.display.frame_index(),
            submitted,
            released,
            skipped_static,
            "harness frame"
        );
        Ok(FrameReport {
            validation,
            skipped_static,
            submitted,
            released,
            retire: result?,
        })
    }

    /// Tears the display down and returns the final ledger state.
    #[must_use]
    pub fn finish(self) -> LedgerReport {
        let Self {
            display, ledger, ..
        } = self;
        drop(display);
        ledger.report()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::error::Status;
    use stratum_core::image::Priority;
    use stratum_core::recomp::{RecompMode, SwitchReason};
    use stratum_core::resource::Placement;
    use stratum_core::window_update::{FullFrameReason, WindowUpdate};
    use stratum_debug::recorder::{RecordedEvent, RecorderSink, decode};

    fn full() -> Rect {
        Rect::new(0, 0, 100, 100)
    }

    fn recorded(sink: &Arc<Mutex<RecorderSink>>) -> Vec<RecordedEvent> {
        decode(sink.lock().as_bytes()).collect()
    }

    #[test]
    fn static_client_layers_stop_submitting() {
        stratum_debug::log::init_for_tests();
        let h = Harness::with_resources(DisplayConfig::primary(100, 100), |r| {
            r.with_default(Placement::ClientOnly)
        })
        .unwrap();
        h.layer(0, full(), 1).unwrap();
        h.layer(1, Rect::new(0, 0, 50, 50), 2).unwrap();
        h.layer(2, Rect::new(50, 50, 100, 100), 3).unwrap();

        let skipped: Vec<bool> = (0..5)
            .map(|_| h.frame().unwrap().skipped_static)
            .collect();
        assert_eq!(skipped, [false, false, true, true, true], "skip engages on the third frame");
        assert_eq!(h.driver().frames.len(), 2, "reused frames are not resubmitted");

        let report = h.finish();
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn scaled_layer_refreshes_whole_panel() {
        let h = Harness::new(DisplayConfig::primary(100, 100)).unwrap();
        let sink = h.attach_sink(RecorderSink::new());
        let id = h.scaled_layer(0, full(), Rect::new(0, 0, 50, 50), 1).unwrap();
        h.frame().unwrap();

        h.flip(id, 2).unwrap();
        h.display.set_layer_damage(id, &[Rect::new(0, 0, 10, 10)]).unwrap();
        assert!(h.frame().unwrap().submitted, "new buffer is submitted");

        let updates: Vec<WindowUpdate> = recorded(&sink)
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::WindowUpdate(u) => Some(u.update),
                _ => None,
            })
            .collect();
        assert_eq!(
            updates,
            [
                WindowUpdate::Full(FullFrameReason::GeometryChanged),
                WindowUpdate::Full(FullFrameReason::Scaled),
            ],
            "scaling forces a full refresh"
        );
        assert_eq!(h.driver().frames[1].update, None, "no update region submitted");
    }

    #[test]
    fn damage_narrows_refresh_to_aligned_region() {
        let h = Harness::new(DisplayConfig::primary(100, 100)).unwrap();
        let id = h.layer(0, full(), 1).unwrap();
        h.frame().unwrap();

        h.flip(id, 2).unwrap();
        h.display
            .set_layer_damage(id, &[Rect::from_xywh(11, 21, 30, 9)])
            .unwrap();
        h.frame().unwrap();

        let driver = h.driver();
        assert_eq!(driver.frames[0].update, None, "first frame is full");
        assert_eq!(
            driver.frames[1].update,
            Some(Rect::new(10, 20, 42, 30)),
            "damage widened to the 2x2 block"
        );
    }

    #[test]
    fn max_layer_keeps_secondary_to_itself() {
        let h = Harness::with_resources(DisplayConfig::minimal(100, 100), |r| {
            r.with_secondary()
                .with_buffer(1, Placement::Secondary)
                .with_buffer(2, Placement::Secondary)
        })
        .unwrap();
        let max = h.layer(0, full(), 1).unwrap();
        let high = h.layer(1, Rect::new(10, 10, 50, 50), 2).unwrap();
        h.display.set_layer_priority(max, Priority::Max).unwrap();
        h.display.set_layer_priority(high, Priority::High).unwrap();

        let report = h.frame().unwrap();
        assert_eq!(h.display.layer_path(max).unwrap(), CompositionPath::Secondary, "max alone");
        assert_eq!(h.display.layer_path(high).unwrap(), CompositionPath::Device, "high back on a plane");
        assert!(report.submitted, "frame submitted");
        assert_eq!(report.released, 2, "both layers get a release fence");
        drop(report);

        let ledger = h.finish();
        assert!(ledger.is_clean(), "{ledger:?}");
    }

    #[test]
    fn no_fence_leaks_across_frames_and_recovery() {
        let h = Harness::new(DisplayConfig::minimal(100, 100)).unwrap();
        let sink = h.attach_sink(RecorderSink::new());
        let a = h.layer(0, full(), 1).unwrap();
        let b = h.layer(1, Rect::new(20, 20, 60, 60), 2).unwrap();
        let first = h.frame().unwrap();
        assert_eq!(first.released, 2, "each overlay layer gets its release");
        drop(first);

        h.flip(a, 3).unwrap();
        h.flip(b, 4).unwrap();
        h.driver().fail_next = 1;
        let err = h.frame().unwrap_err();
        assert_eq!(err.status(), Status::Internal, "driver failure is internal");
        assert_eq!(h.driver().panics, 1, "driver put into its fault state");
        assert!(
            h.ledger().report().double_closed.is_empty(),
            "recovery closes each fence once"
        );

        h.flip(a, 5).unwrap();
        h.flip(b, 6).unwrap();
        assert!(h.frame().unwrap().submitted, "next frame goes through");

        let recoveries = recorded(&sink)
            .iter()
            .filter(|e| matches!(e, RecordedEvent::Recovery(_)))
            .count();
        assert_eq!(recoveries, 1, "one recovery traced");
        let report = h.finish();
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn failed_dups_leave_client_layers_without_release() {
        let h = Harness::with_resources(DisplayConfig::minimal(100, 100), |r| {
            r.with_default(Placement::ClientOnly)
        })
        .unwrap();
        h.layer(0, full(), 1).unwrap();
        h.layer(1, full(), 2).unwrap();
        h.ledger().set_fail_dup(true);

        let report = h.frame().unwrap();
        assert!(report.submitted, "frame still submitted");
        assert_eq!(report.released, 0, "no release fence could be shared");
        drop(report);

        let ledger = h.finish();
        assert!(ledger.is_clean(), "{ledger:?}");
    }

    #[test]
    fn recomposition_switches_are_rate_limited() {
        let config = DisplayConfig {
            handle_low_fps_layers: false,
            skip_static: false,
            ..DisplayConfig::primary(100, 100)
        };
        let h = Harness::new(config).unwrap();
        let sink = h.attach_sink(RecorderSink::new());
        h.layer(0, full(), 1).unwrap();
        h.layer(1, full(), 2).unwrap();
        h.frame().unwrap();

        // No updates for a second and a half.
        h.advance(Duration::from_millis(1500));
        h.frame().unwrap();
        assert_eq!(h.display.recomposition_mode(), RecompMode::DeviceToClient, "slow frame");
        h.frame().unwrap();
        assert_eq!(h.display.recomposition_mode(), RecompMode::ClientToDevice, "update returns");

        h.advance(Duration::from_millis(100));
        h.frame().unwrap();
        assert_eq!(
            h.display.recomposition_mode(),
            RecompMode::ClientToDevice,
            "held inside the rate limit"
        );

        h.advance(Duration::from_millis(200));
        h.frame().unwrap();
        assert_eq!(h.display.recomposition_mode(), RecompMode::DeviceToClient, "limit elapsed");

        let switches: Vec<_> = recorded(&sink)
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::RecompSwitch(s) => Some(s),
                _ => None,
            })
            .collect();
        let reasons: Vec<SwitchReason> = switches.iter().map(|s| s.switch.reason).collect();
        assert_eq!(
            reasons,
            [SwitchReason::LowFps, SwitchReason::HighFps, SwitchReason::LowFps],
            "three switches"
        );
        let gap = switches[2].timestamp.saturating_duration_since(switches[1].timestamp);
        assert!(gap >= config.recomp_rate_limit, "switches spaced by the limit");
        assert!(h.finish().is_clean(), "no fence leaked");
    }

    #[test]
    fn trace_exports_as_chrome_json() {
        let h = Harness::new(DisplayConfig::minimal(100, 100)).unwrap();
        let sink = h.attach_sink(RecorderSink::new());
        h.layer(0, full(), 1).unwrap();
        h.frame().unwrap();

        let mut out = Vec::new();
        stratum_debug::chrome::export(sink.lock().as_bytes(), 0, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text.matches("\"ph\": \"B\"").count(),
            text.matches("\"ph\": \"E\"").count(),
            "balanced slices"
        );
        assert!(text.contains("FrameSummary"), "summary exported");
    }
}
