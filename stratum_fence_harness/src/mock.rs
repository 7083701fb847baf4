// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Scriptable stand-ins for the display's collaborators.
//!
//! Every fence the mocks create comes from a shared [`FenceLedger`], so the
//! ledger sees the whole frame: layer acquires, driver release and retire
//! fences, and secondary-compositor outputs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use stratum_core::driver::{ColorMode, DisplayInterface, PowerMode};
use stratum_core::error::{DriverError, ResourceError};
use stratum_core::fence::Fence;
use stratum_core::format::PixelFormat;
use stratum_core::geometry::{Rect, Transform};
use stratum_core::image::{BufferHandle, ImageInfo};
use stratum_core::plane::{WinConfigSet, WinConfigSnapshot};
use stratum_core::resource::{
    M2mOutput, M2mSource, MppId, Placement, ResourceManager, Restriction,
};
use stratum_core::time::{Clock, Duration, HostTime};

use crate::ledger::FenceLedger;

/// Buffer ids at or above this value belong to secondary-compositor outputs.
pub const SECONDARY_BUFFER_BASE: u64 = 1 << 32;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// A [`Clock`] that only moves when told to.
///
/// Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    /// Creates a clock reading `start`.
    #[must_use]
    pub fn new(start: HostTime) -> Self {
        Self(Arc::new(AtomicU64::new(start.nanos())))
    }

    /// Moves the clock forward.
    pub fn advance(&self, d: Duration) {
        self.0.fetch_add(d.nanos(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(self.0.load(Ordering::SeqCst))
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// One submission as the driver saw it.
#[derive(Clone, Debug)]
pub struct DeliveredFrame {
    /// Window and update-region state.
    pub config: WinConfigSnapshot,
    /// Partial-update region, if one was set.
    pub update: Option<Rect>,
    /// Acquire fences the driver consumed.
    pub acquired: usize,
}

/// Everything the mock driver recorded, plus its failure script.
#[derive(Debug, Default)]
pub struct DriverLog {
    /// Successful submissions, oldest first.
    pub frames: Vec<DeliveredFrame>,
    /// Number of upcoming submissions to reject.
    pub fail_next: usize,
    /// Rejected submissions.
    pub rejected: usize,
    /// Times the driver was put into its fault state.
    pub panics: usize,
    /// Times the panel was blanked.
    pub clears: usize,
    /// Last requested power mode.
    pub power: PowerMode,
    /// Whether panel self-refresh is currently off.
    pub self_refresh_disabled: bool,
}

/// A [`DisplayInterface`] that fills release and retire fences from a ledger.
#[derive(Debug)]
pub struct MockDriver {
    ledger: Arc<FenceLedger>,
    log: Arc<Mutex<DriverLog>>,
}

impl MockDriver {
    /// Creates a driver and returns the shared log alongside it.
    #[must_use]
    pub fn new(ledger: Arc<FenceLedger>) -> (Self, Arc<Mutex<DriverLog>>) {
        let log = Arc::new(Mutex::new(DriverLog::default()));
        (
            Self {
                ledger,
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl DisplayInterface for MockDriver {
    fn deliver_win_config(&mut self, set: &mut WinConfigSet) -> Result<(), DriverError> {
        let mut log = self.log.lock();
        if log.fail_next > 0 {
            log.fail_next -= 1;
            log.rejected += 1;
            tracing::debug!("mock driver rejecting frame");
            return Err(DriverError::Rejected { code: -22 });
        }
        let mut acquired = 0;
        for desc in &mut set.windows {
            if desc.acquire.take().is_some() {
                acquired += 1;
            }
            if desc.config.state.is_visible() {
                desc.release = Some(self.ledger.make());
            }
        }
        set.retire = Some(self.ledger.make());
        log.frames.push(DeliveredFrame {
            config: set.snapshot(),
            update: set.update_region(),
            acquired,
        });
        Ok(())
    }

    fn set_force_panic(&mut self) {
        self.log.lock().panics += 1;
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), DriverError> {
        self.log.lock().power = mode;
        Ok(())
    }

    fn set_vsync_enabled(&mut self, _enabled: bool) -> Result<(), DriverError> {
        Ok(())
    }

    fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), DriverError> {
        match mode {
            ColorMode::Native | ColorMode::Srgb => Ok(()),
            ColorMode::DisplayP3 => Err(DriverError::Unsupported),
        }
    }

    fn clear_display(&mut self) -> Result<(), DriverError> {
        self.log.lock().clears += 1;
        Ok(())
    }

    fn disable_self_refresh(&mut self, disable: bool) {
        self.log.lock().self_refresh_disabled = disable;
    }

    fn set_cursor_position(&mut self, _x: i32, _y: i32) -> Result<(), DriverError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A [`ResourceManager`] with scripted placement and an optional secondary
/// compositor.
///
/// Placement is decided per buffer id, with a default for unlisted buffers.
/// Bufferless layers always go to an overlay. Overlay channels are numbered
/// after their window.
#[derive(Debug)]
pub struct MockResources {
    ledger: Arc<FenceLedger>,
    panel: Rect,
    default: Placement,
    by_buffer: HashMap<u64, Placement>,
    secondary: bool,
    next_m2m: u32,
    jobs: u64,
    dst_acquire: Vec<(MppId, Fence)>,
}

impl MockResources {
    /// Everything goes to an overlay; no secondary compositor.
    #[must_use]
    pub fn new(ledger: Arc<FenceLedger>, xres: u32, yres: u32) -> Self {
        let w = i32::try_from(xres).unwrap_or(i32::MAX);
        let h = i32::try_from(yres).unwrap_or(i32::MAX);
        Self {
            ledger,
            panel: Rect::new(0, 0, w, h),
            default: Placement::Overlay,
            by_buffer: HashMap::new(),
            secondary: false,
            next_m2m: 0,
            jobs: 0,
            dst_acquire: Vec::new(),
        }
    }

    /// Sets the placement for buffers without an override.
    #[must_use]
    pub fn with_default(mut self, placement: Placement) -> Self {
        self.default = placement;
        self
    }

    /// Places one buffer id.
    #[must_use]
    pub fn with_buffer(mut self, buffer_id: u64, placement: Placement) -> Self {
        self.by_buffer.insert(buffer_id, placement);
        self
    }

    /// Enables the secondary compositor.
    #[must_use]
    pub fn with_secondary(mut self) -> Self {
        self.secondary = true;
        self
    }

    fn output_buffer(&mut self) -> BufferHandle {
        self.jobs += 1;
        BufferHandle::packed(
            SECONDARY_BUFFER_BASE + self.jobs,
            self.panel.width().unsigned_abs(),
            self.panel.height().unsigned_abs(),
            PixelFormat::Rgba8888,
        )
    }
}

impl ResourceManager for MockResources {
    fn check_scenario(&mut self, _layer_count: usize) -> Result<(), ResourceError> {
        Ok(())
    }

    fn placement(&self, image: &ImageInfo) -> Placement {
        let Some(buffer) = image.buffer else {
            return Placement::Overlay;
        };
        self.by_buffer.get(&buffer.id).copied().unwrap_or(self.default)
    }

    fn secondary_assignable(&self, image: &ImageInfo) -> bool {
        self.secondary && image.buffer.is_some()
    }

    fn assign_overlay(&mut self, window: usize, _image: &ImageInfo) -> Result<MppId, ResourceError> {
        u32::try_from(window)
            .map(MppId)
            .map_err(|_| ResourceError::NoChannel { window })
    }

    fn assign_m2m(&mut self, sources: usize) -> Result<MppId, ResourceError> {
        if !self.secondary {
            return Err(ResourceError::SecondaryUnavailable { sources });
        }
        self.next_m2m += 1;
        Ok(MppId(100 + self.next_m2m))
    }

    fn restriction(&self, _mpp: MppId, _format: PixelFormat) -> Restriction {
        Restriction::UNCONSTRAINED
    }

    fn process(&mut self, mpp: MppId, sources: Vec<M2mSource>) -> Result<M2mOutput, ResourceError> {
        let Some(first) = sources.first().map(|s| s.image) else {
            return Err(ResourceError::Processing { mpp: mpp.0, code: -1 });
        };
        let image = ImageInfo {
            buffer: Some(self.output_buffer()),
            crop: self.panel,
            frame: self.panel,
            format: PixelFormat::Rgba8888,
            transform: Transform::empty(),
            ..first
        };
        // The job has read its inputs; their acquire fences close here.
        let src_release = sources.iter().map(|_| Some(self.ledger.make())).collect();
        drop(sources);
        Ok(M2mOutput {
            image,
            acquire: Some(self.ledger.make()),
            src_release,
        })
    }

    fn set_dst_acquire(&mut self, mpp: MppId, fence: Option<Fence>) {
        self.dst_acquire.retain(|(m, _)| *m != mpp);
        if let Some(fence) = fence {
            self.dst_acquire.push((mpp, fence));
        }
    }

    fn drop_pending_fences(&mut self) {
        self.dst_acquire.clear();
    }

    fn reset_assigned(&mut self, _force: bool) {
        self.next_m2m = 0;
    }

    fn deliver_performance_info(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::format::Dataspace;
    use stratum_core::geometry::{BlendMode, Color};
    use stratum_core::image::Priority;

    fn image(buffer: Option<BufferHandle>) -> ImageInfo {
        ImageInfo {
            buffer,
            crop: Rect::new(0, 0, 10, 10),
            frame: Rect::new(0, 0, 10, 10),
            format: PixelFormat::Rgba8888,
            dataspace: Dataspace::UNKNOWN,
            transform: Transform::empty(),
            blend: BlendMode::Premultiplied,
            plane_alpha: 1.0,
            color: Color::default(),
            priority: Priority::Normal,
        }
    }

    #[test]
    fn placement_by_buffer() {
        let ledger = FenceLedger::new();
        let res = MockResources::new(ledger, 100, 100)
            .with_default(Placement::ClientOnly)
            .with_buffer(7, Placement::Secondary);
        let buf = |id| Some(BufferHandle::packed(id, 10, 10, PixelFormat::Rgba8888));
        assert_eq!(res.placement(&image(buf(7))), Placement::Secondary, "override");
        assert_eq!(res.placement(&image(buf(8))), Placement::ClientOnly, "default");
        assert_eq!(res.placement(&image(None)), Placement::Overlay, "color layer");
    }

    #[test]
    fn processing_swaps_fences() {
        let ledger = FenceLedger::new();
        let mut res = MockResources::new(Arc::clone(&ledger), 100, 100).with_secondary();
        let mpp = res.assign_m2m(2).unwrap();
        let sources = (0..2)
            .map(|i| M2mSource {
                layer_index: i,
                image: image(Some(BufferHandle::packed(1, 10, 10, PixelFormat::Rgba8888))),
                acquire: Some(ledger.make()),
            })
            .collect();
        let out = res.process(mpp, sources).unwrap();
        assert_eq!(out.src_release.len(), 2, "one release per source");
        assert_eq!(out.image.frame, Rect::new(0, 0, 100, 100), "panel-sized output");
        // Inputs are closed; the output acquire and two source releases remain.
        assert_eq!(ledger.open_count(), 3, "inputs closed, outputs open");
        res.set_dst_acquire(mpp, Some(ledger.make()));
        res.drop_pending_fences();
        drop(out);
        assert!(ledger.report().is_clean(), "{:?}", ledger.report());
    }

    #[test]
    fn driver_rejects_on_script() {
        let ledger = FenceLedger::new();
        let (mut driver, log) = MockDriver::new(Arc::clone(&ledger));
        log.lock().fail_next = 1;
        let mut set = WinConfigSet::new();
        assert!(driver.deliver_win_config(&mut set).is_err(), "scripted failure");
        assert!(driver.deliver_win_config(&mut set).is_ok(), "next one passes");
        assert!(set.retire.is_some(), "retire filled");
        assert_eq!(log.lock().frames.len(), 1, "only the accepted frame is logged");
    }

    #[test]
    fn clock_clones_share_time() {
        let clock = ManualClock::new(HostTime(5));
        let other = clock.clone();
        clock.advance(Duration::from_millis(1));
        assert_eq!(other.now(), HostTime(1_000_005), "shared counter");
    }
}
