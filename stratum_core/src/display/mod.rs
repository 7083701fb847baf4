// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-display frame pipeline.
//!
//! A [`Display`] owns the layers handed to it by the compositor client and
//! drives each frame through three calls:
//!
//! 1. [`validate`](Display::validate) classifies layers onto hardware windows,
//!    the client target, and the secondary compositor, and decides whether
//!    the client target can be reused (skip-static).
//! 2. [`accept_changes`](Display::accept_changes) commits the resolved
//!    composition types.
//! 3. [`present`](Display::present) builds the window descriptors, computes
//!    the partial-update region, submits the frame to the driver, and hands
//!    release fences back to the layers.
//!
//! `present` may also run straight from [`FrameState::None`] or
//! [`FrameState::Presented`] when nothing changed since the previous frame
//! (skip-validate).
//!
//! # Locking
//!
//! Frame state sits behind one [`Mutex`] and the layer store behind another.
//! Layer calls take only the layer lock; frame calls take the display lock
//! first and then the layer lock.

mod present;
mod validate;

pub use validate::{DisplayRequest, Validation};

use core::fmt;

use parking_lot::Mutex;

use crate::classify::{Classification, CompositionPath, TargetRange, WindowPlan};
use crate::config::DisplayConfig;
use crate::driver::{ColorMode, ColorTransform, DisplayInterface, GeometryFlags, PowerMode};
use crate::error::{ConfigError, Error};
use crate::fence::{Fence, FenceRole, close_slot};
use crate::format::{Dataspace, PixelFormat};
use crate::geometry::{BlendMode, Color, Rect, Transform};
use crate::image::{BufferHandle, ImageInfo, Priority};
use crate::layer::{CompositionType, LayerFlags, LayerId, LayerStore};
use crate::plane::WinConfigSnapshot;
use crate::recomp::{RecompController, RecompInput, RecompMode, RecompSwitch};
use crate::resource::{MppId, ResourceManager};
use crate::skip_static::SkipStatic;
use crate::time::{Clock, HostTime};
use crate::trace::{FrameSummaryBuilder, PhaseBeginEvent, PhaseEndEvent, PhaseKind, RecompSwitchEvent, TraceSink, Tracer};

/// Where a display is in the frame lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameState {
    /// Initial state, and after power-off or a refused skip-validate.
    #[default]
    None,
    /// Classified; composition types may differ from the requested ones.
    Validated,
    /// The client accepted the resolved composition types.
    AcceptedChange,
    /// The frame was submitted (or recovered).
    Presented,
}

impl FrameState {
    /// Returns a short label for logs and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Validated => "validated",
            Self::AcceptedChange => "accepted_change",
            Self::Presented => "presented",
        }
    }
}

/// One composition target (client or secondary) for the current frame.
#[derive(Debug, Default)]
struct CompositionTarget {
    buffer: Option<BufferHandle>,
    acquire: Option<Fence>,
    dataspace: Dataspace,
    /// Plane source scanning the target out.
    channel: Option<MppId>,
    /// Compositor producing the target (secondary only).
    m2m: Option<MppId>,
    window: Option<usize>,
}

impl CompositionTarget {
    /// Forgets the frame's buffer and assignments, closing a pending fence.
    fn reset(&mut self) {
        if close_slot(&mut self.acquire, FenceRole::SrcAcquire) {
            tracing::debug!("unconsumed composition target acquire fence closed");
        }
        *self = Self::default();
    }
}

/// Optional trace sink.
#[derive(Default)]
struct Trace {
    sink: Option<Box<dyn TraceSink + Send>>,
}

impl Trace {
    fn tracer(&mut self) -> Tracer<'_> {
        match self.sink.as_deref_mut() {
            Some(sink) => Tracer::new(sink),
            None => Tracer::none(),
        }
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trace")
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Everything guarded by the display lock.
#[derive(Debug)]
struct DisplayState {
    config: DisplayConfig,
    driver: Box<dyn DisplayInterface>,
    resources: Box<dyn ResourceManager>,

    state: FrameState,
    geometry: GeometryFlags,
    frame_index: u64,

    // -- Current frame (written by validate) --
    order: Vec<u32>,
    classification: Classification,
    plan: WindowPlan,
    client: CompositionTarget,
    secondary: CompositionTarget,

    // -- Cross-frame state --
    skip: SkipStatic,
    recomp: RecompController,
    low_fps: Option<TargetRange>,
    last_config: Option<WinConfigSnapshot>,
    last_retire: Option<Fence>,
    buffers_changed: bool,

    // -- Display-level settings --
    power: PowerMode,
    color_mode: ColorMode,
    color_transform: ColorTransform,
    skip_frame: bool,
    single_buffer: bool,

    trace: Trace,
    summary: FrameSummaryBuilder,
}

impl DisplayState {
    /// Folds layer property changes into the frame flags.
    fn absorb_changes(&mut self, layers: &mut LayerStore) {
        let changes = layers.take_changes();
        if changes.geometry_changed() {
            self.geometry |= GeometryFlags::LAYER;
        }
        if !changes.buffers.is_empty() {
            self.buffers_changed = true;
        }
    }

    fn begin(&mut self, phase: PhaseKind, now: HostTime) {
        self.summary.phase_begin(phase, now);
        self.trace.tracer().phase_begin(&PhaseBeginEvent {
            frame_index: self.frame_index,
            phase,
            timestamp: now,
        });
    }

    fn end(&mut self, phase: PhaseKind, now: HostTime) {
        self.summary.phase_end(phase, now);
        self.trace.tracer().phase_end(&PhaseEndEvent {
            frame_index: self.frame_index,
            phase,
            timestamp: now,
        });
    }

    /// Recomposition inputs over every live layer.
    fn recomp_input(layers: &LayerStore) -> RecompInput {
        let mut input = RecompInput {
            incoming_pixels: 0,
            has_priority_layer: false,
            max_fps: 0,
        };
        for s in layers.live_slots() {
            let i = s as usize;
            input.incoming_pixels = input
                .incoming_pixels
                .saturating_add(layers.frame[i].area());
            input.has_priority_layer |=
                layers.priority[i].is_high() || layers.flags[i].preprocessed;
            input.max_fps = input.max_fps.max(layers.fps[i].last());
        }
        input
    }

    fn evaluate_recomposition(&mut self, layers: &LayerStore, now: HostTime) -> Option<RecompSwitch> {
        let input = Self::recomp_input(layers);
        let switch = self.recomp.evaluate(now, &input, &self.config)?;
        self.geometry |= GeometryFlags::DYNAMIC_RECOMP;
        self.trace.tracer().recomp_switch(&RecompSwitchEvent {
            frame_index: self.frame_index,
            switch,
            timestamp: now,
        });
        Some(switch)
    }

    /// Drops the pending fences of a frame that will not be presented.
    fn close_frame_fences(&mut self, layers: &mut LayerStore) {
        for s in layers.live_slots().collect::<Vec<_>>() {
            close_slot(&mut layers.acquire[s as usize], FenceRole::SrcAcquire);
        }
        close_slot(&mut self.client.acquire, FenceRole::SrcAcquire);
        close_slot(&mut self.secondary.acquire, FenceRole::SrcAcquire);
        self.resources.drop_pending_fences();
    }

    fn clear_display(&mut self) -> Result<(), Error> {
        let result = self.driver.clear_display().map_err(Error::BadDisplay);
        self.skip.clear();
        self.last_config = None;
        close_slot(&mut self.last_retire, FenceRole::Retire);
        result
    }

    fn write_dump(&self, layers: &LayerStore, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "display {}x{} state {} power {:?} frame {} geometry {:?}",
            self.config.xres,
            self.config.yres,
            self.state.as_str(),
            self.power,
            self.frame_index,
            self.geometry
        )?;
        writeln!(
            out,
            "recomposition {} skip-static {} low-fps {:?}",
            self.recomp.mode().as_str(),
            self.skip.is_skipping(),
            self.low_fps
        )?;
        for (name, range, target) in [
            ("client", self.classification.client, &self.client),
            ("secondary", self.classification.secondary, &self.secondary),
        ] {
            writeln!(
                out,
                "{name}: range {range:?} window {:?} channel {:?} buffer {:?}",
                target.window, target.channel, target.buffer
            )?;
        }
        writeln!(out, "layers:")?;
        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            if !layers.live[s] {
                continue;
            }
            writeln!(
                out,
                "  [{i}] slot {slot} z {} {} -> {} ({}) window {:?} {:?} frame {:?}{}",
                layers.z_order[s],
                layers.requested[s].as_str(),
                layers.path[s].as_str(),
                layers.committed[s].as_str(),
                layers.window[s],
                layers.buffer[s],
                layers.frame[s],
                if layers.skip_static[s] { " skip" } else { "" }
            )?;
        }
        if let Some(last) = &self.last_config {
            writeln!(out, "windows:")?;
            for (w, plane) in last.windows.iter().enumerate() {
                writeln!(out, "  [{w}] {plane}")?;
            }
        }
        Ok(())
    }
}

/// Placeholder image for a composition target at validate time.
fn target_image(config: &DisplayConfig) -> ImageInfo {
    let panel = Rect::new(0, 0, config.xres as i32, config.yres as i32);
    ImageInfo {
        buffer: None,
        crop: panel,
        frame: panel,
        format: PixelFormat::Rgba8888,
        dataspace: Dataspace::UNKNOWN,
        transform: Transform::empty(),
        blend: BlendMode::Premultiplied,
        plane_alpha: 1.0,
        color: Color::default(),
        priority: Priority::Normal,
    }
}

/// One physical display and its layers.
#[derive(Debug)]
pub struct Display {
    state: Mutex<DisplayState>,
    layers: Mutex<LayerStore>,
    clock: Box<dyn Clock>,
}

impl Display {
    /// Creates a display with no layers, powered off.
    pub fn new(
        config: DisplayConfig,
        driver: Box<dyn DisplayInterface>,
        resources: Box<dyn ResourceManager>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = DisplayState {
            config,
            driver,
            resources,
            state: FrameState::None,
            geometry: GeometryFlags::empty(),
            frame_index: 0,
            order: Vec::new(),
            classification: Classification::default(),
            plan: WindowPlan::default(),
            client: CompositionTarget::default(),
            secondary: CompositionTarget::default(),
            skip: SkipStatic::new(),
            recomp: RecompController::new(config.dynamic_recomposition),
            low_fps: None,
            last_config: None,
            last_retire: None,
            buffers_changed: false,
            power: PowerMode::Off,
            color_mode: ColorMode::Native,
            color_transform: ColorTransform::Identity,
            skip_frame: false,
            single_buffer: false,
            trace: Trace::default(),
            summary: FrameSummaryBuilder::new(0),
        };
        Ok(Self {
            state: Mutex::new(state),
            layers: Mutex::new(LayerStore::new()),
            clock,
        })
    }

    /// The configuration the display was created with.
    #[must_use]
    pub fn config(&self) -> DisplayConfig {
        self.state.lock().config
    }

    /// Installs or removes the frame trace sink.
    pub fn set_trace_sink(&self, sink: Option<Box<dyn TraceSink + Send>>) {
        self.state.lock().trace.sink = sink;
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn frame_state(&self) -> FrameState {
        self.state.lock().state
    }

    /// Index of the frame being built.
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.state.lock().frame_index
    }

    /// Whether the current frame reuses the previous client target.
    #[must_use]
    pub fn is_skipping_static(&self) -> bool {
        self.state.lock().skip.is_skipping()
    }

    /// Current recomposition mode.
    #[must_use]
    pub fn recomposition_mode(&self) -> RecompMode {
        self.state.lock().recomp.mode()
    }

    // -- Layers --

    fn with_layer<R>(&self, id: LayerId, f: impl FnOnce(&mut LayerStore) -> R) -> Result<R, Error> {
        let mut layers = self.layers.lock();
        if !layers.is_alive(id) {
            tracing::warn!(layer = ?id, "stale layer handle");
            return Err(Error::BadLayer(id));
        }
        Ok(f(&mut layers))
    }

    /// Creates a layer.
    pub fn create_layer(&self) -> LayerId {
        let now = self.clock.now();
        let id = self.layers.lock().create_layer(now);
        tracing::debug!(layer = ?id, "layer created");
        id
    }

    /// Destroys a layer, closing its pending fences.
    pub fn destroy_layer(&self, id: LayerId) -> Result<(), Error> {
        self.with_layer(id, |l| l.destroy_layer(id))?;
        tracing::debug!(layer = ?id, "layer destroyed");
        Ok(())
    }

    /// Number of live layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.lock().live_count()
    }

    /// Attaches a buffer and takes ownership of its acquire fence.
    ///
    /// On a stale handle the fence is closed.
    pub fn set_layer_buffer(
        &self,
        id: LayerId,
        buffer: Option<BufferHandle>,
        acquire: Option<Fence>,
    ) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_buffer(id, buffer, acquire))
    }

    /// Sets the source crop.
    pub fn set_layer_crop(&self, id: LayerId, crop: Rect) -> Result<(), Error> {
        check_bounds(id, "crop", &crop)?;
        self.with_layer(id, |l| l.set_crop(id, crop))
    }

    /// Sets the display frame.
    pub fn set_layer_frame(&self, id: LayerId, frame: Rect) -> Result<(), Error> {
        check_bounds(id, "frame", &frame)?;
        self.with_layer(id, |l| l.set_frame(id, frame))
    }

    /// Sets the z-order.
    pub fn set_layer_z_order(&self, id: LayerId, z: u32) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_z_order(id, z))
    }

    /// Sets the blend mode.
    pub fn set_layer_blend(&self, id: LayerId, blend: BlendMode) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_blend(id, blend))
    }

    /// Sets the plane alpha, which must lie in `[0, 1]`.
    pub fn set_layer_plane_alpha(&self, id: LayerId, alpha: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&alpha) {
            tracing::warn!(layer = ?id, alpha, "plane alpha out of range");
            return Err(Error::BadParameter("plane alpha outside [0, 1]"));
        }
        self.with_layer(id, |l| l.set_plane_alpha(id, alpha))
    }

    /// Sets the scan-out transform.
    pub fn set_layer_transform(&self, id: LayerId, transform: Transform) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_transform(id, transform))
    }

    /// Sets the dataspace.
    pub fn set_layer_dataspace(&self, id: LayerId, dataspace: Dataspace) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_dataspace(id, dataspace))
    }

    /// Sets the overlay priority.
    pub fn set_layer_priority(&self, id: LayerId, priority: Priority) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_priority(id, priority))
    }

    /// Replaces the damage list, in buffer coordinates.
    pub fn set_layer_damage(&self, id: LayerId, damage: &[Rect]) -> Result<(), Error> {
        for rect in damage {
            check_bounds(id, "damage", rect)?;
        }
        self.with_layer(id, |l| l.set_damage(id, damage))
    }

    /// Sets the flat color of a bufferless layer.
    pub fn set_layer_color(&self, id: LayerId, color: Color) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_color(id, color))
    }

    /// Sets the composition type the client asks for.
    pub fn set_layer_composition_type(&self, id: LayerId, ty: CompositionType) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_composition_type(id, ty))
    }

    /// Sets the per-layer flags.
    pub fn set_layer_flags(&self, id: LayerId, flags: LayerFlags) -> Result<(), Error> {
        self.with_layer(id, |l| l.set_flags(id, flags))
    }

    /// Path chosen for the layer by the last validate.
    pub fn layer_path(&self, id: LayerId) -> Result<CompositionPath, Error> {
        self.with_layer(id, |l| l.path(id))
    }

    /// Composition type committed by the last accept.
    pub fn layer_committed_type(&self, id: LayerId) -> Result<CompositionType, Error> {
        self.with_layer(id, |l| l.committed_type(id))
    }

    /// Hands every pending layer release fence to the caller.
    pub fn take_release_fences(&self) -> Vec<(LayerId, Fence)> {
        let mut layers = self.layers.lock();
        let slots: Vec<u32> = layers.live_slots().collect();
        slots
            .into_iter()
            .filter_map(|s| {
                let fence = layers.release[s as usize].take()?;
                Some((layers.id_at(s), fence))
            })
            .collect()
    }

    // -- Frame --

    /// Classifies the frame. Always reaches [`FrameState::Validated`].
    pub fn validate(&self) -> Validation {
        let mut state = self.state.lock();
        let mut layers = self.layers.lock();
        state.validate(&mut layers, &*self.clock)
    }

    /// Commits the resolved composition types.
    pub fn accept_changes(&self) -> Result<(), Error> {
        let mut state = self.state.lock();
        let mut layers = self.layers.lock();
        state.accept_changes(&mut layers, &*self.clock)
    }

    /// Layers whose resolved type differs from the requested one.
    pub fn changed_composition_types(&self) -> Result<Vec<(LayerId, CompositionType)>, Error> {
        let state = self.state.lock();
        let layers = self.layers.lock();
        state.changed_composition_types(&layers)
    }

    /// Per-layer requests for the client.
    #[must_use]
    pub fn display_requests(&self) -> Vec<(LayerId, DisplayRequest)> {
        let state = self.state.lock();
        let layers = self.layers.lock();
        state.display_requests(&layers)
    }

    /// Submits the frame and returns its retire fence.
    pub fn present(&self) -> Result<Option<Fence>, Error> {
        let mut state = self.state.lock();
        let mut layers = self.layers.lock();
        state.present(&mut layers, &*self.clock)
    }

    // -- Display --

    /// Sets the client target for the validated frame.
    ///
    /// Without client composition the fence is closed and nothing is stored.
    /// A missing buffer is only accepted while the previous target is being
    /// reused.
    pub fn set_client_target(
        &self,
        buffer: Option<BufferHandle>,
        acquire: Option<Fence>,
        dataspace: Dataspace,
    ) -> Result<(), Error> {
        let mut st = self.state.lock();
        if st.classification.client.is_none() {
            if acquire.is_some() {
                tracing::debug!("client target fence closed without client composition");
            }
            return Ok(());
        }
        if buffer.is_none() && !st.skip.is_skipping() {
            tracing::error!("client target without buffer");
            return Err(Error::BadParameter("client target without buffer"));
        }
        if close_slot(&mut st.client.acquire, FenceRole::SrcAcquire) {
            tracing::debug!("replacing unconsumed client target fence");
        }
        st.client.buffer = buffer;
        st.client.acquire = acquire;
        st.client.dataspace = dataspace;
        if buffer.is_some() {
            st.buffers_changed = true;
        }
        Ok(())
    }

    /// Changes the color mode.
    pub fn set_color_mode(&self, mode: ColorMode) -> Result<(), Error> {
        let mut st = self.state.lock();
        if let Err(err) = st.driver.set_color_mode(mode) {
            if mode != ColorMode::Native {
                tracing::warn!(?mode, %err, "color mode rejected");
                return Err(Error::Unsupported("color mode"));
            }
            tracing::debug!(%err, "native color mode not applied by driver");
        }
        if st.color_mode != mode {
            st.color_mode = mode;
            st.geometry |= GeometryFlags::COLOR_MODE;
        }
        Ok(())
    }

    /// Current color mode.
    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        self.state.lock().color_mode
    }

    /// Records the client's color transform hint.
    pub fn set_color_transform(&self, hint: ColorTransform) {
        let mut st = self.state.lock();
        if st.color_transform != hint {
            st.color_transform = hint;
            st.geometry |= GeometryFlags::COLOR_TRANSFORM;
        }
    }

    /// Changes the panel power state.
    ///
    /// Power-off blanks the panel, stops recomposition, and drops the next
    /// present.
    pub fn set_power_mode(&self, mode: PowerMode) -> Result<(), Error> {
        let mut st = self.state.lock();
        let st = &mut *st;
        if mode == PowerMode::Off {
            if let Err(err) = st.clear_display() {
                tracing::warn!(%err, "clear display failed");
            }
            st.recomp.set_enabled(false);
        } else {
            st.recomp.set_enabled(st.config.dynamic_recomposition);
        }

        if let Err(err) = st.driver.set_power_mode(mode) {
            tracing::warn!(?mode, %err, "driver power mode change failed");
        }
        st.power = mode;
        tracing::debug!(?mode, "power mode");

        if mode == PowerMode::Off {
            st.skip_frame = true;
            st.geometry |= GeometryFlags::POWER_OFF;
            if matches!(st.state, FrameState::Validated | FrameState::AcceptedChange) {
                let mut layers = self.layers.lock();
                st.close_frame_fences(&mut layers);
            }
            st.state = FrameState::None;
        } else {
            st.geometry |= GeometryFlags::POWER_ON;
        }
        Ok(())
    }

    /// Current power state.
    #[must_use]
    pub fn power_mode(&self) -> PowerMode {
        self.state.lock().power
    }

    /// Turns vsync events on or off.
    pub fn set_vsync_enabled(&self, enabled: bool) -> Result<(), Error> {
        self.state
            .lock()
            .driver
            .set_vsync_enabled(enabled)
            .map_err(Error::BadDisplay)
    }

    /// Moves the cursor plane.
    pub fn set_cursor_position(&self, x: i32, y: i32) -> Result<(), Error> {
        self.state
            .lock()
            .driver
            .set_cursor_position(x, y)
            .map_err(Error::BadDisplay)
    }

    /// Blanks the panel and forgets the previous frame.
    pub fn clear_display(&self) -> Result<(), Error> {
        self.state.lock().clear_display()
    }

    /// Runs a recomposition evaluation outside of validate.
    pub fn evaluate_recomposition(&self) -> Option<RecompSwitch> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let layers = self.layers.lock();
        state.evaluate_recomposition(&layers, now)
    }

    /// Renders the display state as text.
    #[must_use]
    pub fn dump(&self) -> String {
        let state = self.state.lock();
        let layers = self.layers.lock();
        let mut out = String::new();
        _ = state.write_dump(&layers, &mut out);
        out
    }
}

fn check_bounds(id: LayerId, what: &'static str, rect: &Rect) -> Result<(), Error> {
    if rect.in_bounds() {
        return Ok(());
    }
    tracing::warn!(layer = ?id, what, ?rect, "rectangle out of bounds");
    Err(Error::BadParameter("rectangle edge out of bounds"))
}
