// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware plane descriptors.
//!
//! A [`WinConfigSet`] holds one [`PlaneDescriptor`] per hardware window plus
//! a partial-update slot and the frame's retire fence. Exactly one set is live
//! per frame. The display keeps a fence-free [`WinConfigSnapshot`] of the last
//! submitted set for change detection.

use core::fmt;

use crate::config::DisplayConfig;
use crate::error::{Error, WinConfigError};
use crate::fence::Fence;
use crate::format::{ColorParams, PixelFormat};
use crate::geometry::{BlendMode, Rect, Transform};
use crate::layer::LayerId;
use crate::resource::{MppId, ResourceManager};

/// Number of descriptor slots in a [`WinConfigSet`].
pub const MAX_WINDOWS: usize = 8;

/// What a hardware window shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlaneState {
    /// Not shown.
    #[default]
    Disabled,
    /// Scans out a buffer.
    Buffer,
    /// Fills with a flat color.
    Color,
    /// Scans out a buffer on the cursor path.
    Cursor,
    /// Partial-update region (only in the update slot).
    Update,
}

impl PlaneState {
    /// Returns `true` for states that read a buffer.
    #[must_use]
    pub const fn reads_buffer(self) -> bool {
        matches!(self, Self::Buffer | Self::Cursor)
    }

    /// Returns `true` for states that put pixels on screen.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Buffer | Self::Color | Self::Cursor)
    }
}

/// The two composition targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// The client-rendered (GPU) target.
    Client,
    /// The secondary compositor's output.
    Secondary,
}

impl TargetKind {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Secondary => "secondary",
        }
    }
}

/// What feeds a hardware window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaneSource {
    /// A layer on its own plane.
    Layer(LayerId),
    /// A composition target.
    Target(TargetKind),
}

/// Hardware-visible state of one window, without fences.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlaneSnapshot {
    /// What the window shows.
    pub state: PlaneState,
    /// Identity of the scanned-out buffer.
    pub buffer_id: Option<u64>,
    /// Source rectangle in buffer coordinates.
    pub src: Rect,
    /// Full surface width the source lives in.
    pub full_w: u32,
    /// Full surface height the source lives in.
    pub full_h: u32,
    /// Destination rectangle in panel coordinates.
    pub dst: Rect,
    /// Pixel format.
    pub format: PixelFormat,
    /// Plane source (DMA channel) reading the buffer.
    pub channel: Option<MppId>,
    /// Scan-out transform.
    pub transform: Transform,
    /// Colorspace and HDR metadata.
    pub color: ColorParams,
    /// Blend mode.
    pub blend: BlendMode,
    /// Plane alpha, 0 to 255.
    pub plane_alpha: u8,
    /// Fill color as `0x00RRGGBB` for [`PlaneState::Color`].
    pub solid_rgb: u32,
    /// Buffer is compressed.
    pub compressed: bool,
}

/// One hardware window of a frame.
#[derive(Debug, Default)]
pub struct PlaneDescriptor {
    /// Hardware-visible configuration.
    pub config: PlaneSnapshot,
    /// What feeds the window, for release-fence routing and dumps.
    pub source: Option<PlaneSource>,
    /// Signals when the source buffer is ready. Handed to the driver.
    pub acquire: Option<Fence>,
    /// Filled by the driver: signals when the window stopped reading.
    pub release: Option<Fence>,
}

impl PlaneDescriptor {
    /// A descriptor restored from a snapshot, without fences.
    #[must_use]
    pub fn from_snapshot(config: PlaneSnapshot, source: Option<PlaneSource>) -> Self {
        Self {
            config,
            source,
            acquire: None,
            release: None,
        }
    }

    /// Turns the window off, closing its fences.
    pub fn disable(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for PlaneSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            PlaneState::Disabled => write!(f, "disabled"),
            PlaneState::Color => write!(
                f,
                "color #{:06x} dst {:?} alpha {}",
                self.solid_rgb, self.dst, self.plane_alpha
            ),
            PlaneState::Update => write!(f, "update {:?}", self.dst),
            PlaneState::Buffer | PlaneState::Cursor => write!(
                f,
                "{:?} buf {:?} src {:?} in {}x{} dst {:?} {:?} ch {:?} {:?} alpha {}{}",
                self.state,
                self.buffer_id,
                self.src,
                self.full_w,
                self.full_h,
                self.dst,
                self.format,
                self.channel.map(|c| c.0),
                self.blend,
                self.plane_alpha,
                if self.compressed { " compressed" } else { "" }
            ),
        }
    }
}

/// Hardware-visible state of a whole [`WinConfigSet`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WinConfigSnapshot {
    /// Per-window state.
    pub windows: [PlaneSnapshot; MAX_WINDOWS],
    /// Partial-update slot.
    pub update: PlaneSnapshot,
}

/// The descriptor set for one frame.
#[derive(Debug)]
pub struct WinConfigSet {
    /// One descriptor per hardware window, bottom to top.
    pub windows: [PlaneDescriptor; MAX_WINDOWS],
    /// Partial-update region; [`PlaneState::Update`] when active.
    pub update: PlaneSnapshot,
    /// Filled by the driver: signals when this frame leaves the screen.
    pub retire: Option<Fence>,
}

impl Default for WinConfigSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WinConfigSet {
    /// An all-disabled set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: core::array::from_fn(|_| PlaneDescriptor::default()),
            update: PlaneSnapshot::default(),
            retire: None,
        }
    }

    /// Fence-free copy for change detection.
    #[must_use]
    pub fn snapshot(&self) -> WinConfigSnapshot {
        WinConfigSnapshot {
            windows: core::array::from_fn(|i| self.windows[i].config),
            update: self.update,
        }
    }

    /// Sets or clears the partial-update region.
    pub fn set_update_region(&mut self, region: Option<Rect>) {
        self.update = match region {
            Some(dst) => PlaneSnapshot {
                state: PlaneState::Update,
                dst,
                ..PlaneSnapshot::default()
            },
            None => PlaneSnapshot::default(),
        };
    }

    /// The partial-update region, if one is active.
    #[must_use]
    pub fn update_region(&self) -> Option<Rect> {
        (self.update.state == PlaneState::Update).then_some(self.update.dst)
    }

    /// Number of windows that put pixels on screen.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.windows
            .iter()
            .filter(|w| w.config.state.is_visible())
            .count()
    }

    /// Drops every fence the set holds.
    pub fn close_fences(&mut self) {
        for w in &mut self.windows {
            w.acquire = None;
            w.release = None;
        }
        self.retire = None;
    }
}

/// Checks a descriptor set before submission.
///
/// Invalid windows are disabled. Returns the first fault and the number of
/// faults found.
pub fn validate_win_config(
    set: &mut WinConfigSet,
    config: &DisplayConfig,
    resources: &dyn ResourceManager,
) -> Result<(), Error> {
    let mut first = None;
    let mut count = 0_usize;
    let mut fault = |e: WinConfigError| {
        tracing::warn!(%e, "invalid window configuration");
        first.get_or_insert(e);
        count += 1;
    };

    for i in 0..MAX_WINDOWS {
        let c = set.windows[i].config;
        if c.state == PlaneState::Disabled {
            continue;
        }
        if i >= config.window_count {
            fault(WinConfigError::OutOfRange { window: i });
            set.windows[i].disable();
            continue;
        }

        if c.state.reads_buffer() {
            let Some(channel) = c.channel else {
                fault(WinConfigError::NoChannel { window: i });
                set.windows[i].disable();
                continue;
            };
            let dup = set.windows[..i]
                .iter()
                .position(|w| w.config.state.reads_buffer() && w.config.channel == Some(channel));
            if let Some(j) = dup {
                fault(WinConfigError::DuplicateChannel {
                    first: j,
                    second: i,
                    channel: channel.0,
                });
                set.windows[i].disable();
                continue;
            }
        }

        let d = c.dst;
        if d.left < 0
            || d.top < 0
            || d.width() <= 0
            || d.height() <= 0
            || d.right > config.xres as i32
            || d.bottom > config.yres as i32
        {
            fault(WinConfigError::BadGeometry { window: i });
            set.windows[i].disable();
            continue;
        }

        if let (true, Some(channel)) = (c.state.reads_buffer(), c.channel) {
            let s = c.src;
            if s.left < 0 || s.top < 0 || s.width() <= 0 || s.height() <= 0 {
                fault(WinConfigError::BadGeometry { window: i });
                set.windows[i].disable();
                continue;
            }
            if s.right > c.full_w as i32 || s.bottom > c.full_h as i32 {
                fault(WinConfigError::CropExceedsSurface { window: i });
                set.windows[i].disable();
                continue;
            }
            let r = resources.restriction(channel, c.format);
            let misaligned = |v: i32, a: u32| a > 1 && v.rem_euclid(a as i32) != 0;
            if misaligned(s.left, r.src_x_align)
                || misaligned(s.top, r.src_y_align)
                || misaligned(s.width(), r.src_w_align)
                || misaligned(s.height(), r.src_h_align)
            {
                fault(WinConfigError::Misaligned { window: i });
                set.windows[i].disable();
                continue;
            }
        }
    }

    if set.visible_count() == 0 {
        fault(WinConfigError::NoVisibleWindow);
    }

    match first {
        None => Ok(()),
        Some(first) => Err(Error::WinConfig { first, count }),
    }
}
