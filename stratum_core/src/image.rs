// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Buffer handles and the per-frame image description shared by layers,
//! composition targets, and hardware resource queries.

use core::fmt;

use crate::format::{Dataspace, PixelFormat};
use crate::geometry::{BlendMode, Color, Rect, Transform};

/// Opaque description of a producer-owned buffer.
///
/// The display never frees the memory behind a handle; `id` is the identity
/// used for change detection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    /// Identity of the underlying allocation.
    pub id: u64,
    /// Allocated width in pixels.
    pub width: u32,
    /// Allocated height in pixels.
    pub height: u32,
    /// Pixel layout.
    pub format: PixelFormat,
    /// Declared size in bytes.
    pub size: u64,
    /// Buffer is stored in a compressed layout.
    pub compressed: bool,
    /// Producer renders into the buffer while it is scanned out.
    pub single_buffer: bool,
}

impl BufferHandle {
    /// A tightly packed, uncompressed buffer.
    #[must_use]
    pub fn packed(id: u64, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            id,
            width,
            height,
            format,
            size: format.footprint(width, height),
            compressed: false,
            single_buffer: false,
        }
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Buffer(#{} {}x{} {:?})",
            self.id, self.width, self.height, self.format
        )
    }
}

/// Overlay priority class of a layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Ordinary content.
    #[default]
    Normal,
    /// Must stay on a hardware plane when possible (e.g. video).
    High,
    /// Exclusive use of the secondary compositor.
    Max,
}

impl Priority {
    /// Returns `true` for High and Max.
    #[inline]
    #[must_use]
    pub fn is_high(self) -> bool {
        self >= Self::High
    }
}

/// Everything a resource decision needs to know about one source image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageInfo {
    /// Backing buffer, if any.
    pub buffer: Option<BufferHandle>,
    /// Source crop in buffer coordinates.
    pub crop: Rect,
    /// Destination in display coordinates.
    pub frame: Rect,
    /// Pixel format (of the buffer, or the default for bufferless layers).
    pub format: PixelFormat,
    /// Dataspace.
    pub dataspace: Dataspace,
    /// Transform applied on scan-out.
    pub transform: Transform,
    /// Blend mode.
    pub blend: BlendMode,
    /// Plane alpha in `[0, 1]`.
    pub plane_alpha: f32,
    /// Flat color for bufferless layers.
    pub color: Color,
    /// Overlay priority.
    pub priority: Priority,
}

impl ImageInfo {
    /// Returns `true` if source and destination differ in size.
    ///
    /// Transforms that swap axes compare the rotated source.
    #[must_use]
    pub fn is_scaled(&self) -> bool {
        let (sw, sh) = if self.transform.swaps_axes() {
            (self.crop.height(), self.crop.width())
        } else {
            (self.crop.width(), self.crop.height())
        };
        sw != self.frame.width() || sh != self.frame.height()
    }
}
