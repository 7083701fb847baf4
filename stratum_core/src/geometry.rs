// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer rectangles, pixel transforms, and alignment helpers.

use core::fmt;

use bitflags::bitflags;

/// An axis-aligned rectangle in device pixels, edges exclusive on the right
/// and bottom.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left edge.
    pub left: i32,
    /// Top edge.
    pub top: i32,
    /// Right edge (exclusive).
    pub right: i32,
    /// Bottom edge (exclusive).
    pub bottom: i32,
}

impl Rect {
    /// The all-zero rectangle.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Largest edge magnitude accepted from clients. The difference or sum of
    /// any two in-bounds edges fits in `i32`.
    pub const MAX_COORD: i32 = 1 << 24;

    /// Creates a rectangle from its edges.
    #[inline]
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Creates a rectangle from an origin and a size.
    #[inline]
    #[must_use]
    pub const fn from_xywh(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self::new(x, y, x + w, y + h)
    }

    /// Width; negative for inverted rectangles.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    /// Height; negative for inverted rectangles.
    #[inline]
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Returns `true` if the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Returns `true` if every edge lies within [`Rect::MAX_COORD`].
    #[inline]
    #[must_use]
    pub const fn in_bounds(&self) -> bool {
        let m = Self::MAX_COORD;
        -m <= self.left
            && self.left <= m
            && -m <= self.top
            && self.top <= m
            && -m <= self.right
            && self.right <= m
            && -m <= self.bottom
            && self.bottom <= m
    }

    /// Returns `true` if every edge is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.left == 0 && self.top == 0 && self.right == 0 && self.bottom == 0
    }

    /// Pixel area, zero for empty rectangles.
    #[must_use]
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            u64::from(self.width().unsigned_abs()) * u64::from(self.height().unsigned_abs())
        }
    }

    /// Smallest rectangle containing both. Empty operands are ignored.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Overlapping part of both, or [`Rect::ZERO`] if they do not overlap.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let r = Self::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { Self::ZERO } else { r }
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Moves the rectangle by `(dx, dy)`.
    #[must_use]
    pub const fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }
}

impl fmt::Debug for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

bitflags! {
    /// Pixel transform applied when scanning out a source.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Transform: u32 {
        /// Mirror horizontally.
        const FLIP_H = 1 << 0;
        /// Mirror vertically.
        const FLIP_V = 1 << 1;
        /// Rotate 90 degrees clockwise (applied after flips).
        const ROT_90 = 1 << 2;
        /// Rotate 180 degrees.
        const ROT_180 = Self::FLIP_H.bits() | Self::FLIP_V.bits();
        /// Rotate 270 degrees.
        const ROT_270 = Self::ROT_180.bits() | Self::ROT_90.bits();
    }
}

impl Transform {
    /// Returns `true` for the identity transform.
    #[inline]
    #[must_use]
    pub const fn is_identity(self) -> bool {
        self.is_empty()
    }

    /// Returns `true` if width and height swap.
    #[inline]
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        self.contains(Self::ROT_90)
    }
}

/// How a plane is blended over the planes below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// Source replaces destination.
    None,
    /// Source color is premultiplied by its alpha.
    #[default]
    Premultiplied,
    /// Source color is not premultiplied.
    Coverage,
}

/// A flat RGBA color for dim/solid layers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Color {
    /// Red.
    pub r: u8,
    /// Green.
    pub g: u8,
    /// Blue.
    pub b: u8,
    /// Alpha.
    pub a: u8,
}

impl Color {
    /// Packs the RGB channels as `0x00RRGGBB`.
    #[inline]
    #[must_use]
    pub const fn packed_rgb(self) -> u32 {
        ((self.r as u32) << 16) | ((self.g as u32) << 8) | self.b as u32
    }
}

/// Rounds `value` down to a multiple of `align` (`align <= 1` is a no-op).
#[inline]
#[must_use]
pub const fn align_down(value: i32, align: u32) -> i32 {
    if align <= 1 {
        return value;
    }
    let a = align as i32;
    value.div_euclid(a) * a
}

/// Rounds `value` up to a multiple of `align` (`align <= 1` is a no-op).
#[inline]
#[must_use]
pub const fn align_up(value: i32, align: u32) -> i32 {
    if align <= 1 {
        return value;
    }
    let a = align as i32;
    align_down(value + a - 1, align)
}
