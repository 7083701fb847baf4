// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Partial refresh: limiting a frame's scan-out to the damaged region.
//!
//! Each layer reports damage in buffer coordinates. The damage is mapped to
//! display coordinates, merged across layers, aligned outward to the panel's
//! update block, and clamped to the panel. The result is either a
//! [`WindowUpdate::Partial`] region or a full-frame update with the reason
//! partial refresh could not be used.
//!
//! Damage per layer is read as:
//!
//! - no rectangles: the whole layer changed;
//! - a single all-zero rectangle: nothing changed, unless the layer's window
//!   moved, in which case the old and new destinations are both refreshed;
//! - malformed rectangles (negative, empty, or larger than the crop): the
//!   whole layer changed.

use crate::config::DisplayConfig;
use crate::geometry::{Rect, Transform, align_down, align_up};
use crate::plane::{PlaneState, WinConfigSnapshot};

/// Why a frame refreshes the whole panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FullFrameReason {
    /// Partial refresh is turned off.
    Disabled,
    /// The layer list or a layer's geometry changed.
    GeometryChanged,
    /// The cursor is shown on a plane.
    CursorOnPlane,
    /// The secondary compositor target is active.
    SecondaryTarget,
    /// The client target is active.
    ClientTarget,
    /// A layer goes through a memory-to-memory block.
    M2mLayer,
    /// A layer has no buffer.
    NullBuffer,
    /// A layer is rotated or flipped.
    Transformed,
    /// A window scales its source.
    Scaled,
    /// A window changed buffer, format, blending, or alpha without damage.
    WindowChanged,
    /// No layer contributed damage.
    NoDamage,
    /// The aligned damage covers the panel.
    WholePanel,
}

impl FullFrameReason {
    /// Returns a short label for logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::GeometryChanged => "geometry_changed",
            Self::CursorOnPlane => "cursor_on_plane",
            Self::SecondaryTarget => "secondary_target",
            Self::ClientTarget => "client_target",
            Self::M2mLayer => "m2m_layer",
            Self::NullBuffer => "null_buffer",
            Self::Transformed => "transformed",
            Self::Scaled => "scaled",
            Self::WindowChanged => "window_changed",
            Self::NoDamage => "no_damage",
            Self::WholePanel => "whole_panel",
        }
    }
}

/// Result of the partial-refresh computation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowUpdate {
    /// Refresh the whole panel.
    Full(FullFrameReason),
    /// Refresh only this aligned region.
    Partial(Rect),
}

impl WindowUpdate {
    /// The partial region, if any.
    #[must_use]
    pub const fn region(&self) -> Option<Rect> {
        match self {
            Self::Full(_) => None,
            Self::Partial(rect) => Some(*rect),
        }
    }
}

/// One layer's contribution, in sorted order.
#[derive(Clone, Copy, Debug)]
pub struct UpdateLayer<'a> {
    /// Display frame.
    pub frame: Rect,
    /// Source crop.
    pub crop: Rect,
    /// Damage in buffer coordinates.
    pub damage: &'a [Rect],
    /// Window the layer is shown on.
    pub window: Option<usize>,
    /// Whether the layer has a buffer.
    pub has_buffer: bool,
    /// Scan-out transform.
    pub transform: Transform,
    /// Whether the layer goes through a memory-to-memory block.
    pub m2m: bool,
    /// Whether the layer is a cursor shown on a plane.
    pub cursor: bool,
}

/// Everything the computation reads.
#[derive(Clone, Copy, Debug)]
pub struct UpdateInput<'a> {
    /// Layers, bottom to top.
    pub layers: &'a [UpdateLayer<'a>],
    /// Windows of the frame being built.
    pub current: &'a WinConfigSnapshot,
    /// Windows of the previous submitted frame.
    pub last: Option<&'a WinConfigSnapshot>,
    /// Whether the frame changed geometry.
    pub geometry_changed: bool,
    /// Whether the client target has layers.
    pub client_active: bool,
    /// Whether the secondary target has layers.
    pub secondary_active: bool,
}

/// Layer damage as a display-space rectangle.
enum Damage {
    Whole,
    Unchanged,
    Region(Rect),
}

fn layer_damage(layer: &UpdateLayer<'_>) -> Damage {
    match layer.damage {
        [] => return Damage::Whole,
        [only] if only.is_zero() => return Damage::Unchanged,
        _ => {}
    }
    let crop_w = layer.crop.width();
    let crop_h = layer.crop.height();
    let mut merged: Option<Rect> = None;
    for d in layer.damage {
        if d.left < 0
            || d.top < 0
            || d.is_empty()
            || d.width() > crop_w
            || d.height() > crop_h
        {
            tracing::debug!(damage = ?d, crop = ?layer.crop, "malformed damage");
            return Damage::Whole;
        }
        let rect = d.translate(
            layer.frame.left - layer.crop.left,
            layer.frame.top - layer.crop.top,
        );
        merged = Some(merged.map_or(rect, |m| m.union(&rect)));
    }
    merged.map_or(Damage::Whole, Damage::Region)
}

fn exception(input: &UpdateInput<'_>, config: &DisplayConfig) -> Option<FullFrameReason> {
    if !config.window_update {
        return Some(FullFrameReason::Disabled);
    }
    if input.geometry_changed {
        return Some(FullFrameReason::GeometryChanged);
    }
    if input.layers.iter().any(|l| l.cursor) {
        return Some(FullFrameReason::CursorOnPlane);
    }
    if input.secondary_active {
        return Some(FullFrameReason::SecondaryTarget);
    }
    if input.client_active {
        return Some(FullFrameReason::ClientTarget);
    }
    for layer in input.layers {
        if layer.m2m {
            return Some(FullFrameReason::M2mLayer);
        }
        if !layer.has_buffer {
            return Some(FullFrameReason::NullBuffer);
        }
        if !layer.transform.is_identity() {
            return Some(FullFrameReason::Transformed);
        }
    }
    let scaled = input.current.windows.iter().any(|w| {
        w.state == PlaneState::Buffer
            && (w.src.width() != w.dst.width() || w.src.height() != w.dst.height())
    });
    scaled.then_some(FullFrameReason::Scaled)
}

/// Computes the frame's refresh region.
#[must_use]
pub fn compute(input: &UpdateInput<'_>, config: &DisplayConfig) -> WindowUpdate {
    if let Some(reason) = exception(input, config) {
        return WindowUpdate::Full(reason);
    }

    let mut merged: Option<Rect> = None;
    let mut add = |rect: Rect| merged = Some(merged.map_or(rect, |m| m.union(&rect)));

    for layer in input.layers {
        match layer_damage(layer) {
            Damage::Whole => add(layer.frame),
            Damage::Region(rect) => add(rect),
            Damage::Unchanged => {
                let (Some(window), Some(last)) = (layer.window, input.last) else {
                    return WindowUpdate::Full(FullFrameReason::WindowChanged);
                };
                let now = &input.current.windows[window];
                let before = &last.windows[window];
                if now.state != before.state
                    || now.buffer_id != before.buffer_id
                    || now.format != before.format
                    || now.blend != before.blend
                    || now.plane_alpha != before.plane_alpha
                {
                    tracing::debug!(window, "window changed without damage");
                    return WindowUpdate::Full(FullFrameReason::WindowChanged);
                }
                if now.dst != before.dst || now.src != before.src {
                    add(layer.frame);
                    add(before.dst);
                }
            }
        }
    }

    let Some(merged) = merged else {
        return WindowUpdate::Full(FullFrameReason::NoDamage);
    };

    let (block_w, block_h) = config.update_block();
    let xres = i32::try_from(config.xres).unwrap_or(i32::MAX);
    let yres = i32::try_from(config.yres).unwrap_or(i32::MAX);
    let aligned = Rect::new(
        align_down(merged.left, block_w).max(0),
        align_down(merged.top, block_h).max(0),
        align_up(merged.right, block_w).min(xres),
        align_up(merged.bottom, block_h).min(yres),
    );

    if aligned == Rect::new(0, 0, xres, yres) {
        return WindowUpdate::Full(FullFrameReason::WholePanel);
    }
    if aligned.is_empty() {
        return WindowUpdate::Full(FullFrameReason::NoDamage);
    }
    tracing::debug!(region = ?aligned, "partial refresh");
    WindowUpdate::Partial(aligned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::PlaneSnapshot;

    fn config() -> DisplayConfig {
        DisplayConfig::primary(1080, 1920)
    }

    fn layer<'a>(frame: Rect, damage: &'a [Rect], window: usize) -> UpdateLayer<'a> {
        UpdateLayer {
            frame,
            crop: Rect::from_xywh(0, 0, frame.width(), frame.height()),
            damage,
            window: Some(window),
            has_buffer: true,
            transform: Transform::empty(),
            m2m: false,
            cursor: false,
        }
    }

    fn windows(frames: &[Rect]) -> WinConfigSnapshot {
        let mut snap = WinConfigSnapshot::default();
        for (i, frame) in frames.iter().enumerate() {
            snap.windows[i] = PlaneSnapshot {
                state: PlaneState::Buffer,
                buffer_id: Some(i as u64),
                src: Rect::from_xywh(0, 0, frame.width(), frame.height()),
                dst: *frame,
                plane_alpha: 255,
                ..PlaneSnapshot::default()
            };
        }
        snap
    }

    fn input<'a>(layers: &'a [UpdateLayer<'a>], current: &'a WinConfigSnapshot, last: Option<&'a WinConfigSnapshot>) -> UpdateInput<'a> {
        UpdateInput {
            layers,
            current,
            last,
            geometry_changed: false,
            client_active: false,
            secondary_active: false,
        }
    }

    #[test]
    fn damage_maps_to_display_and_aligns() {
        let frame = Rect::from_xywh(100, 200, 500, 500);
        let damage = [Rect::from_xywh(11, 21, 30, 9)];
        let layers = [layer(frame, &damage, 0)];
        let current = windows(&[frame]);
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        // (111, 221)-(141, 230) widened to the 2x2 block.
        assert_eq!(update, WindowUpdate::Partial(Rect::new(110, 220, 142, 230)), "aligned region");
    }

    #[test]
    fn crop_offset_is_subtracted() {
        let frame = Rect::from_xywh(0, 0, 200, 200);
        let damage = [Rect::from_xywh(60, 60, 10, 10)];
        let mut l = layer(frame, &damage, 0);
        l.crop = Rect::from_xywh(50, 50, 200, 200);
        let current = windows(&[frame]);
        let update = compute(&input(&[l], &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Partial(Rect::from_xywh(10, 10, 10, 10)), "crop origin removed");
    }

    #[test]
    fn unchanged_layers_yield_no_damage() {
        let frame = Rect::from_xywh(0, 0, 100, 100);
        let zero = [Rect::ZERO];
        let layers = [layer(frame, &zero, 0)];
        let current = windows(&[frame]);
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Full(FullFrameReason::NoDamage), "nothing merged");
    }

    #[test]
    fn moved_window_merges_old_and_new() {
        let before = Rect::from_xywh(0, 0, 100, 100);
        let after = Rect::from_xywh(50, 50, 100, 100);
        let zero = [Rect::ZERO];
        let layers = [layer(after, &zero, 0)];
        let last = windows(&[before]);
        let current = windows(&[after]);
        let update = compute(&input(&layers, &current, Some(&last)), &config());
        assert_eq!(update, WindowUpdate::Partial(Rect::new(0, 0, 150, 150)), "old and new destinations");
    }

    #[test]
    fn new_buffer_without_damage_is_full() {
        let frame = Rect::from_xywh(0, 0, 100, 100);
        let zero = [Rect::ZERO];
        let layers = [layer(frame, &zero, 0)];
        let last = windows(&[frame]);
        let mut current = windows(&[frame]);
        current.windows[0].buffer_id = Some(42);
        let update = compute(&input(&layers, &current, Some(&last)), &config());
        assert_eq!(update, WindowUpdate::Full(FullFrameReason::WindowChanged), "buffer swap");
    }

    #[test]
    fn missing_or_malformed_damage_covers_layer() {
        let frame = Rect::from_xywh(10, 10, 100, 100);
        let current = windows(&[frame]);
        let layers = [layer(frame, &[], 0)];
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Partial(frame), "no damage rects");

        let oversized = [Rect::from_xywh(0, 0, 101, 10)];
        let layers = [layer(frame, &oversized, 0)];
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Partial(frame), "larger than the crop");

        let negative = [Rect::new(-1, 0, 10, 10)];
        let layers = [layer(frame, &negative, 0)];
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Partial(frame), "negative origin");
    }

    #[test]
    fn whole_panel_is_full() {
        let frame = Rect::from_xywh(0, 0, 1080, 1920);
        let layers = [layer(frame, &[], 0)];
        let current = windows(&[frame]);
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Full(FullFrameReason::WholePanel), "covers the panel");
    }

    #[test]
    fn scaled_window_disables_partial() {
        let frame = Rect::from_xywh(0, 0, 200, 200);
        let damage = [Rect::from_xywh(0, 0, 10, 10)];
        let layers = [layer(frame, &damage, 0)];
        let mut current = windows(&[frame]);
        current.windows[0].src = Rect::from_xywh(0, 0, 100, 100);
        let update = compute(&input(&layers, &current, Some(&current)), &config());
        assert_eq!(update, WindowUpdate::Full(FullFrameReason::Scaled), "2:1 scale");
    }

    #[test]
    fn frame_conditions_disable_partial() {
        let frame = Rect::from_xywh(0, 0, 100, 100);
        let damage = [Rect::from_xywh(0, 0, 10, 10)];
        let current = windows(&[frame]);
        let layers = [layer(frame, &damage, 0)];

        let mut i = input(&layers, &current, Some(&current));
        i.geometry_changed = true;
        assert_eq!(compute(&i, &config()), WindowUpdate::Full(FullFrameReason::GeometryChanged), "geometry");

        let mut i = input(&layers, &current, Some(&current));
        i.client_active = true;
        assert_eq!(compute(&i, &config()), WindowUpdate::Full(FullFrameReason::ClientTarget), "client target");

        let mut rotated = layers;
        rotated[0].transform = Transform::ROT_90;
        let i = input(&rotated, &current, Some(&current));
        assert_eq!(compute(&i, &config()), WindowUpdate::Full(FullFrameReason::Transformed), "transform");

        let i = input(&layers, &current, Some(&current));
        assert_eq!(
            compute(&i, &DisplayConfig::minimal(1080, 1920)),
            WindowUpdate::Full(FullFrameReason::Disabled),
            "feature off"
        );
    }

    #[test]
    fn region_clamps_to_slices() {
        let mut c = config();
        c.dsc_slices = 2;
        c.dsc_slice_height = 40;
        let frame = Rect::from_xywh(0, 0, 1080, 1920);
        let damage = [Rect::from_xywh(600, 50, 10, 10)];
        let layers = [layer(frame, &damage, 0)];
        let current = windows(&[frame]);
        let update = compute(&input(&layers, &current, Some(&current)), &c);
        assert_eq!(update, WindowUpdate::Partial(Rect::new(540, 40, 1080, 80)), "slice aligned");
    }
}
