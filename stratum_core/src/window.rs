// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plane descriptor construction.
//!
//! Turns a layer or composition target into a [`PlaneDescriptor`] that obeys
//! the panel bounds and the alignment rules of the plane source scanning it
//! out. Alignment numbers always come from a [`Restriction`] supplied by the
//! resource manager.

use crate::config::DisplayConfig;
use crate::error::GeometryError;
use crate::fence::Fence;
use crate::format::{Dataspace, color_params};
use crate::geometry::{BlendMode, Rect, Transform, align_down, align_up};
use crate::image::{BufferHandle, ImageInfo};
use crate::plane::{PlaneDescriptor, PlaneSnapshot, PlaneSource, PlaneState, TargetKind};
use crate::resource::{MppId, Restriction};

/// Clips a destination to the panel.
///
/// Negative overhang on the left or top shrinks the rectangle.
#[must_use]
pub fn clip_destination(frame: Rect, xres: u32, yres: u32) -> Rect {
    let (mut x, mut y) = (frame.left, frame.top);
    let (mut w, mut h) = (frame.width(), frame.height());
    if x < 0 {
        w += x;
        x = 0;
    }
    if y < 0 {
        h += y;
        y = 0;
    }
    let (xres, yres) = (xres as i32, yres as i32);
    if x + w > xres {
        w = xres - x;
    }
    if y + h > yres {
        h = yres - y;
    }
    Rect::from_xywh(x, y, w, h)
}

/// Converts a `[0, 1]` plane alpha to its 8-bit register value.
#[must_use]
#[expect(
    clippy::cast_possible_truncation,
    reason = "alpha is range-checked to [0, 1) before scaling"
)]
pub fn plane_alpha(alpha: f32) -> u8 {
    if (0.0..1.0).contains(&alpha) {
        (255.0 * alpha).round() as u8
    } else {
        255
    }
}

/// A source rectangle fitted to a plane source's restrictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignedSource {
    /// Source rectangle.
    pub src: Rect,
    /// Usable surface width.
    pub full_w: u32,
    /// Usable surface height.
    pub full_h: u32,
}

/// Fits `crop` inside a `width` by `height` surface under `r`.
///
/// The surface is clamped to the maximum full size and aligned down; the
/// offsets are aligned up; the crop size is re-clamped to what remains of the
/// surface, clamped to the maximum crop and aligned down.
pub fn align_source(
    crop: Rect,
    width: u32,
    height: u32,
    r: &Restriction,
) -> Result<AlignedSource, GeometryError> {
    let full_w = align_down(width.min(r.max_full_w) as i32, r.src_w_align);
    let full_h = align_down(height.min(r.max_full_h) as i32, r.src_h_align);

    let x = align_up(crop.left.max(0), r.src_x_align);
    let y = align_up(crop.top.max(0), r.src_y_align);
    let w = crop.width().min(full_w - x).min(r.max_crop_w as i32);
    let h = crop.height().min(full_h - y).min(r.max_crop_h as i32);
    let w = align_down(w, r.src_w_align);
    let h = align_down(h, r.src_h_align);
    if w <= 0 || h <= 0 {
        return Err(GeometryError::EmptySource { w, h });
    }

    Ok(AlignedSource {
        src: Rect::from_xywh(x, y, w, h),
        full_w: full_w.max(0) as u32,
        full_h: full_h.max(0) as u32,
    })
}

fn check_size(buffer: &BufferHandle, full_w: u32, full_h: u32) -> Result<(), GeometryError> {
    if buffer.compressed {
        return Ok(());
    }
    let need = buffer.format.footprint(full_w, full_h);
    if buffer.size < need {
        return Err(GeometryError::BufferTooSmall {
            need,
            have: buffer.size,
        });
    }
    Ok(())
}

/// Everything needed to put one layer on a window.
#[derive(Clone, Copy, Debug)]
pub struct LayerPlane<'a> {
    /// Layer description.
    pub image: &'a ImageInfo,
    /// Intermediate image when a memory-to-memory block pre-processed it.
    pub via: Option<&'a ImageInfo>,
    /// Layer handle, recorded as the window's source.
    pub source: PlaneSource,
    /// Plane source bound to the window.
    pub channel: MppId,
    /// Restrictions of `channel` for the scanned-out format.
    pub restriction: Restriction,
    /// Use the cursor state.
    pub cursor: bool,
}

/// Fills `desc` for a layer, taking ownership of its acquire fence.
///
/// A layer without a buffer becomes a flat color window.
pub fn configure_layer(
    desc: &mut PlaneDescriptor,
    layer: LayerPlane<'_>,
    acquire: Option<Fence>,
    config: &DisplayConfig,
) -> Result<(), GeometryError> {
    let image = layer.image;
    let dst = clip_destination(image.frame, config.xres, config.yres);
    let alpha = plane_alpha(image.plane_alpha);

    let scanned = layer.via.unwrap_or(image);
    let Some(buffer) = scanned.buffer else {
        if layer.via.is_some() {
            return Err(GeometryError::MissingBuffer);
        }
        desc.config = PlaneSnapshot {
            state: PlaneState::Color,
            dst,
            blend: image.blend,
            plane_alpha: alpha,
            solid_rgb: image.color.packed_rgb(),
            ..PlaneSnapshot::default()
        };
        desc.source = Some(layer.source);
        desc.acquire = acquire;
        return Ok(());
    };

    let fitted = align_source(scanned.crop, buffer.width, buffer.height, &layer.restriction)?;
    check_size(&buffer, fitted.full_w, fitted.full_h)?;

    desc.config = PlaneSnapshot {
        state: if layer.cursor {
            PlaneState::Cursor
        } else {
            PlaneState::Buffer
        },
        buffer_id: Some(buffer.id),
        src: fitted.src,
        full_w: fitted.full_w,
        full_h: fitted.full_h,
        dst,
        format: buffer.format,
        channel: Some(layer.channel),
        // A memory-to-memory pass already applied the transform.
        transform: if layer.via.is_some() {
            Transform::empty()
        } else {
            image.transform
        },
        color: color_params(buffer.format, scanned.dataspace, layer.restriction.attrs),
        blend: image.blend,
        plane_alpha: alpha,
        solid_rgb: 0,
        compressed: buffer.compressed,
    };
    desc.source = Some(layer.source);
    desc.acquire = acquire;
    Ok(())
}

/// Region a composition target window covers.
///
/// Without composition cropping this is the whole panel. Otherwise it is the
/// union of `frames`, widened to the minimum source size and aligned; a region
/// that leaves the panel falls back to the whole panel.
#[must_use]
pub fn composition_crop(
    frames: impl IntoIterator<Item = Rect>,
    r: &Restriction,
    config: &DisplayConfig,
) -> Rect {
    let (xres, yres) = (config.xres as i32, config.yres as i32);
    let panel = Rect::new(0, 0, xres, yres);
    if !config.composition_crop {
        return panel;
    }

    let mut u = frames
        .into_iter()
        .fold(Rect::ZERO, |acc, f| acc.union(&f));
    if u.is_empty() {
        return panel;
    }

    let (min_w, min_h) = (r.min_w as i32, r.min_h as i32);
    if u.width() < min_w {
        u.left = (u.right - min_w).max(0);
        u.right = u.left + min_w;
    }
    if u.height() < min_h {
        u.top = (u.bottom - min_h).max(0);
        u.bottom = u.top + min_h;
    }

    let left = align_down(u.left, r.src_x_align);
    let top = align_down(u.top, r.src_y_align);
    let w = align_up(u.right - left, r.src_w_align);
    let h = align_up(u.bottom - top, r.src_h_align);
    let crop = Rect::from_xywh(left, top, w, h);

    if panel.contains(&crop) { crop } else { panel }
}

/// Everything needed to put a composition target on a window.
#[derive(Clone, Copy, Debug)]
pub struct TargetPlane {
    /// Which target.
    pub kind: TargetKind,
    /// Target buffer, if the producer supplied one.
    pub buffer: Option<BufferHandle>,
    /// Target dataspace.
    pub dataspace: Dataspace,
    /// Covered region, in panel and buffer coordinates alike.
    pub crop: Rect,
    /// Plane source bound to the window.
    pub channel: MppId,
    /// Restrictions of `channel` for the target format.
    pub restriction: Restriction,
    /// The client target is being reused from the previous frame.
    pub skip_static: bool,
}

/// Fills `desc` for a composition target, taking ownership of its acquire
/// fence.
///
/// A client target without a buffer is left for skip-static handling when
/// the frame is static, and disabled otherwise.
pub fn configure_target(
    desc: &mut PlaneDescriptor,
    target: TargetPlane,
    acquire: Option<Fence>,
    config: &DisplayConfig,
) -> Result<(), GeometryError> {
    let Some(buffer) = target.buffer else {
        return match target.kind {
            TargetKind::Client => {
                drop(acquire);
                desc.disable();
                if target.skip_static {
                    // Held for the stored window.
                    desc.config.channel = Some(target.channel);
                } else {
                    tracing::warn!("client target has no buffer");
                }
                Ok(())
            }
            TargetKind::Secondary => Err(GeometryError::MissingBuffer),
        };
    };

    let fitted = align_source(target.crop, buffer.width, buffer.height, &target.restriction)?;
    check_size(&buffer, fitted.full_w, fitted.full_h)?;

    let format = buffer.format;

    desc.config = PlaneSnapshot {
        state: PlaneState::Buffer,
        buffer_id: Some(buffer.id),
        src: fitted.src,
        full_w: fitted.full_w,
        full_h: fitted.full_h,
        dst: clip_destination(target.crop, config.xres, config.yres),
        format,
        channel: Some(target.channel),
        transform: Transform::empty(),
        color: color_params(format, target.dataspace, target.restriction.attrs),
        blend: BlendMode::Premultiplied,
        plane_alpha: 255,
        solid_rgb: 0,
        compressed: buffer.compressed,
    };
    desc.source = Some(PlaneSource::Target(target.kind));
    desc.acquire = acquire;
    Ok(())
}
