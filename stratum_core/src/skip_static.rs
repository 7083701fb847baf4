// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Skip-static: reusing the previous client target when nothing under it
//! changed.
//!
//! When the layers composed by the client are identical to the previous
//! frame, the client does not need to render again. The display marks those
//! layers as skipped, closes their acquire fences, and re-submits the
//! previous client-target window unchanged.
//!
//! The cache works in two steps across consecutive frames:
//!
//! 1. A qualifying frame with no snapshot takes one: per layer in the client
//!    range, a [`SkipEntry`].
//! 2. The next qualifying frame compares against the snapshot. Equal ⇒ skip;
//!    any difference drops the snapshot, and the frame after that snapshots
//!    again.
//!
//! Frames that change geometry never snapshot, so a layer list that just
//! settled needs two more quiet frames before the first skip.

use crate::classify::{CompositionPath, TargetRange};
use crate::config::DisplayConfig;
use crate::error::Error;
use crate::format::Dataspace;
use crate::geometry::{BlendMode, Rect, Transform};
use crate::image::{BufferHandle, ImageInfo};
use crate::plane::{PlaneDescriptor, PlaneSnapshot, PlaneSource, TargetKind, WinConfigSet};

/// The fields of one layer compared between frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SkipEntry {
    /// Buffer identity; a layer without a buffer never compares equal.
    pub buffer_id: Option<u64>,
    /// Source crop.
    pub src: Rect,
    /// Display frame.
    pub dst: Rect,
    /// Dataspace.
    pub dataspace: Dataspace,
    /// Blend mode.
    pub blend: BlendMode,
    /// Transform.
    pub transform: Transform,
    /// Plane alpha.
    pub plane_alpha: f32,
}

impl From<&ImageInfo> for SkipEntry {
    fn from(image: &ImageInfo) -> Self {
        Self {
            buffer_id: image.buffer.map(|b| b.id),
            src: image.crop,
            dst: image.frame,
            dataspace: image.dataspace,
            blend: image.blend,
            transform: image.transform,
            plane_alpha: image.plane_alpha,
        }
    }
}

impl SkipEntry {
    fn matches(&self, other: &Self) -> bool {
        self.buffer_id.is_some() && self == other
    }
}

/// Outcome of one skip-static evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SkipOutcome {
    /// The feature does not apply to this frame.
    Inactive,
    /// A snapshot was taken; the next identical frame can skip.
    Snapshotted,
    /// The frame differs from the snapshot, which was dropped.
    Changed,
    /// A High layer inside the client range is shown on a plane.
    Blocked,
    /// The previous client target is reused.
    Skip,
}

impl SkipOutcome {
    /// Returns a short label for logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Snapshotted => "snapshotted",
            Self::Changed => "changed",
            Self::Blocked => "blocked",
            Self::Skip => "skip",
        }
    }
}

/// Inputs of a skip-static evaluation, in sorted layer order.
#[derive(Clone, Copy, Debug)]
pub struct StaticFrame<'a> {
    /// Layer images.
    pub images: &'a [ImageInfo],
    /// Classified paths.
    pub paths: &'a [CompositionPath],
    /// Client target range.
    pub client: Option<TargetRange>,
    /// Whether any layer requested client composition.
    pub client_requested: bool,
    /// Whether the frame changed geometry.
    pub geometry_changed: bool,
}

/// Skip-static cache of the client target.
#[derive(Debug, Default)]
pub struct SkipStatic {
    snapshot: Option<Vec<SkipEntry>>,
    skip: bool,
    last_config: Option<PlaneSnapshot>,
}

impl SkipStatic {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the current frame reuses the previous client target.
    #[inline]
    #[must_use]
    pub fn is_skipping(&self) -> bool {
        self.skip
    }

    /// Whether a snapshot is held.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.snapshot.is_some()
    }

    /// The client-target window stored by the last non-skipping present.
    #[must_use]
    pub fn last_config(&self) -> Option<&PlaneSnapshot> {
        self.last_config.as_ref()
    }

    /// Drops the snapshot and the skip flag.
    pub fn reset(&mut self) {
        self.snapshot = None;
        self.skip = false;
    }

    /// Drops the snapshot, the skip flag, and the stored window.
    pub fn clear(&mut self) {
        self.reset();
        self.last_config = None;
    }

    /// Returns `true` if the layers in `range` differ from the snapshot.
    ///
    /// Without a snapshot nothing can have changed.
    #[must_use]
    pub fn changed(&self, images: &[ImageInfo], range: Option<TargetRange>) -> bool {
        let Some(snapshot) = &self.snapshot else {
            return false;
        };
        let Some(range) = range else {
            return true;
        };
        if snapshot.len() != range.len() || range.last >= images.len() {
            return true;
        }
        range
            .indices()
            .zip(snapshot)
            .any(|(i, entry)| !entry.matches(&SkipEntry::from(&images[i])))
    }

    /// Runs the skip-static decision for a classified frame.
    ///
    /// On [`SkipOutcome::Skip`] the caller marks every layer in the client
    /// range as skipped.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when a layer below High priority inside the client
    /// range is not composed by the client; the classification is then
    /// inconsistent.
    pub fn evaluate(
        &mut self,
        frame: &StaticFrame<'_>,
        config: &DisplayConfig,
    ) -> Result<SkipOutcome, Error> {
        self.skip = false;

        let range = match frame.client {
            Some(range)
                if config.skip_static
                    && !frame.client_requested
                    && !frame.geometry_changed
                    && range.len() <= config.skip_static_max_layers =>
            {
                range
            }
            _ => {
                self.snapshot = None;
                return Ok(SkipOutcome::Inactive);
            }
        };

        if self.snapshot.is_none() {
            self.snapshot = Some(
                range
                    .indices()
                    .map(|i| SkipEntry::from(&frame.images[i]))
                    .collect(),
            );
            return Ok(SkipOutcome::Snapshotted);
        }

        if self.changed(frame.images, Some(range)) {
            self.snapshot = None;
            return Ok(SkipOutcome::Changed);
        }

        for i in range.indices() {
            if frame.paths[i] == CompositionPath::Client {
                continue;
            }
            self.snapshot = None;
            if frame.images[i].priority.is_high() {
                return Ok(SkipOutcome::Blocked);
            }
            tracing::error!(layer = i, path = frame.paths[i].as_str(), "non-client layer in client range");
            return Err(Error::Internal("non-client layer inside the client range"));
        }

        self.skip = true;
        Ok(SkipOutcome::Skip)
    }

    /// Applies the decision to the client-target window after descriptors
    /// are built.
    ///
    /// Without skip, the window is stored for later reuse. With skip and no
    /// new target buffer, the stored window replaces the current one, bound
    /// to the current `channel` and without an acquire fence.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when skipping without a stored window, or when the
    /// client supplied a different buffer than the one stored.
    pub fn apply(
        &mut self,
        set: &mut WinConfigSet,
        window: usize,
        target_buffer: Option<&BufferHandle>,
    ) -> Result<(), Error> {
        let desc = set
            .windows
            .get_mut(window)
            .ok_or(Error::Internal("client target window out of range"))?;

        if !self.skip {
            self.last_config = Some(desc.config);
            tracing::debug!(window, "client target window stored");
            return Ok(());
        }

        let last = self
            .last_config
            .ok_or(Error::Internal("skip-static without a stored client target"))?;
        match target_buffer {
            None => {
                let mut config = last;
                config.channel = desc.config.channel;
                *desc = PlaneDescriptor::from_snapshot(config, Some(PlaneSource::Target(TargetKind::Client)));
                tracing::debug!(window, "client target window reused");
                Ok(())
            }
            Some(buffer) if Some(buffer.id) == last.buffer_id => Ok(()),
            Some(buffer) => {
                tracing::error!(
                    window,
                    buffer = buffer.id,
                    last = ?last.buffer_id,
                    "client target changed while skipping"
                );
                Err(Error::Internal("client target buffer changed while skipping"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::tests::CountingSync;
    use crate::format::PixelFormat;
    use crate::geometry::Color;
    use crate::image::Priority;
    use crate::plane::PlaneState;
    use crate::resource::MppId;

    fn image(id: u64) -> ImageInfo {
        ImageInfo {
            buffer: Some(BufferHandle::packed(id, 64, 64, PixelFormat::Rgba8888)),
            crop: Rect::from_xywh(0, 0, 64, 64),
            frame: Rect::from_xywh(0, 0, 64, 64),
            format: PixelFormat::Rgba8888,
            dataspace: Dataspace::SRGB,
            transform: Transform::empty(),
            blend: BlendMode::Premultiplied,
            plane_alpha: 1.0,
            color: Color::default(),
            priority: Priority::Normal,
        }
    }

    fn frame<'a>(images: &'a [ImageInfo], paths: &'a [CompositionPath]) -> StaticFrame<'a> {
        StaticFrame {
            images,
            paths,
            client: Some(TargetRange {
                first: 0,
                last: images.len() - 1,
            }),
            client_requested: false,
            geometry_changed: false,
        }
    }

    #[test]
    fn identical_frames_skip_after_snapshot() {
        let config = DisplayConfig::primary(1080, 1920);
        let images = [image(1), image(2), image(3)];
        let paths = [CompositionPath::Client; 3];
        let mut cache = SkipStatic::new();

        let first = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(first, SkipOutcome::Snapshotted, "first frame snapshots");
        assert!(!cache.is_skipping(), "no skip on the snapshot frame");

        let second = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(second, SkipOutcome::Skip, "identical frame skips");
        assert!(cache.is_skipping(), "skip flag set");
    }

    #[test]
    fn changed_field_drops_snapshot() {
        let config = DisplayConfig::primary(1080, 1920);
        let mut images = [image(1), image(2)];
        let paths = [CompositionPath::Client; 2];
        let mut cache = SkipStatic::new();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();

        images[1].plane_alpha = 0.5;
        let outcome = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(outcome, SkipOutcome::Changed, "alpha change detected");
        assert!(!cache.is_initialized(), "snapshot dropped");

        let outcome = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(outcome, SkipOutcome::Snapshotted, "re-snapshots");
    }

    #[test]
    fn missing_buffer_never_matches() {
        let config = DisplayConfig::primary(1080, 1920);
        let mut images = [image(1), image(2)];
        images[0].buffer = None;
        let paths = [CompositionPath::Client; 2];
        let mut cache = SkipStatic::new();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert!(cache.changed(&images, Some(TargetRange { first: 0, last: 1 })), "bufferless layer counts as changed");
    }

    #[test]
    fn geometry_change_and_client_request_deactivate() {
        let config = DisplayConfig::primary(1080, 1920);
        let images = [image(1), image(2)];
        let paths = [CompositionPath::Client; 2];
        let mut cache = SkipStatic::new();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();

        let mut f = frame(&images, &paths);
        f.geometry_changed = true;
        assert_eq!(cache.evaluate(&f, &config).unwrap(), SkipOutcome::Inactive, "geometry change");
        assert!(!cache.is_initialized(), "snapshot dropped on geometry change");

        let mut f = frame(&images, &paths);
        f.client_requested = true;
        assert_eq!(cache.evaluate(&f, &config).unwrap(), SkipOutcome::Inactive, "client request");
    }

    #[test]
    fn range_too_long_is_inactive() {
        let config = DisplayConfig::primary(1080, 1920);
        let images: Vec<ImageInfo> = (0..=config.skip_static_max_layers as u64).map(image).collect();
        let paths = vec![CompositionPath::Client; images.len()];
        let mut cache = SkipStatic::new();
        let outcome = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(outcome, SkipOutcome::Inactive, "range exceeds the limit");
    }

    #[test]
    fn device_layer_in_range() {
        let config = DisplayConfig::primary(1080, 1920);
        let mut images = [image(1), image(2), image(3)];
        let paths = [CompositionPath::Client, CompositionPath::Device, CompositionPath::Client];
        let mut cache = SkipStatic::new();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert!(
            matches!(cache.evaluate(&frame(&images, &paths), &config), Err(Error::Internal(_))),
            "normal device layer inside the range is a fault"
        );

        images[1].priority = Priority::High;
        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        let outcome = cache.evaluate(&frame(&images, &paths), &config).unwrap();
        assert_eq!(outcome, SkipOutcome::Blocked, "high layer blocks the skip");
    }

    fn client_window(set: &mut WinConfigSet, buffer_id: u64, channel: u32) {
        set.windows[1].config.state = PlaneState::Buffer;
        set.windows[1].config.buffer_id = Some(buffer_id);
        set.windows[1].config.channel = Some(MppId(channel));
        set.windows[1].source = Some(PlaneSource::Target(TargetKind::Client));
    }

    #[test]
    fn apply_stores_then_reuses() {
        let config = DisplayConfig::primary(1080, 1920);
        let images = [image(1), image(2)];
        let paths = [CompositionPath::Client; 2];
        let mut cache = SkipStatic::new();

        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        let mut set = WinConfigSet::new();
        client_window(&mut set, 77, 3);
        cache.apply(&mut set, 1, None).unwrap();
        assert_eq!(cache.last_config().and_then(|c| c.buffer_id), Some(77), "window stored");

        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        let sync = CountingSync::shared();
        let mut set = WinConfigSet::new();
        set.windows[1].config.channel = Some(MppId(5));
        set.windows[1].acquire = Some(sync.make());
        cache.apply(&mut set, 1, None).unwrap();

        let reused = &set.windows[1];
        assert_eq!(reused.config.buffer_id, Some(77), "previous buffer reused");
        assert_eq!(reused.config.channel, Some(MppId(5)), "current channel kept");
        assert!(reused.acquire.is_none(), "no acquire fence on reuse");
        assert_eq!(sync.closed.lock().len(), 1, "replaced fence closed");
    }

    #[test]
    fn apply_rejects_changed_target_buffer() {
        let config = DisplayConfig::primary(1080, 1920);
        let images = [image(1), image(2)];
        let paths = [CompositionPath::Client; 2];
        let mut cache = SkipStatic::new();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();
        let mut set = WinConfigSet::new();
        client_window(&mut set, 77, 3);
        cache.apply(&mut set, 1, None).unwrap();
        cache.evaluate(&frame(&images, &paths), &config).unwrap();

        let same = BufferHandle::packed(77, 1080, 1920, PixelFormat::Rgba8888);
        assert!(cache.apply(&mut set, 1, Some(&same)).is_ok(), "same buffer accepted");
        let other = BufferHandle::packed(78, 1080, 1920, PixelFormat::Rgba8888);
        assert!(cache.apply(&mut set, 1, Some(&other)).is_err(), "different buffer rejected");
    }
}
