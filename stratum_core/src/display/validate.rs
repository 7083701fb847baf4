// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Validate, accept, and the skip-validate check.

use crate::classify::{Classification, ClassifyInput, CompositionPath, classify};
use crate::driver::GeometryFlags;
use crate::error::{Error, GeometryError};
use crate::image::ImageInfo;
use crate::layer::{CompositionType, LayerId, LayerStore};
use crate::recomp::low_fps_range;
use crate::resource::Placement;
use crate::skip_static::{SkipOutcome, StaticFrame};
use crate::time::{Clock, HostTime};
use crate::trace::{ClassificationEvent, FrameSummaryBuilder, PhaseKind, SkipStaticEvent};

use super::{DisplayState, FrameState, target_image};

/// Result of [`Display::validate`](super::Display::validate).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    /// Layers whose resolved composition type differs from the requested one.
    pub changed_types: usize,
    /// Pending display requests.
    pub requests: usize,
}

impl Validation {
    /// Whether the client must fetch changed types or requests.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.changed_types > 0 || self.requests > 0
    }
}

/// Per-layer request to the compositor client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayRequest {
    /// Clear the client target under this layer before composing.
    ClearClientTarget,
}

impl DisplayState {
    pub(super) fn validate(&mut self, layers: &mut LayerStore, clock: &dyn Clock) -> Validation {
        let now = clock.now();
        self.summary = FrameSummaryBuilder::new(self.frame_index);
        self.begin(PhaseKind::Validate, now);

        self.absorb_changes(layers);
        self.client.reset();
        self.secondary.reset();
        self.order = layers.sorted_slots();
        for &slot in &self.order {
            let s = slot as usize;
            layers.window[s] = None;
            layers.overlay_mpp[s] = None;
            layers.m2m[s] = None;
            layers.skip_static[s] = false;
        }
        let images: Vec<ImageInfo> = self.order.iter().map(|&s| layers.image_at(s)).collect();

        self.pre_process(&images);
        self.check_layer_fps(layers, now);
        self.recomp.note_update();
        self.evaluate_recomposition(layers, now);

        let mut fallback = false;
        let result = self
            .assign(layers, &images)
            .and_then(|()| self.skip_static(layers, &images));
        if let Err(err) = result {
            self.fall_back_to_client(layers, &images, &err);
            fallback = true;
        }

        let c = &self.classification;
        let count = |path: CompositionPath| c.paths.iter().filter(|&&p| p == path).count();
        let event = ClassificationEvent {
            frame_index: self.frame_index,
            layers: c.paths.len(),
            device: count(CompositionPath::Device),
            client: count(CompositionPath::Client),
            secondary: count(CompositionPath::Secondary),
            demoted: c.demoted,
            fallback,
        };
        tracing::debug!(
            layers = event.layers,
            device = event.device,
            client = event.client,
            secondary = event.secondary,
            demoted = event.demoted,
            fallback,
            "classified"
        );
        self.trace.tracer().classification(&event);

        self.resolve_types(layers);
        self.state = FrameState::Validated;
        self.skip_frame = false;

        let validation = Validation {
            changed_types: self.changed(layers).count(),
            requests: self.display_requests(layers).len(),
        };
        self.end(PhaseKind::Validate, clock.now());
        validation
    }

    /// Display-wide checks before classification.
    fn pre_process(&mut self, images: &[ImageInfo]) {
        let single = images
            .iter()
            .any(|i| i.buffer.is_some_and(|b| b.single_buffer));
        if single != self.single_buffer {
            tracing::debug!(single, "single-buffer layer state changed");
            self.single_buffer = single;
            self.driver.disable_self_refresh(single);
            self.geometry |= GeometryFlags::SINGLE_BUFFER;
        }
    }

    /// Closes fps windows and finds the low-fps range.
    fn check_layer_fps(&mut self, layers: &mut LayerStore, now: HostTime) {
        let mut fps = Vec::with_capacity(self.order.len());
        let mut priorities = Vec::with_capacity(self.order.len());
        for &slot in &self.order {
            let s = slot as usize;
            fps.push(layers.fps[s].check(now));
            priorities.push(layers.priority[s]);
        }
        let range = if self.config.handle_low_fps_layers {
            low_fps_range(&fps, &priorities, self.config.low_fps_threshold)
        } else {
            None
        };
        if range != self.low_fps {
            tracing::debug!(?range, "low-fps range changed");
            self.low_fps = range;
            self.geometry |= GeometryFlags::LAYER;
        }
    }

    /// Classifies layers and binds hardware resources.
    fn assign(&mut self, layers: &mut LayerStore, images: &[ImageInfo]) -> Result<(), Error> {
        self.resources.reset_assigned(false);
        self.resources.check_scenario(images.len())?;

        let forced = self.recomp.forces_client();
        let inputs: Vec<ClassifyInput> = images
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let s = self.order[i] as usize;
                let mut placement = self.resources.placement(image);
                if layers.flags[s].preprocessed && placement == Placement::Overlay {
                    placement = Placement::OverlayViaM2m;
                }
                ClassifyInput {
                    image: *image,
                    placement,
                    secondary_ok: self.resources.secondary_assignable(image),
                    force_client: forced
                        || layers.requested[s] == CompositionType::Client
                        || self.low_fps.is_some_and(|r| r.contains(i)),
                }
            })
            .collect();

        let mut c = classify(&inputs, self.config.window_count, self.config.secondary_combo)?;

        if let Some(range) = c.secondary {
            let sources = range
                .indices()
                .filter(|&i| c.paths[i] == CompositionPath::Secondary)
                .count();
            match self.resources.assign_m2m(sources) {
                Ok(mpp) => self.secondary.m2m = Some(mpp),
                Err(err) => {
                    tracing::warn!(%err, sources, "secondary compositor unavailable");
                    c.evict_secondary();
                    self.classification = c;
                    return Err(err.into());
                }
            }
        }

        self.plan = c.assign_windows();
        self.classification = c;

        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            let path = self.classification.paths[i];
            layers.path[s] = path;
            layers.window[s] = self.plan.layers[i];
            if path != CompositionPath::Device {
                continue;
            }
            let window = self.plan.layers[i].ok_or(GeometryError::NoWindow)?;
            layers.overlay_mpp[s] = Some(self.resources.assign_overlay(window, &images[i])?);
            if inputs[i].placement == Placement::OverlayViaM2m {
                layers.m2m[s] = Some(self.resources.assign_m2m(1)?);
            }
        }

        let target = target_image(&self.config);
        if self.classification.client.is_some() {
            let window = self.plan.client.ok_or(GeometryError::NoWindow)?;
            self.client.window = Some(window);
            self.client.channel = Some(self.resources.assign_overlay(window, &target)?);
        }
        if self.classification.secondary.is_some() {
            let window = self.plan.secondary.ok_or(GeometryError::NoWindow)?;
            self.secondary.window = Some(window);
            self.secondary.channel = Some(self.resources.assign_overlay(window, &target)?);
        }
        Ok(())
    }

    /// Decides whether the client target of the previous frame is reused.
    fn skip_static(&mut self, layers: &mut LayerStore, images: &[ImageInfo]) -> Result<(), Error> {
        let client_requested = self
            .order
            .iter()
            .any(|&s| layers.requested[s as usize] == CompositionType::Client);
        let frame = StaticFrame {
            images,
            paths: &self.classification.paths,
            client: self.classification.client,
            client_requested,
            geometry_changed: !self.geometry.is_empty(),
        };
        let outcome = match self.skip.evaluate(&frame, &self.config) {
            Ok(outcome) => outcome,
            Err(err) => {
                self.skip.reset();
                return Err(err);
            }
        };

        let covered = self.classification.client.map_or(0, |r| r.len());
        if outcome == SkipOutcome::Skip {
            if let Some(range) = self.classification.client {
                for i in range.indices() {
                    layers.skip_static[self.order[i] as usize] = true;
                }
            }
        }
        tracing::debug!(outcome = outcome.as_str(), layers = covered, "skip-static");
        self.summary.set_skipped_static(outcome == SkipOutcome::Skip);
        self.trace.tracer().skip_static(&SkipStaticEvent {
            frame_index: self.frame_index,
            outcome,
            layers: covered,
        });
        Ok(())
    }

    /// Puts every layer on the client target after a failed classification.
    fn fall_back_to_client(&mut self, layers: &mut LayerStore, images: &[ImageInfo], err: &Error) {
        tracing::warn!(%err, "classification failed, composing every layer on the client");
        self.resources.reset_assigned(true);
        self.client.reset();
        self.secondary.reset();
        self.skip.reset();
        self.geometry |= GeometryFlags::ERROR_CASE;

        self.classification = Classification::all_client(images.len());
        self.plan = self.classification.assign_windows();
        for &slot in &self.order {
            let s = slot as usize;
            layers.path[s] = CompositionPath::Client;
            layers.window[s] = None;
            layers.overlay_mpp[s] = None;
            layers.m2m[s] = None;
            layers.skip_static[s] = false;
        }

        if let Some(window) = self.plan.client {
            self.client.window = Some(window);
            match self.resources.assign_overlay(window, &target_image(&self.config)) {
                Ok(mpp) => self.client.channel = Some(mpp),
                Err(err) => tracing::error!(%err, window, "no plane for the client target"),
            }
        }
    }

    /// Maps each layer's path to the type reported to the client.
    fn resolve_types(&mut self, layers: &mut LayerStore) {
        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            let requested = layers.requested[s];
            layers.resolved[s] = match self.classification.paths[i] {
                CompositionPath::Client if layers.skip_static[s] => CompositionType::Device,
                CompositionPath::Client => CompositionType::Client,
                CompositionPath::Secondary => CompositionType::Device,
                CompositionPath::Device => match requested {
                    CompositionType::Cursor if self.config.cursor_support => CompositionType::Cursor,
                    CompositionType::SolidColor => CompositionType::SolidColor,
                    _ => CompositionType::Device,
                },
            };
        }
    }

    /// Live slots of the frame whose resolved type differs from the request.
    fn changed<'a>(&'a self, layers: &'a LayerStore) -> impl Iterator<Item = u32> + 'a {
        self.order.iter().copied().filter(move |&slot| {
            let s = slot as usize;
            layers.live[s] && layers.resolved[s] != layers.requested[s]
        })
    }

    pub(super) fn changed_composition_types(
        &self,
        layers: &LayerStore,
    ) -> Result<Vec<(LayerId, CompositionType)>, Error> {
        if self.state != FrameState::Validated {
            return Err(Error::NotValidated);
        }
        Ok(self
            .changed(layers)
            .map(|s| (layers.id_at(s), layers.resolved[s as usize]))
            .collect())
    }

    /// High layers under the client target ask for it to be cleared.
    pub(super) fn display_requests(&self, layers: &LayerStore) -> Vec<(LayerId, DisplayRequest)> {
        let Some(range) = self.classification.client else {
            return Vec::new();
        };
        (range.first..range.last)
            .filter_map(|i| {
                let s = *self.order.get(i)?;
                let live = layers.live[s as usize];
                (live && layers.priority[s as usize].is_high())
                    .then(|| (layers.id_at(s), DisplayRequest::ClearClientTarget))
            })
            .collect()
    }

    pub(super) fn accept_changes(&mut self, layers: &mut LayerStore, clock: &dyn Clock) -> Result<(), Error> {
        if self.state != FrameState::Validated {
            tracing::warn!(state = self.state.as_str(), "accept outside validated frame");
            return Err(Error::NotValidated);
        }
        self.begin(PhaseKind::Accept, clock.now());
        for &slot in &self.order {
            let s = slot as usize;
            if layers.live[s] {
                layers.committed[s] = layers.resolved[s];
            }
        }
        self.state = FrameState::AcceptedChange;
        self.end(PhaseKind::Accept, clock.now());
        Ok(())
    }

    /// Why the previous classification cannot be reused, if it cannot.
    pub(super) fn can_skip_validate(&self, layers: &LayerStore) -> Result<(), &'static str> {
        if !self.config.skip_validate {
            return Err("disabled");
        }
        if self.state == FrameState::None {
            return Err("first frame");
        }
        if !self.geometry.is_empty() {
            return Err("geometry changed");
        }
        if self.classification.client.is_some() {
            return Err("client composition");
        }
        if self
            .order
            .iter()
            .any(|&s| layers.requested[s as usize] == CompositionType::Client)
        {
            return Err("client composition requested");
        }
        if self.skip.is_initialized() && self.skip.is_skipping() {
            let images: Vec<ImageInfo> = self.order.iter().map(|&s| layers.image_at(s)).collect();
            if self.skip.changed(&images, self.classification.client) {
                return Err("skip-static layers changed");
            }
        }
        if !self.display_requests(layers).is_empty() {
            return Err("display requests pending");
        }
        Ok(())
    }
}
