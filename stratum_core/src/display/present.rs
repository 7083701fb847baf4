// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Present: descriptor building, submission, fence routing, and recovery.

use crate::classify::CompositionPath;
use crate::driver::GeometryFlags;
use crate::error::{Error, GeometryError};
use crate::fence::{Fence, FenceRole, close_slot, dup_for};
use crate::format::PixelFormat;
use crate::image::ImageInfo;
use crate::layer::{CompositionType, LayerStore};
use crate::plane::{PlaneSource, TargetKind, WinConfigSet, validate_win_config};
use crate::resource::{M2mOutput, M2mSource};
use crate::time::Clock;
use crate::trace::{FenceFault, FenceFaultEvent, FrameSummaryBuilder, PhaseKind, RecoveryEvent, WindowUpdateEvent};
use crate::window::{LayerPlane, TargetPlane, composition_crop, configure_layer, configure_target};
use crate::window_update::{self, UpdateInput, UpdateLayer};

use super::{DisplayState, FrameState};

/// Release fences produced by memory-to-memory jobs, held until the frame's
/// plane releases are known.
#[derive(Debug)]
struct Staged {
    /// Per sorted layer: the layer's own job output.
    layers: Vec<Option<M2mOutput>>,
    /// Per-source release fences of the secondary job, in job order.
    secondary: Vec<Option<Fence>>,
}

impl DisplayState {
    pub(super) fn present(&mut self, layers: &mut LayerStore, clock: &dyn Clock) -> Result<Option<Fence>, Error> {
        if self.state != FrameState::AcceptedChange {
            self.summary = FrameSummaryBuilder::new(self.frame_index);
        }
        self.begin(PhaseKind::Present, clock.now());

        if self.skip_frame {
            return self.present_skipped_frame(layers, clock);
        }

        match self.state {
            FrameState::AcceptedChange => {}
            FrameState::None | FrameState::Presented => {
                self.absorb_changes(layers);
                if let Err(reason) = self.can_skip_validate(layers) {
                    tracing::debug!(reason, "present needs validate");
                    self.state = FrameState::None;
                    self.end(PhaseKind::Present, clock.now());
                    return Err(Error::NotValidated);
                }
                tracing::trace!("skipping validate");
                if let Err(err) = self.resources.deliver_performance_info() {
                    tracing::warn!(%err, "performance info not delivered");
                }
            }
            FrameState::Validated => {
                tracing::warn!("present without accepting the validated frame");
                return Err(self.recover(layers, clock, Error::NotValidated));
            }
        }

        if layers.live_count() == 0 {
            if let Err(err) = self.clear_display() {
                tracing::warn!(%err, "clear display failed");
            }
            self.geometry = GeometryFlags::empty();
            self.state = FrameState::Presented;
            self.finish_frame(clock);
            return Ok(None);
        }

        match self.compose(layers, clock) {
            Ok(retire) => Ok(retire),
            Err(err) => Err(self.recover(layers, clock, err)),
        }
    }

    /// Drops a frame after power-off: nothing is submitted and every pending
    /// acquire fence is closed.
    fn present_skipped_frame(&mut self, layers: &mut LayerStore, clock: &dyn Clock) -> Result<Option<Fence>, Error> {
        tracing::debug!(state = self.state.as_str(), "frame dropped");
        self.close_frame_fences(layers);
        self.geometry |= GeometryFlags::FORCE_VALIDATE;
        let was = self.state;
        self.state = FrameState::Presented;
        self.end(PhaseKind::Present, clock.now());
        match was {
            FrameState::None => Ok(None),
            _ => Err(Error::NotValidated),
        }
    }

    fn compose(&mut self, layers: &mut LayerStore, clock: &dyn Clock) -> Result<Option<Fence>, Error> {
        let images: Vec<ImageInfo> = self.order.iter().map(|&s| layers.image_at(s)).collect();

        // Client-composed layers were already consumed by the client.
        for &slot in &self.order {
            let s = slot as usize;
            if layers.live[s] && layers.path[s] == CompositionPath::Client {
                close_slot(&mut layers.acquire[s], FenceRole::SrcAcquire);
            }
        }

        let mut staged = self.run_m2m(layers, &images)?;
        let mut set = self.build_win_config(layers, &images, &mut staged)?;

        let update = {
            let update_layers: Vec<UpdateLayer<'_>> = self
                .order
                .iter()
                .map(|&slot| {
                    let s = slot as usize;
                    UpdateLayer {
                        frame: layers.frame[s],
                        crop: layers.crop[s],
                        damage: &layers.damage[s],
                        window: layers.window[s],
                        has_buffer: layers.buffer[s].is_some(),
                        transform: layers.transform[s],
                        m2m: layers.m2m[s].is_some(),
                        cursor: layers.path[s] == CompositionPath::Device
                            && self.is_cursor(layers.requested[s]),
                    }
                })
                .collect();
            let current = set.snapshot();
            window_update::compute(
                &UpdateInput {
                    layers: &update_layers,
                    current: &current,
                    last: self.last_config.as_ref(),
                    geometry_changed: !self.geometry.is_empty(),
                    client_active: self.classification.client.is_some(),
                    secondary_active: self.classification.secondary.is_some(),
                },
                &self.config,
            )
        };
        set.set_update_region(update.region());
        self.trace.tracer().window_update(&WindowUpdateEvent {
            frame_index: self.frame_index,
            update,
        });

        validate_win_config(&mut set, &self.config, &*self.resources)?;

        let snapshot = set.snapshot();
        let unchanged = self.config.skip_unchanged_config
            && !self.buffers_changed
            && self.last_config.as_ref() == Some(&snapshot);
        if unchanged {
            tracing::debug!("configuration unchanged, submission skipped");
        } else {
            self.wait_last_retire();
            self.begin(PhaseKind::Submit, clock.now());
            let delivered = self.driver.deliver_win_config(&mut set);
            self.end(PhaseKind::Submit, clock.now());
            delivered.map_err(Error::Submit)?;
            self.last_config = Some(snapshot);
        }

        self.route_release_fences(layers, &mut set, &mut staged);

        let retire = if unchanged {
            dup_for(self.last_retire.as_ref(), FenceRole::Retire)
        } else {
            set.retire.take()
        };
        self.last_retire = dup_for(retire.as_ref(), FenceRole::Retire);

        self.audit_leftovers(layers);

        for &slot in &self.order {
            let s = slot as usize;
            if layers.live[s] {
                layers.last_buffer[s] = layers.buffer[s].map(|b| b.id);
            }
        }
        self.geometry = GeometryFlags::empty();
        self.buffers_changed = false;
        self.state = FrameState::Presented;
        self.finish_frame(clock);
        Ok(retire)
    }

    fn is_cursor(&self, requested: CompositionType) -> bool {
        requested == CompositionType::Cursor && self.config.cursor_support
    }

    /// Runs the per-layer and secondary memory-to-memory jobs.
    fn run_m2m(&mut self, layers: &mut LayerStore, images: &[ImageInfo]) -> Result<Staged, Error> {
        let mut staged = Staged {
            layers: (0..images.len()).map(|_| None).collect(),
            secondary: Vec::new(),
        };

        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            let Some(mpp) = layers.m2m[s] else {
                continue;
            };
            if !layers.live[s] || layers.path[s] != CompositionPath::Device {
                continue;
            }
            let source = M2mSource {
                layer_index: i,
                image: images[i],
                acquire: layers.acquire[s].take(),
            };
            staged.layers[i] = Some(self.resources.process(mpp, vec![source])?);
        }

        if let Some(mpp) = self.secondary.m2m {
            let mut sources = Vec::new();
            for (i, &slot) in self.order.iter().enumerate() {
                let s = slot as usize;
                if layers.live[s] && layers.path[s] == CompositionPath::Secondary {
                    sources.push(M2mSource {
                        layer_index: i,
                        image: images[i],
                        acquire: layers.acquire[s].take(),
                    });
                }
            }
            let output = self.resources.process(mpp, sources)?;
            self.secondary.buffer = output.image.buffer;
            self.secondary.dataspace = output.image.dataspace;
            close_slot(&mut self.secondary.acquire, FenceRole::DstAcquire);
            self.secondary.acquire = output.acquire;
            staged.secondary = output.src_release;
        }
        Ok(staged)
    }

    /// Builds the frame's descriptor set from the classification.
    fn build_win_config(
        &mut self,
        layers: &mut LayerStore,
        images: &[ImageInfo],
        staged: &mut Staged,
    ) -> Result<WinConfigSet, Error> {
        let mut set = WinConfigSet::new();

        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            if !layers.live[s] || layers.path[s] != CompositionPath::Device {
                continue;
            }
            let window = layers.window[s].ok_or(GeometryError::NoWindow)?;
            let channel = layers.overlay_mpp[s].ok_or(GeometryError::NoWindow)?;
            let (via, acquire) = match staged.layers[i].as_mut() {
                Some(output) => (Some(&output.image), output.acquire.take()),
                None => (None, layers.acquire[s].take()),
            };
            let format = via.map_or(images[i].format, |v| v.format);
            let plane = LayerPlane {
                image: &images[i],
                via,
                source: PlaneSource::Layer(layers.id_at(slot)),
                channel,
                restriction: self.resources.restriction(channel, format),
                cursor: self.is_cursor(layers.requested[s]),
            };
            let desc = set.windows.get_mut(window).ok_or(GeometryError::NoWindow)?;
            configure_layer(desc, plane, acquire, &self.config)?;
        }

        if let Some(range) = self.classification.client {
            let window = self.client.window.ok_or(GeometryError::NoWindow)?;
            let channel = self.client.channel.ok_or(GeometryError::NoWindow)?;
            let frames = range.indices().filter_map(|i| {
                let s = *self.order.get(i)? as usize;
                (layers.live[s] && layers.path[s] == CompositionPath::Client).then_some(layers.frame[s])
            });
            let format = self.client.buffer.map_or(PixelFormat::Rgba8888, |b| b.format);
            let restriction = self.resources.restriction(channel, format);
            let target = TargetPlane {
                kind: TargetKind::Client,
                buffer: self.client.buffer,
                dataspace: self.client.dataspace,
                crop: composition_crop(frames, &restriction, &self.config),
                channel,
                restriction,
                skip_static: self.skip.is_skipping(),
            };
            let desc = set.windows.get_mut(window).ok_or(GeometryError::NoWindow)?;
            configure_target(desc, target, self.client.acquire.take(), &self.config)?;

            if let Err(err) = self.skip.apply(&mut set, window, self.client.buffer.as_ref()) {
                self.skip.reset();
                return Err(err);
            }
        }

        if let Some(range) = self.classification.secondary {
            let window = self.secondary.window.ok_or(GeometryError::NoWindow)?;
            let channel = self.secondary.channel.ok_or(GeometryError::NoWindow)?;
            let frames = range.indices().filter_map(|i| {
                let s = *self.order.get(i)? as usize;
                (layers.live[s] && layers.path[s] == CompositionPath::Secondary).then_some(layers.frame[s])
            });
            let format = self.secondary.buffer.map_or(PixelFormat::Rgba8888, |b| b.format);
            let restriction = self.resources.restriction(channel, format);
            let target = TargetPlane {
                kind: TargetKind::Secondary,
                buffer: self.secondary.buffer,
                dataspace: self.secondary.dataspace,
                crop: composition_crop(frames, &restriction, &self.config),
                channel,
                restriction,
                skip_static: false,
            };
            let desc = set.windows.get_mut(window).ok_or(GeometryError::NoWindow)?;
            configure_target(desc, target, self.secondary.acquire.take(), &self.config)?;
        }

        Ok(set)
    }

    /// Bounded wait on the previous frame's retire fence.
    fn wait_last_retire(&mut self) {
        let Some(retire) = &self.last_retire else {
            return;
        };
        let (first, rest) = self.config.retire_wait();
        let Err(err) = retire.wait(first) else {
            return;
        };
        tracing::warn!(%err, "previous frame slow to retire");
        if let Err(err) = retire.wait(rest) {
            tracing::error!(%err, "previous frame did not retire, submitting anyway");
            let fd = retire.raw().0;
            self.trace.tracer().fence_fault(&FenceFaultEvent {
                frame_index: self.frame_index,
                fault: FenceFault::RetireTimeout,
                fd,
            });
        }
    }

    /// Hands the windows' release fences to the layers that fed them.
    fn route_release_fences(&mut self, layers: &mut LayerStore, set: &mut WinConfigSet, staged: &mut Staged) {
        let give = |layers: &mut LayerStore, slot: u32, fence: Option<Fence>| {
            let s = slot as usize;
            if close_slot(&mut layers.release[s], FenceRole::SrcRelease) {
                tracing::debug!(slot, "unclaimed release fence replaced");
            }
            layers.release[s] = fence;
        };

        let client_release = take_release(set, self.client.window);
        for &slot in &self.order {
            let s = slot as usize;
            if layers.live[s] && layers.path[s] == CompositionPath::Client {
                give(layers, slot, dup_for(client_release.as_ref(), FenceRole::SrcRelease));
            }
        }
        drop(client_release);

        for desc in &mut set.windows {
            close_slot(&mut desc.acquire, FenceRole::SrcAcquire);
        }

        for (i, &slot) in self.order.iter().enumerate() {
            let s = slot as usize;
            if !layers.live[s] || layers.path[s] != CompositionPath::Device {
                continue;
            }
            let release = take_release(set, layers.window[s]);
            match (layers.m2m[s], staged.layers[i].as_mut()) {
                (Some(mpp), Some(output)) => {
                    let own = output.src_release.first_mut().and_then(Option::take);
                    let fence = own.or_else(|| dup_for(release.as_ref(), FenceRole::SrcRelease));
                    give(layers, slot, fence);
                    self.resources.set_dst_acquire(mpp, release);
                }
                _ => give(layers, slot, release),
            }
        }

        if let Some(mpp) = self.secondary.m2m {
            let release = take_release(set, self.secondary.window);
            let mut k = 0;
            for &slot in &self.order {
                let s = slot as usize;
                if !layers.live[s] || layers.path[s] != CompositionPath::Secondary {
                    continue;
                }
                let own = staged.secondary.get_mut(k).and_then(Option::take);
                k += 1;
                let fence = own.or_else(|| dup_for(release.as_ref(), FenceRole::SrcRelease));
                give(layers, slot, fence);
            }
            self.resources.set_dst_acquire(mpp, release);
        }
    }

    /// Closes acquire fences nobody consumed this frame.
    fn audit_leftovers(&mut self, layers: &mut LayerStore) {
        let slots: Vec<u32> = layers.live_slots().collect();
        let mut leaked: Vec<i32> = Vec::new();
        for slot in slots {
            if let Some(fence) = layers.acquire[slot as usize].take() {
                tracing::warn!(slot, fd = fence.raw().0, "acquire fence left after present");
                leaked.push(fence.raw().0);
            }
        }
        for (name, target) in [("client", &mut self.client), ("secondary", &mut self.secondary)] {
            if let Some(fence) = target.acquire.take() {
                tracing::warn!(target = name, fd = fence.raw().0, "target acquire fence left after present");
                leaked.push(fence.raw().0);
            }
        }
        for fd in leaked {
            self.trace.tracer().fence_fault(&FenceFaultEvent {
                frame_index: self.frame_index,
                fault: FenceFault::Leftover,
                fd,
            });
        }
    }

    /// Puts the display back into a consistent state after a failed frame.
    ///
    /// Every fence the frame holds is closed and the next frame must be
    /// fully validated. Returns `err` for the caller to report.
    fn recover(&mut self, layers: &mut LayerStore, clock: &dyn Clock, err: Error) -> Error {
        tracing::error!(%err, frame = self.frame_index, "present failed, recovering");
        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut dump = String::new();
            if self.write_dump(layers, &mut dump).is_ok() {
                tracing::debug!("{dump}");
            }
        }

        let slots: Vec<u32> = layers.live_slots().collect();
        for slot in slots {
            let s = slot as usize;
            close_slot(&mut layers.acquire[s], FenceRole::SrcAcquire);
            close_slot(&mut layers.release[s], FenceRole::SrcRelease);
        }
        self.client.reset();
        self.secondary.reset();
        self.resources.drop_pending_fences();
        close_slot(&mut self.last_retire, FenceRole::Retire);
        self.last_config = None;
        self.skip.reset();

        self.geometry |= GeometryFlags::ERROR_CASE;
        self.state = FrameState::Presented;
        self.driver.set_force_panic();

        self.trace.tracer().recovery(&RecoveryEvent {
            frame_index: self.frame_index,
            status: err.status(),
        });
        self.summary.set_recovered(true);
        self.finish_frame(clock);
        err
    }

    /// Closes the present phase and publishes the frame summary.
    fn finish_frame(&mut self, clock: &dyn Clock) {
        self.end(PhaseKind::Present, clock.now());
        let summary = self.summary.finish();
        tracing::trace!(
            frame = summary.frame_index,
            present_ns = summary.present_ns,
            skipped_static = summary.skipped_static,
            "frame done"
        );
        self.trace.tracer().frame_summary(&summary);
        self.frame_index += 1;
        self.summary = FrameSummaryBuilder::new(self.frame_index);
    }
}

fn take_release(set: &mut WinConfigSet, window: Option<usize>) -> Option<Fence> {
    set.windows.get_mut(window?)?.release.take()
}

#[cfg(test)]
mod tests {
    use super::super::tests::Rig;
    use super::*;
    use crate::config::DisplayConfig;
    use crate::driver::PowerMode;
    use crate::error::Status;
    use crate::format::Dataspace;
    use crate::geometry::Rect;
    use crate::image::BufferHandle;
    use crate::plane::PlaneState;
    use crate::resource::Placement;

    fn full() -> Rect {
        Rect::new(0, 0, 100, 100)
    }

    fn made(rig: &Rig) -> usize {
        usize::try_from(*rig.sync.next.lock() - 100).unwrap()
    }

    fn frame(rig: &Rig) -> Result<Option<Fence>, Error> {
        rig.display.validate();
        rig.display.accept_changes().unwrap();
        rig.display.present()
    }

    #[test]
    fn overlay_frame_is_submitted() {
        let rig = Rig::new(DisplayConfig::minimal(100, 100), Placement::Overlay);
        rig.layer(0, full(), 1);
        rig.layer(1, Rect::new(10, 10, 50, 50), 2);

        let retire = frame(&rig).unwrap();
        assert!(retire.is_some());
        assert_eq!(rig.display.frame_state(), FrameState::Presented);
        assert_eq!(rig.display.frame_index(), 1);

        let delivered = rig.delivered.lock();
        assert_eq!(delivered.len(), 1);
        let windows = &delivered[0].windows;
        assert_eq!(windows[0].config.state, PlaneState::Buffer);
        assert_eq!(windows[0].config.buffer_id, Some(1));
        assert_eq!(windows[1].config.buffer_id, Some(2));
        assert_eq!(windows[1].config.dst, Rect::new(10, 10, 50, 50));
        assert_eq!(windows[2].config.state, PlaneState::Disabled);
    }

    #[test]
    fn release_fences_reach_layers() {
        let rig = Rig::new(DisplayConfig::minimal(100, 100), Placement::Overlay);
        let a = rig.layer(0, full(), 1);
        let b = rig.layer(1, Rect::new(10, 10, 50, 50), 2);
        frame(&rig).unwrap();

        let released: Vec<_> = rig.display.take_release_fences().into_iter().map(|(id, _)| id).collect();
        assert_eq!(released, vec![a, b]);
        assert!(rig.display.take_release_fences().is_empty(), "handed out once");
    }

    #[test]
    fn client_layers_share_the_target_release() {
        let rig = Rig::new(DisplayConfig::minimal(100, 100), Placement::ClientOnly);
        rig.layer(0, full(), 1);
        rig.layer(1, full(), 2);
        rig.display.validate();
        rig.display.accept_changes().unwrap();
        rig.display
            .set_client_target(
                Some(BufferHandle::packed(50, 100, 100, PixelFormat::Rgba8888)),
                Some(rig.sync.make()),
                Dataspace::UNKNOWN,
            )
            .unwrap();
        rig.display.present().unwrap();

        let released = rig.display.take_release_fences();
        assert_eq!(released.len(), 2);
        assert_ne!(released[0].1.raw(), released[1].1.raw(), "each layer owns a dup");
        assert_eq!(rig.delivered.lock()[0].windows[0].config.buffer_id, Some(50));
    }

    #[test]
    fn driver_failure_recovers() {
        let rig = Rig::with_driver(DisplayConfig::minimal(100, 100), Placement::Overlay, true);
        rig.layer(0, full(), 1);
        rig.layer(1, Rect::new(10, 10, 50, 50), 2);

        let err = frame(&rig).unwrap_err();
        assert_eq!(err.status(), Status::Internal);
        assert_eq!(rig.display.frame_state(), FrameState::Presented);
        assert_eq!(rig.sync.closed.lock().len(), made(&rig), "no fence leaked");
        let state = rig.display.state.lock();
        assert!(state.geometry.contains(GeometryFlags::ERROR_CASE));
        assert!(state.last_config.is_none());
    }

    #[test]
    fn present_without_accept_recovers() {
        let rig = Rig::new(DisplayConfig::minimal(100, 100), Placement::Overlay);
        rig.layer(0, full(), 1);
        rig.display.validate();
        assert!(matches!(rig.display.present(), Err(Error::NotValidated)));
        assert!(rig.delivered.lock().is_empty());
        assert_eq!(rig.sync.closed.lock().len(), made(&rig));
    }

    #[test]
    fn power_off_drops_the_next_present() {
        let rig = Rig::new(DisplayConfig::minimal(100, 100), Placement::Overlay);
        rig.layer(0, full(), 1);
        rig.display.validate();
        rig.display.accept_changes().unwrap();
        rig.display.set_power_mode(PowerMode::Off).unwrap();
        assert_eq!(rig.display.frame_state(), FrameState::None);

        assert!(rig.display.present().unwrap().is_none());
        assert!(rig.delivered.lock().is_empty());
        assert_eq!(rig.sync.closed.lock().len(), made(&rig));
        assert!(
            rig.display
                .state
                .lock()
                .geometry
                .contains(GeometryFlags::FORCE_VALIDATE)
        );
    }

    #[test]
    fn unchanged_configuration_is_not_resubmitted() {
        let rig = Rig::new(DisplayConfig::primary(100, 100), Placement::Overlay);
        rig.layer(0, full(), 1);
        frame(&rig).unwrap();

        let retire = rig.display.present().unwrap();
        assert!(retire.is_some(), "previous retire fence handed out again");
        assert_eq!(rig.delivered.lock().len(), 1);
        assert_eq!(rig.display.frame_index(), 2);
    }

    #[test]
    fn static_client_frames_reuse_the_target() {
        let rig = Rig::new(DisplayConfig::primary(100, 100), Placement::ClientOnly);
        let a = rig.layer(0, full(), 1);
        let target = |id| Some(BufferHandle::packed(id, 100, 100, PixelFormat::Rgba8888));

        // First frame settles the geometry, second takes the snapshot.
        for id in [10, 11] {
            let v = rig.display.validate();
            assert!(v.has_changes());
            rig.display.accept_changes().unwrap();
            rig.display
                .set_client_target(target(id), Some(rig.sync.make()), Dataspace::UNKNOWN)
                .unwrap();
            rig.display.present().unwrap();
        }
        assert!(!rig.display.is_skipping_static());

        let v = rig.display.validate();
        assert!(rig.display.is_skipping_static());
        assert!(!v.has_changes(), "skipped layers are reported as device");
        rig.display.accept_changes().unwrap();
        assert_eq!(rig.display.layer_committed_type(a).unwrap(), CompositionType::Device);

        let retire = rig.display.present().unwrap();
        assert!(retire.is_some());
        // Same target window as the previous frame, so nothing is submitted.
        assert_eq!(rig.delivered.lock().len(), 2);
    }
}
