// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Struct-of-arrays layer storage with allocation, properties, fences, and
//! per-frame composition state.

use understory_dirty::{CycleHandling, DirtyTracker};

use crate::classify::CompositionPath;
use crate::dirty;
use crate::fence::Fence;
use crate::format::{Dataspace, PixelFormat};
use crate::geometry::{BlendMode, Color, Rect, Transform};
use crate::image::{BufferHandle, ImageInfo, Priority};
use crate::resource::MppId;
use crate::time::HostTime;

use super::fps::FpsCounter;
use super::id::LayerId;
use super::{CompositionType, LayerChanges, LayerFlags};

/// Struct-of-arrays storage for all layers of one display.
///
/// Layers are addressed by [`LayerId`] handles. Destroyed layers are recycled
/// via a free list, and generation counters prevent stale handle access.
/// Dropping a slot's fences closes them, so destroying a layer never leaks.
#[derive(Debug)]
pub struct LayerStore {
    // -- Properties (set by the client) --
    pub(crate) buffer: Vec<Option<BufferHandle>>,
    pub(crate) crop: Vec<Rect>,
    pub(crate) frame: Vec<Rect>,
    pub(crate) z_order: Vec<u32>,
    pub(crate) blend: Vec<BlendMode>,
    pub(crate) plane_alpha: Vec<f32>,
    pub(crate) transform: Vec<Transform>,
    pub(crate) dataspace: Vec<Dataspace>,
    pub(crate) priority: Vec<Priority>,
    pub(crate) damage: Vec<Vec<Rect>>,
    pub(crate) color: Vec<Color>,
    pub(crate) requested: Vec<CompositionType>,
    pub(crate) flags: Vec<LayerFlags>,

    // -- Fences --
    pub(crate) acquire: Vec<Option<Fence>>,
    pub(crate) release: Vec<Option<Fence>>,

    // -- Frame state (written by validate and present) --
    pub(crate) path: Vec<CompositionPath>,
    pub(crate) resolved: Vec<CompositionType>,
    pub(crate) committed: Vec<CompositionType>,
    pub(crate) window: Vec<Option<usize>>,
    pub(crate) overlay_mpp: Vec<Option<MppId>>,
    pub(crate) m2m: Vec<Option<MppId>>,
    pub(crate) skip_static: Vec<bool>,
    pub(crate) last_buffer: Vec<Option<u64>>,
    pub(crate) fps: Vec<FpsCounter>,

    // -- Allocation --
    pub(crate) generation: Vec<u32>,
    pub(crate) live: Vec<bool>,
    pub(crate) free_list: Vec<u32>,
    pub(crate) len: u32,

    // -- Dirty tracking --
    pub(crate) dirty: DirtyTracker<u32>,
}

impl Default for LayerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerStore {
    /// Creates an empty layer store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            crop: Vec::new(),
            frame: Vec::new(),
            z_order: Vec::new(),
            blend: Vec::new(),
            plane_alpha: Vec::new(),
            transform: Vec::new(),
            dataspace: Vec::new(),
            priority: Vec::new(),
            damage: Vec::new(),
            color: Vec::new(),
            requested: Vec::new(),
            flags: Vec::new(),
            acquire: Vec::new(),
            release: Vec::new(),
            path: Vec::new(),
            resolved: Vec::new(),
            committed: Vec::new(),
            window: Vec::new(),
            overlay_mpp: Vec::new(),
            m2m: Vec::new(),
            skip_static: Vec::new(),
            last_buffer: Vec::new(),
            fps: Vec::new(),
            generation: Vec::new(),
            live: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            dirty: DirtyTracker::with_cycle_handling(CycleHandling::Error),
        }
    }

    // -- Allocation API --

    /// Creates a new layer and returns its handle.
    ///
    /// The layer starts without a buffer, with empty crop and frame, opaque
    /// premultiplied blending, and a requested type of
    /// [`CompositionType::Device`].
    pub fn create_layer(&mut self, now: HostTime) -> LayerId {
        let idx = if let Some(idx) = self.free_list.pop() {
            let i = idx as usize;
            self.generation[i] += 1;
            self.buffer[i] = None;
            self.crop[i] = Rect::ZERO;
            self.frame[i] = Rect::ZERO;
            self.z_order[i] = 0;
            self.blend[i] = BlendMode::Premultiplied;
            self.plane_alpha[i] = 1.0;
            self.transform[i] = Transform::empty();
            self.dataspace[i] = Dataspace::UNKNOWN;
            self.priority[i] = Priority::Normal;
            self.damage[i].clear();
            self.color[i] = Color::default();
            self.requested[i] = CompositionType::Device;
            self.flags[i] = LayerFlags::default();
            self.acquire[i] = None;
            self.release[i] = None;
            self.path[i] = CompositionPath::Client;
            self.resolved[i] = CompositionType::Device;
            self.committed[i] = CompositionType::Device;
            self.window[i] = None;
            self.overlay_mpp[i] = None;
            self.m2m[i] = None;
            self.skip_static[i] = false;
            self.last_buffer[i] = None;
            self.fps[i] = FpsCounter::new(now);
            self.live[i] = true;
            idx
        } else {
            let idx = self.len;
            self.len += 1;
            self.buffer.push(None);
            self.crop.push(Rect::ZERO);
            self.frame.push(Rect::ZERO);
            self.z_order.push(0);
            self.blend.push(BlendMode::Premultiplied);
            self.plane_alpha.push(1.0);
            self.transform.push(Transform::empty());
            self.dataspace.push(Dataspace::UNKNOWN);
            self.priority.push(Priority::Normal);
            self.damage.push(Vec::new());
            self.color.push(Color::default());
            self.requested.push(CompositionType::Device);
            self.flags.push(LayerFlags::default());
            self.acquire.push(None);
            self.release.push(None);
            self.path.push(CompositionPath::Client);
            self.resolved.push(CompositionType::Device);
            self.committed.push(CompositionType::Device);
            self.window.push(None);
            self.overlay_mpp.push(None);
            self.m2m.push(None);
            self.skip_static.push(false);
            self.last_buffer.push(None);
            self.fps.push(FpsCounter::new(now));
            self.generation.push(0);
            self.live.push(true);
            idx
        };

        self.dirty.mark(idx, dirty::TOPOLOGY);

        LayerId {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    /// Destroys a layer, closing any fences it still holds.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale.
    pub fn destroy_layer(&mut self, id: LayerId) {
        self.validate(id);
        let i = id.idx as usize;
        self.acquire[i] = None;
        self.release[i] = None;
        self.buffer[i] = None;
        self.live[i] = false;

        self.dirty.remove_key(id.idx);

        // Bump generation so old handles immediately fail validation.
        self.generation[i] += 1;

        self.free_list.push(id.idx);
        self.dirty.mark(id.idx, dirty::TOPOLOGY);
    }

    /// Returns whether the given handle refers to a live layer.
    #[must_use]
    pub fn is_alive(&self, id: LayerId) -> bool {
        (id.idx < self.len)
            && self.generation[id.idx as usize] == id.generation
            && self.live[id.idx as usize]
    }

    /// Number of live layers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.len as usize - self.free_list.len()
    }

    /// Handle for a live slot.
    ///
    /// # Panics
    ///
    /// Panics if `idx` is not a live slot.
    #[must_use]
    pub fn id_at(&self, idx: u32) -> LayerId {
        assert!(
            idx < self.len && self.live[idx as usize],
            "slot {idx} is not live"
        );
        LayerId {
            idx,
            generation: self.generation[idx as usize],
        }
    }

    // -- Mutation API (marks dirty when a value changes) --

    /// Attaches a buffer and its acquire fence.
    ///
    /// A still-pending acquire fence from an earlier call is closed; it was
    /// never consumed. Buffer updates count towards the layer's refresh rate.
    pub fn set_buffer(
        &mut self,
        id: LayerId,
        buffer: Option<BufferHandle>,
        acquire: Option<Fence>,
    ) {
        self.validate(id);
        let i = id.idx as usize;
        if let Some(stale) = self.acquire[i].take() {
            tracing::debug!(layer = ?id, fd = stale.raw().0, "replacing unconsumed acquire fence");
        }
        self.acquire[i] = acquire;
        self.buffer[i] = buffer;
        self.fps[i].record();
        self.dirty.mark(id.idx, dirty::BUFFER);
    }

    /// Sets the source crop.
    pub fn set_crop(&mut self, id: LayerId, crop: Rect) {
        self.validate(id);
        if replace(&mut self.crop[id.idx as usize], crop) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the destination frame.
    pub fn set_frame(&mut self, id: LayerId, frame: Rect) {
        self.validate(id);
        if replace(&mut self.frame[id.idx as usize], frame) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the z-order.
    pub fn set_z_order(&mut self, id: LayerId, z: u32) {
        self.validate(id);
        if replace(&mut self.z_order[id.idx as usize], z) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the blend mode.
    pub fn set_blend(&mut self, id: LayerId, blend: BlendMode) {
        self.validate(id);
        if replace(&mut self.blend[id.idx as usize], blend) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the plane alpha.
    pub fn set_plane_alpha(&mut self, id: LayerId, alpha: f32) {
        self.validate(id);
        if replace(&mut self.plane_alpha[id.idx as usize], alpha) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the scan-out transform.
    pub fn set_transform(&mut self, id: LayerId, transform: Transform) {
        self.validate(id);
        if replace(&mut self.transform[id.idx as usize], transform) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the dataspace.
    pub fn set_dataspace(&mut self, id: LayerId, dataspace: Dataspace) {
        self.validate(id);
        if replace(&mut self.dataspace[id.idx as usize], dataspace) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the overlay priority.
    pub fn set_priority(&mut self, id: LayerId, priority: Priority) {
        self.validate(id);
        if replace(&mut self.priority[id.idx as usize], priority) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Replaces the damage list. Damage does not invalidate geometry.
    pub fn set_damage(&mut self, id: LayerId, damage: &[Rect]) {
        self.validate(id);
        let d = &mut self.damage[id.idx as usize];
        d.clear();
        d.extend_from_slice(damage);
    }

    /// Sets the flat color used when the layer has no buffer.
    pub fn set_color(&mut self, id: LayerId, color: Color) {
        self.validate(id);
        if replace(&mut self.color[id.idx as usize], color) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the composition type requested by the client.
    pub fn set_composition_type(&mut self, id: LayerId, ty: CompositionType) {
        self.validate(id);
        if replace(&mut self.requested[id.idx as usize], ty) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    /// Sets the per-layer flags.
    pub fn set_flags(&mut self, id: LayerId, flags: LayerFlags) {
        self.validate(id);
        if replace(&mut self.flags[id.idx as usize], flags) {
            self.dirty.mark(id.idx, dirty::GEOMETRY);
        }
    }

    // -- Query API --

    /// Returns the composition type requested by the client.
    #[must_use]
    pub fn composition_type(&self, id: LayerId) -> CompositionType {
        self.validate(id);
        self.requested[id.idx as usize]
    }

    /// Returns the composition path chosen by the last validate.
    #[must_use]
    pub fn path(&self, id: LayerId) -> CompositionPath {
        self.validate(id);
        self.path[id.idx as usize]
    }

    /// Returns the composition type committed by the last accept.
    #[must_use]
    pub fn committed_type(&self, id: LayerId) -> CompositionType {
        self.validate(id);
        self.committed[id.idx as usize]
    }

    /// Returns `true` while an acquire fence is pending.
    #[must_use]
    pub fn has_acquire_fence(&self, id: LayerId) -> bool {
        self.validate(id);
        self.acquire[id.idx as usize].is_some()
    }

    // -- Raw-index accessors for the frame pipeline --
    //
    // These accept raw slot indices as returned by `sorted_slots()`, skipping
    // generation validation.

    /// Builds the image description of slot `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= self.len`.
    #[must_use]
    pub fn image_at(&self, idx: u32) -> ImageInfo {
        assert!(
            idx < self.len,
            "slot index {idx} out of range (len {})",
            self.len
        );
        let i = idx as usize;
        let buffer = self.buffer[i];
        ImageInfo {
            buffer,
            crop: self.crop[i],
            frame: self.frame[i],
            format: buffer.map_or(PixelFormat::Rgba8888, |b| b.format),
            dataspace: self.dataspace[i],
            transform: self.transform[i],
            blend: self.blend[i],
            plane_alpha: self.plane_alpha[i],
            color: self.color[i],
            priority: self.priority[i],
        }
    }

    /// Live slots in slot order.
    pub fn live_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len).filter(|&i| self.live[i as usize])
    }

    /// Live slots sorted bottom to top.
    ///
    /// Equal z-orders are ordered by slot index so the result is
    /// deterministic; such ties are logged.
    #[must_use]
    pub fn sorted_slots(&self) -> Vec<u32> {
        let mut slots: Vec<u32> = self.live_slots().collect();
        slots.sort_by_key(|&i| (self.z_order[i as usize], i));
        for pair in slots.windows(2) {
            let (a, b) = (pair[0] as usize, pair[1] as usize);
            if self.z_order[a] == self.z_order[b] {
                tracing::warn!(z = self.z_order[a], first = a, second = b, "duplicate z-order");
            }
        }
        slots
    }

    /// Drains dirty channels into a [`LayerChanges`] summary.
    pub fn take_changes(&mut self) -> LayerChanges {
        let geometry: Vec<u32> = self
            .dirty
            .drain(dirty::GEOMETRY)
            .deterministic()
            .run()
            .collect();
        let buffers: Vec<u32> = self
            .dirty
            .drain(dirty::BUFFER)
            .deterministic()
            .run()
            .collect();
        let topology: Vec<u32> = self
            .dirty
            .drain(dirty::TOPOLOGY)
            .deterministic()
            .run()
            .collect();
        LayerChanges {
            geometry,
            buffers,
            topology: !topology.is_empty(),
        }
    }

    /// Panics if `id` is stale.
    fn validate(&self, id: LayerId) {
        assert!(
            self.is_alive(id),
            "stale LayerId: {id:?} (current gen: {})",
            if id.idx < self.len {
                self.generation[id.idx as usize]
            } else {
                u32::MAX
            }
        );
    }
}

/// Stores `value` in `slot`, returning whether it changed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fence::tests::CountingSync;

    #[test]
    fn create_and_reuse_slot() {
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        assert!(store.is_alive(a));
        store.destroy_layer(a);
        assert!(!store.is_alive(a));
        let b = store.create_layer(HostTime(0));
        assert_eq!(b.index(), a.index());
        assert_eq!(b.generation(), a.generation() + 1);
        assert_eq!(store.live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "stale LayerId")]
    fn stale_handle_panics() {
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        store.destroy_layer(a);
        store.set_crop(a, Rect::ZERO);
    }

    #[test]
    fn destroy_closes_pending_fences() {
        let sync = CountingSync::shared();
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        store.set_buffer(a, None, Some(sync.make()));
        assert!(store.has_acquire_fence(a));
        store.destroy_layer(a);
        assert_eq!(sync.closed.lock().len(), 1);
    }

    #[test]
    fn replacing_acquire_closes_old() {
        let sync = CountingSync::shared();
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        store.set_buffer(a, None, Some(sync.make()));
        store.set_buffer(a, None, Some(sync.make()));
        assert_eq!(sync.closed.lock().len(), 1);
    }

    #[test]
    fn sorted_by_z_then_slot() {
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        let b = store.create_layer(HostTime(0));
        let c = store.create_layer(HostTime(0));
        store.set_z_order(a, 5);
        store.set_z_order(b, 1);
        store.set_z_order(c, 5);
        assert_eq!(store.sorted_slots(), [b.index(), a.index(), c.index()]);
    }

    #[test]
    fn changes_drain_once() {
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        let first = store.take_changes();
        assert!(first.topology);
        assert!(first.geometry.is_empty());

        store.set_frame(a, Rect::new(0, 0, 10, 10));
        store.set_buffer(a, None, None);
        store.set_damage(a, &[Rect::new(0, 0, 1, 1)]);
        let second = store.take_changes();
        assert!(!second.topology);
        assert_eq!(second.geometry, [a.index()]);
        assert_eq!(second.buffers, [a.index()]);

        let third = store.take_changes();
        assert!(third.is_empty());

        // Re-setting an unchanged value is not a change.
        store.set_frame(a, Rect::new(0, 0, 10, 10));
        store.set_composition_type(a, CompositionType::Device);
        assert!(store.take_changes().is_empty());
    }

    #[test]
    fn image_defaults_without_buffer() {
        let mut store = LayerStore::new();
        let a = store.create_layer(HostTime(0));
        let img = store.image_at(a.index());
        assert!(img.buffer.is_none());
        assert_eq!(img.format, PixelFormat::Rgba8888);
        assert_eq!(img.plane_alpha, 1.0);
    }
}
