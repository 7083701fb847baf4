// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The hardware resource manager seam.
//!
//! Hardware resources ("MPPs": overlay plane sources, memory-to-memory
//! blocks, the secondary compositor) are owned by an external
//! [`ResourceManager`]. The display refers to them only through [`MppId`]
//! indices and asks the manager for placement decisions, alignment
//! restrictions, and processing jobs.
//!
//! Alignment numbers are hardware specific, so they are never hard-coded in
//! the engine: every plane-building step consults
//! [`ResourceManager::restriction`].

use core::fmt;

use bitflags::bitflags;

use crate::error::ResourceError;
use crate::fence::Fence;
use crate::format::PixelFormat;
use crate::image::ImageInfo;

/// Index of a hardware resource owned by the resource manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MppId(pub u32);

impl fmt::Debug for MppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MppId({})", self.0)
    }
}

bitflags! {
    /// Capabilities of a hardware resource.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct MppAttributes: u32 {
        /// Wide color gamut conversion.
        const WCG = 1 << 0;
        /// HDR10 tone mapping.
        const HDR10 = 1 << 1;
        /// HDR10+ dynamic metadata.
        const HDR10_PLUS = 1 << 2;
        /// Reads compressed buffers.
        const COMPRESSION = 1 << 3;
        /// Rotates on scan-out.
        const ROTATION = 1 << 4;
        /// Scales on scan-out.
        const SCALE = 1 << 5;
    }
}

/// Size and alignment rules of a resource for one pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Restriction {
    /// Source x offset granularity.
    pub src_x_align: u32,
    /// Source y offset granularity.
    pub src_y_align: u32,
    /// Source crop width granularity.
    pub src_w_align: u32,
    /// Source crop height granularity.
    pub src_h_align: u32,
    /// Minimum source width.
    pub min_w: u32,
    /// Minimum source height.
    pub min_h: u32,
    /// Maximum full-surface width.
    pub max_full_w: u32,
    /// Maximum full-surface height.
    pub max_full_h: u32,
    /// Maximum crop width.
    pub max_crop_w: u32,
    /// Maximum crop height.
    pub max_crop_h: u32,
    /// Capabilities.
    pub attrs: MppAttributes,
}

impl Restriction {
    /// No alignment constraints and effectively unbounded sizes.
    pub const UNCONSTRAINED: Self = Self {
        src_x_align: 1,
        src_y_align: 1,
        src_w_align: 1,
        src_h_align: 1,
        min_w: 1,
        min_h: 1,
        max_full_w: 16384,
        max_full_h: 16384,
        max_crop_w: 16384,
        max_crop_h: 16384,
        attrs: MppAttributes::empty(),
    };
}

/// Where a layer can be shown, as judged by the resource manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Directly on an overlay plane.
    Overlay,
    /// On an overlay plane after a memory-to-memory pass (rotation, scaling,
    /// format conversion).
    OverlayViaM2m,
    /// Only through the secondary compositor.
    Secondary,
    /// Only through client (GPU) composition.
    ClientOnly,
}

/// One input of a processing job.
#[derive(Debug)]
pub struct M2mSource {
    /// Sorted layer index the source came from.
    pub layer_index: usize,
    /// Source description.
    pub image: ImageInfo,
    /// Acquire fence, consumed by the job.
    pub acquire: Option<Fence>,
}

/// Result of a processing job.
#[derive(Debug)]
pub struct M2mOutput {
    /// Intermediate image the plane scans out.
    pub image: ImageInfo,
    /// Signals when the intermediate image is written.
    pub acquire: Option<Fence>,
    /// Per-source release fences, in job order, when the resource signals
    /// source release itself. Empty when the plane's release fence applies.
    pub src_release: Vec<Option<Fence>>,
}

/// External owner of hardware resources.
pub trait ResourceManager: Send + fmt::Debug {
    /// Checks the frame scenario before classification.
    fn check_scenario(&mut self, layer_count: usize) -> Result<(), ResourceError>;

    /// Judges where `image` can be shown.
    fn placement(&self, image: &ImageInfo) -> Placement;

    /// Whether the secondary compositor can take `image`.
    fn secondary_assignable(&self, image: &ImageInfo) -> bool;

    /// Binds a plane source to `window` for `image`.
    fn assign_overlay(&mut self, window: usize, image: &ImageInfo) -> Result<MppId, ResourceError>;

    /// Reserves a memory-to-memory block for `sources` inputs.
    ///
    /// Used for the secondary compositor target and for per-layer
    /// pre-processing.
    fn assign_m2m(&mut self, sources: usize) -> Result<MppId, ResourceError>;

    /// Alignment and size rules of `mpp` for `format`.
    fn restriction(&self, mpp: MppId, format: PixelFormat) -> Restriction;

    /// Runs a processing job on `mpp`, consuming the source acquire fences.
    fn process(&mut self, mpp: MppId, sources: Vec<M2mSource>) -> Result<M2mOutput, ResourceError>;

    /// Hands the plane release fence of `mpp`'s output back to the resource,
    /// which waits on it before reusing the intermediate buffer.
    fn set_dst_acquire(&mut self, mpp: MppId, fence: Option<Fence>);

    /// Drops every fence the resources still hold for this frame.
    fn drop_pending_fences(&mut self);

    /// Releases all assignments, or only non-sticky ones unless `force`.
    fn reset_assigned(&mut self, force: bool);

    /// Publishes the frame's performance requirements.
    fn deliver_performance_info(&mut self) -> Result<(), ResourceError>;
}
