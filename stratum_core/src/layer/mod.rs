// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layer data model.
//!
//! A *layer* is one drawable surface handed to the display by the compositor
//! client. Each layer has:
//!
//! - An identity ([`LayerId`]), a generational handle that becomes stale when
//!   the layer is destroyed.
//! - **Properties** set by the client: [`buffer`](LayerStore::set_buffer),
//!   [`crop`](LayerStore::set_crop), [`frame`](LayerStore::set_frame),
//!   [`z-order`](LayerStore::set_z_order), blend, alpha, transform,
//!   dataspace, priority, damage, color, and the requested
//!   [`CompositionType`].
//! - **Fences**: one acquire and one release slot, each holding at most one
//!   owned [`Fence`](crate::fence::Fence).
//! - **Frame state** written by validate and present: the chosen
//!   [`CompositionPath`](crate::classify::CompositionPath), window, and
//!   skip-static flag.
//!
//! # Dirty tracking
//!
//! Property mutations mark a dirty channel (see [`dirty`](crate::dirty)):
//!
//! - **GEOMETRY**: any property that can change classification.
//! - **BUFFER**: a new buffer was attached.
//! - **TOPOLOGY**: a layer was created or destroyed.
//!
//! Damage updates mark nothing; they only feed partial refresh.

mod fps;
mod id;
mod store;

pub use fps::FpsCounter;
pub use id::LayerId;
pub use store::LayerStore;

/// Composition type requested by the client, and reported back after
/// validate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompositionType {
    /// The client renders the layer into the client target.
    Client,
    /// The display shows the layer on a hardware plane.
    #[default]
    Device,
    /// A flat color fill.
    SolidColor,
    /// The cursor plane.
    Cursor,
}

impl CompositionType {
    /// Returns a short label for logs and dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Device => "device",
            Self::SolidColor => "solid_color",
            Self::Cursor => "cursor",
        }
    }
}

/// Per-layer behavioral flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LayerFlags {
    /// The layer's content needs memory-to-memory pre-processing before it
    /// can be shown (e.g. a compressed video layout).
    pub preprocessed: bool,
}

/// Changes drained from the layer store since the previous frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerChanges {
    /// Slots whose classification-relevant properties changed.
    pub geometry: Vec<u32>,
    /// Slots that received a new buffer.
    pub buffers: Vec<u32>,
    /// Whether layers were created or destroyed.
    pub topology: bool,
}

impl LayerChanges {
    /// Returns `true` if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.geometry.is_empty() && self.buffers.is_empty() && !self.topology
    }

    /// Returns `true` if the layer list or any classification input changed.
    #[must_use]
    pub fn geometry_changed(&self) -> bool {
        self.topology || !self.geometry.is_empty()
    }
}
