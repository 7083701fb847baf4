// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty-tracking channel constants.
//!
//! Layer setters mark one of these channels (via [`understory_dirty`]) on the
//! layer's slot. Validation drains them into
//! [`LayerChanges`](crate::layer::LayerChanges):
//!
//! - [`GEOMETRY`] and [`TOPOLOGY`] invalidate the previous classification, so
//!   any entry raises the display's layer-geometry change flag. That flag in
//!   turn disables partial refresh and skip-validate for the frame.
//! - [`BUFFER`] only records which layers received new content. It feeds
//!   diagnostics; per-layer refresh rates are measured separately.
//!
//! All channels are local: layers have no parent/child relationships, so no
//! dependency edges are ever added.

use understory_dirty::Channel;

/// Crop, frame, transform, blend, alpha, dataspace, priority, z-order, color,
/// or requested composition type changed.
pub const GEOMETRY: Channel = Channel::new(0);

/// A new buffer was attached.
pub const BUFFER: Channel = Channel::new(1);

/// A layer was created or destroyed.
pub const TOPOLOGY: Channel = Channel::new(2);
