// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Owned synchronization handles.
//!
//! Every buffer that crosses the display carries fences: an *acquire* fence
//! signalled by the producer when the buffer is ready, a *release* fence
//! signalled by the display when it has finished reading, and a per-frame
//! *retire* fence signalled when the frame leaves the screen.
//!
//! A [`Fence`] owns exactly one raw handle. Dropping it closes the handle
//! through the [`SyncPrimitives`] it was adopted with, so an `Option<Fence>`
//! slot is either "none" or a handle with exactly one owner. The only ways to
//! get rid of a fence are:
//!
//! - drop it (close),
//! - [`dup`](Fence::dup) it for a second consumer, each copy owned separately,
//! - [`into_raw`](Fence::into_raw) it, handing the raw handle to a consumer
//!   that closes it itself.

use core::fmt;
use std::sync::Arc;

use crate::error::FenceError;
use crate::time::Duration;

/// A raw fence handle as understood by the synchronization library.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceFd(pub i32);

impl fmt::Debug for FenceFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FenceFd({})", self.0)
    }
}

/// Operations on raw fence handles provided by the platform.
///
/// Implementations must be callable from any thread; a display shares one
/// instance between all its fences.
pub trait SyncPrimitives: Send + Sync + fmt::Debug {
    /// Duplicates `fd`, returning a new handle to the same primitive.
    fn dup(&self, fd: FenceFd) -> Result<FenceFd, FenceError>;

    /// Waits up to `timeout` for `fd` to signal.
    fn wait(&self, fd: FenceFd, timeout: Duration) -> Result<(), FenceError>;

    /// Closes `fd`. Called exactly once per handle.
    fn close(&self, fd: FenceFd);
}

/// Shared handle to the synchronization library.
pub type SharedSync = Arc<dyn SyncPrimitives>;

/// What a fence guards, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FenceRole {
    /// Producer-signalled "source buffer ready".
    SrcAcquire,
    /// Display-signalled "source buffer consumed".
    SrcRelease,
    /// Intermediate buffer of a memory-to-memory block is ready.
    DstAcquire,
    /// The frame left the screen.
    Retire,
}

impl FenceRole {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SrcAcquire => "src_acquire",
            Self::SrcRelease => "src_release",
            Self::DstAcquire => "dst_acquire",
            Self::Retire => "retire",
        }
    }
}

/// An owned fence handle that closes on drop.
pub struct Fence {
    fd: FenceFd,
    sync: SharedSync,
    armed: bool,
}

impl Fence {
    /// Takes ownership of a raw handle.
    #[must_use]
    pub fn adopt(fd: FenceFd, sync: SharedSync) -> Self {
        Self {
            fd,
            sync,
            armed: true,
        }
    }

    /// Returns the raw handle without giving up ownership.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> FenceFd {
        self.fd
    }

    /// Creates a second owned handle to the same primitive.
    pub fn dup(&self) -> Result<Self, FenceError> {
        let fd = self.sync.dup(self.fd)?;
        Ok(Self::adopt(fd, Arc::clone(&self.sync)))
    }

    /// Waits up to `timeout` for the fence to signal.
    pub fn wait(&self, timeout: Duration) -> Result<(), FenceError> {
        self.sync.wait(self.fd, timeout)
    }

    /// Releases ownership and returns the raw handle.
    ///
    /// The caller becomes responsible for closing it.
    #[must_use]
    pub fn into_raw(mut self) -> FenceFd {
        self.armed = false;
        self.fd
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if self.armed {
            self.sync.close(self.fd);
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fence({})", self.fd.0)
    }
}

/// Duplicates an optional fence for a second consumer.
///
/// A failed duplication is a fence fault: it is logged and the consumer gets
/// no fence, which callers treat as "already signalled".
pub fn dup_for(fence: Option<&Fence>, role: FenceRole) -> Option<Fence> {
    let fence = fence?;
    match fence.dup() {
        Ok(copy) => Some(copy),
        Err(err) => {
            tracing::warn!(fd = fence.raw().0, role = role.as_str(), %err, "fence dup failed");
            None
        }
    }
}

/// Closes whatever `slot` holds, returning whether a fence was closed.
pub fn close_slot(slot: &mut Option<Fence>, role: FenceRole) -> bool {
    match slot.take() {
        Some(fence) => {
            tracing::trace!(fd = fence.raw().0, role = role.as_str(), "close fence");
            drop(fence);
            true
        }
        None => false,
    }
}
