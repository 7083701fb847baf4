// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types and the closed status set reported to the compositor client.
//!
//! Internal stages return their own narrow error enums. At the display
//! boundary every failure is an [`Error`], and [`Error::status`] maps it onto
//! the small [`Status`] set the client understands.

use thiserror::Error;

use crate::layer::LayerId;

/// Status codes reported to the compositor client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// The layer handle does not name a live layer.
    BadLayer,
    /// The display or its driver rejected the request.
    BadDisplay,
    /// The call requires a validated frame.
    NotValidated,
    /// The request is not supported by this display.
    Unsupported,
    /// An argument was out of range.
    BadParameter,
    /// Hardware resources could not satisfy the frame.
    NoResources,
    /// An internal fault; the frame went through recovery.
    Internal,
}

impl Status {
    /// Returns the numeric code used on the client interface.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::BadDisplay => 2,
            Self::BadLayer => 3,
            Self::BadParameter => 4,
            Self::NoResources => 6,
            Self::NotValidated => 7,
            Self::Unsupported => 8,
            Self::Internal => -22,
        }
    }
}

/// Failure at the display boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// No live layer with this handle.
    #[error("unknown layer {0:?}")]
    BadLayer(LayerId),
    /// The driver refused a display-level request.
    #[error("display request failed")]
    BadDisplay(#[source] DriverError),
    /// Called outside the validated part of the frame.
    #[error("display has not been validated")]
    NotValidated,
    /// Not supported by this display.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// Argument out of range.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    /// Resource assignment failed.
    #[error(transparent)]
    Resource(#[from] ResourceError),
    /// A plane descriptor could not be built.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// The descriptor set failed validation before submission.
    #[error("{count} invalid window configuration(s), first: {first}")]
    WinConfig {
        /// First fault found.
        first: WinConfigError,
        /// Number of faults found.
        count: usize,
    },
    /// The driver rejected the submitted configuration.
    #[error("submission failed")]
    Submit(#[source] DriverError),
    /// Internal inconsistency.
    #[error("internal fault: {0}")]
    Internal(&'static str),
}

impl Error {
    /// Maps the error onto the client status set.
    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::BadLayer(_) => Status::BadLayer,
            Self::BadDisplay(_) => Status::BadDisplay,
            Self::NotValidated => Status::NotValidated,
            Self::Unsupported(_) => Status::Unsupported,
            Self::BadParameter(_) => Status::BadParameter,
            Self::Resource(_) => Status::NoResources,
            Self::Geometry(_) | Self::WinConfig { .. } | Self::Submit(_) | Self::Internal(_) => {
                Status::Internal
            }
        }
    }
}

/// Failure of a synchronization primitive.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum FenceError {
    /// The fence did not signal in time.
    #[error("fence {fd} did not signal within {timeout_ms} ms")]
    Timeout {
        /// Raw handle.
        fd: i32,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },
    /// Duplicating the handle failed.
    #[error("failed to duplicate fence {fd}")]
    Dup {
        /// Raw handle.
        fd: i32,
    },
    /// The handle is not a valid fence.
    #[error("invalid fence handle {fd}")]
    Invalid {
        /// Raw handle.
        fd: i32,
    },
}

/// Failure reported by the display driver.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The driver returned an error code.
    #[error("driver rejected request (code {code})")]
    Rejected {
        /// Driver error code.
        code: i32,
    },
    /// The driver does not implement the request.
    #[error("operation not supported by driver")]
    Unsupported,
}

/// Failure to obtain or use a hardware resource.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// More planes are needed than the display has.
    #[error("need {needed} windows, only {available} available")]
    NoWindows {
        /// Windows required by the classification.
        needed: usize,
        /// Windows the display has.
        available: usize,
    },
    /// The secondary compositor could not take the requested sources.
    #[error("secondary compositor unavailable for {sources} source(s)")]
    SecondaryUnavailable {
        /// Number of layers routed to it.
        sources: usize,
    },
    /// No plane source could be bound to a window.
    #[error("no plane source available for window {window}")]
    NoChannel {
        /// Window index.
        window: usize,
    },
    /// A memory-to-memory or secondary job failed.
    #[error("hardware resource {mpp} failed processing (code {code})")]
    Processing {
        /// Resource index.
        mpp: u32,
        /// Error code reported by the resource.
        code: i32,
    },
    /// The resource manager rejected the current scenario.
    #[error("scenario check failed (code {code})")]
    Scenario {
        /// Error code reported by the resource manager.
        code: i32,
    },
}

/// Failure to build a plane descriptor.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    /// The buffer is smaller than the source footprint.
    #[error("buffer holds {have} bytes, source needs {need}")]
    BufferTooSmall {
        /// Bytes needed for `full_w * full_h * bpp`.
        need: u64,
        /// Bytes the buffer declares.
        have: u64,
    },
    /// A buffer-backed plane has no buffer.
    #[error("plane source has no buffer")]
    MissingBuffer,
    /// Alignment left an empty source.
    #[error("source collapsed to {w}x{h} after alignment")]
    EmptySource {
        /// Width after alignment.
        w: i32,
        /// Height after alignment.
        h: i32,
    },
    /// The source has no window assigned.
    #[error("no window assigned")]
    NoWindow,
}

/// One fault found while validating a descriptor set.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WinConfigError {
    /// Two buffer windows share a plane source.
    #[error("windows {first} and {second} share plane source {channel}")]
    DuplicateChannel {
        /// Earlier window.
        first: usize,
        /// Later window (disabled).
        second: usize,
        /// Shared plane source.
        channel: u32,
    },
    /// Negative position, empty size, or a destination outside the panel.
    #[error("window {window} has invalid position or size")]
    BadGeometry {
        /// Window index.
        window: usize,
    },
    /// Window index beyond the display's plane count.
    #[error("window {window} exceeds the plane count")]
    OutOfRange {
        /// Window index.
        window: usize,
    },
    /// Crop larger than the full surface.
    #[error("window {window} crop exceeds its surface")]
    CropExceedsSurface {
        /// Window index.
        window: usize,
    },
    /// Source not aligned to the plane source's granularity.
    #[error("window {window} source is misaligned")]
    Misaligned {
        /// Window index.
        window: usize,
    },
    /// Buffer window without a plane source.
    #[error("window {window} has no plane source")]
    NoChannel {
        /// Window index.
        window: usize,
    },
    /// Nothing would be shown.
    #[error("no visible window")]
    NoVisibleWindow,
}

/// A [`DisplayConfig`](crate::config::DisplayConfig) that cannot be used.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Zero-sized panel.
    #[error("panel resolution must be non-zero")]
    ZeroResolution,
    /// More windows than descriptor slots.
    #[error("{requested} windows requested, at most {max} supported")]
    WindowCount {
        /// Requested window count.
        requested: usize,
        /// Descriptor slots available.
        max: usize,
    },
    /// Compression slicing that does not fit the panel.
    #[error("{slices} slices of height {slice_height} do not fit the panel")]
    DscSlices {
        /// Slices across the panel width.
        slices: u32,
        /// Slice height.
        slice_height: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotValidated.status(), Status::NotValidated);
        assert_eq!(
            Error::from(ResourceError::NoWindows {
                needed: 5,
                available: 4
            })
            .status(),
            Status::NoResources
        );
        assert_eq!(
            Error::Submit(DriverError::Rejected { code: -5 }).status(),
            Status::Internal
        );
        assert_eq!(Status::NotValidated.code(), 7);
    }

    #[test]
    fn messages_carry_context() {
        let e = Error::WinConfig {
            first: WinConfigError::Misaligned { window: 2 },
            count: 3,
        };
        assert_eq!(
            e.to_string(),
            "3 invalid window configuration(s), first: window 2 source is misaligned"
        );
    }
}
