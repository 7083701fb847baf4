// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The display driver seam and display-level state flags.

use core::fmt;

use bitflags::bitflags;

use crate::error::DriverError;
use crate::plane::WinConfigSet;

/// Panel power state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PowerMode {
    /// Panel off; frames are not shown.
    #[default]
    Off,
    /// Low-power always-on mode.
    Doze,
    /// Normal operation.
    On,
}

/// Color mode of the panel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorMode {
    /// The panel's own gamut, unmanaged.
    #[default]
    Native,
    /// sRGB.
    Srgb,
    /// Display P3.
    DisplayP3,
}

/// Color transform hint from the client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorTransform {
    /// No transform.
    #[default]
    Identity,
    /// A full matrix applied after composition.
    ArbitraryMatrix,
    /// Color inversion.
    ValueInverse,
    /// Grayscale conversion.
    Grayscale,
}

bitflags! {
    /// Reasons the next frame must be fully re-evaluated.
    ///
    /// Any set bit disables skip-validate and partial refresh; present clears
    /// the set after a successful frame.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GeometryFlags: u32 {
        /// A layer was added, removed, or changed geometry.
        const LAYER = 1 << 0;
        /// The panel powered on.
        const POWER_ON = 1 << 1;
        /// The panel powered off.
        const POWER_OFF = 1 << 2;
        /// The color mode changed.
        const COLOR_MODE = 1 << 3;
        /// The color transform hint changed.
        const COLOR_TRANSFORM = 1 << 4;
        /// The recomposition mode changed.
        const DYNAMIC_RECOMP = 1 << 5;
        /// The previous frame failed.
        const ERROR_CASE = 1 << 6;
        /// A layer started or stopped single-buffer rendering.
        const SINGLE_BUFFER = 1 << 7;
        /// The resource scenario changed.
        const SCENARIO = 1 << 8;
        /// A frame was dropped; the next one must be validated.
        const FORCE_VALIDATE = 1 << 9;
    }
}

/// The display controller.
///
/// [`deliver_win_config`](Self::deliver_win_config) takes the frame's
/// descriptor set. On success the driver has consumed every window's acquire
/// fence, and fills each visible window's release fence and the set's retire
/// fence.
pub trait DisplayInterface: Send + fmt::Debug {
    /// Submits a frame.
    fn deliver_win_config(&mut self, set: &mut WinConfigSet) -> Result<(), DriverError>;

    /// Puts the driver into its fault state after a failed frame.
    fn set_force_panic(&mut self);

    /// Changes the panel power state.
    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), DriverError>;

    /// Turns vsync events on or off.
    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Changes the panel color mode.
    fn set_color_mode(&mut self, mode: ColorMode) -> Result<(), DriverError>;

    /// Blanks the panel, dropping the current configuration.
    fn clear_display(&mut self) -> Result<(), DriverError>;

    /// Turns panel self-refresh off while a single-buffered layer is shown.
    fn disable_self_refresh(&mut self, disable: bool);

    /// Moves the cursor plane.
    fn set_cursor_position(&mut self, x: i32, y: i32) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let mut flags = GeometryFlags::empty();
        flags |= GeometryFlags::LAYER | GeometryFlags::POWER_ON;
        assert!(flags.contains(GeometryFlags::LAYER), "layer bit set");
        flags.remove(GeometryFlags::LAYER);
        assert_eq!(flags, GeometryFlags::POWER_ON, "only power on left");
    }

    #[test]
    fn defaults() {
        assert_eq!(PowerMode::default(), PowerMode::Off, "panel starts off");
        assert_eq!(ColorMode::default(), ColorMode::Native, "native gamut");
        assert_eq!(ColorTransform::default(), ColorTransform::Identity, "identity");
    }
}
