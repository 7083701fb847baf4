// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-display configuration.
//!
//! Every feature toggle the decision engine consults lives in a
//! [`DisplayConfig`] handed to [`Display::new`](crate::display::Display::new).
//! Nothing is read from ambient state.

use crate::error::ConfigError;
use crate::plane::MAX_WINDOWS;
use crate::time::Duration;

/// Configuration for one display.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayConfig {
    /// Panel width in pixels.
    pub xres: u32,
    /// Panel height in pixels.
    pub yres: u32,
    /// Number of hardware windows (planes), at most [`MAX_WINDOWS`].
    pub window_count: usize,
    /// Refresh period.
    pub vsync_period: Duration,

    /// Reuse the client target when its inputs are unchanged.
    pub skip_static: bool,
    /// Longest client range eligible for skip-static.
    pub skip_static_max_layers: usize,
    /// Restrict hardware updates to the damaged region.
    pub window_update: bool,
    /// Compression slices across the panel width (0 when uncompressed).
    pub dsc_slices: u32,
    /// Compression slice height (0 when uncompressed).
    pub dsc_slice_height: u32,

    /// Switch between overlay-heavy and GPU-heavy composition at runtime.
    pub dynamic_recomposition: bool,
    /// Update rate below which the frame moves to GPU composition.
    pub recomp_fps_threshold: u32,
    /// Minimum time between rate-driven mode evaluations.
    pub recomp_rate_limit: Duration,

    /// Route runs of slowly updating layers to the client target.
    pub handle_low_fps_layers: bool,
    /// Update rate under which a layer counts as slow.
    pub low_fps_threshold: u32,

    /// Allow present without a preceding validate when nothing changed.
    pub skip_validate: bool,
    /// Skip submission when the descriptor set equals the previous one.
    pub skip_unchanged_config: bool,
    /// Display has a dedicated cursor plane mode.
    pub cursor_support: bool,
    /// Crop composition targets to the union of their layers.
    pub composition_crop: bool,
    /// The secondary compositor can mix layers of different priority.
    pub secondary_combo: bool,

    /// Vsync periods to wait for the previous retire fence before submitting.
    pub retire_wait_vsyncs: u32,
    /// Upper bound for the whole retire-fence wait.
    pub retire_wait_budget: Duration,
}

impl DisplayConfig {
    /// A primary panel with every optimization enabled.
    #[must_use]
    pub const fn primary(xres: u32, yres: u32) -> Self {
        Self {
            xres,
            yres,
            window_count: 6,
            // ~60 Hz.
            vsync_period: Duration(16_666_666),
            skip_static: true,
            skip_static_max_layers: 7,
            window_update: true,
            dsc_slices: 0,
            dsc_slice_height: 0,
            dynamic_recomposition: true,
            recomp_fps_threshold: 5,
            // Fifteen vsync intervals.
            recomp_rate_limit: Duration(250_000_000),
            handle_low_fps_layers: true,
            low_fps_threshold: 5,
            skip_validate: true,
            skip_unchanged_config: true,
            cursor_support: false,
            composition_crop: true,
            secondary_combo: false,
            retire_wait_vsyncs: 5,
            retire_wait_budget: Duration(1_000_000_000),
        }
    }

    /// A panel with every optional behavior disabled.
    #[must_use]
    pub const fn minimal(xres: u32, yres: u32) -> Self {
        Self {
            skip_static: false,
            window_update: false,
            dynamic_recomposition: false,
            handle_low_fps_layers: false,
            skip_validate: false,
            skip_unchanged_config: false,
            composition_crop: false,
            ..Self::primary(xres, yres)
        }
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.xres == 0 || self.yres == 0 {
            return Err(ConfigError::ZeroResolution);
        }
        if self.window_count == 0 || self.window_count > MAX_WINDOWS {
            return Err(ConfigError::WindowCount {
                requested: self.window_count,
                max: MAX_WINDOWS,
            });
        }
        // Slices and slice height are set together, and each fits the panel.
        let (slices, slice_height) = (self.dsc_slices, self.dsc_slice_height);
        if (slices == 0) != (slice_height == 0) || slices > self.xres || slice_height > self.yres {
            return Err(ConfigError::DscSlices {
                slices,
                slice_height,
            });
        }
        Ok(())
    }

    /// Panel pixel count.
    #[must_use]
    pub const fn panel_pixels(&self) -> u64 {
        self.xres as u64 * self.yres as u64
    }

    /// Partial-update block size `(width, height)`.
    ///
    /// Compressed panels update in whole slices; otherwise a 2x2 block.
    #[must_use]
    pub const fn update_block(&self) -> (u32, u32) {
        let w = if self.dsc_slices > 0 {
            self.xres / self.dsc_slices
        } else {
            2
        };
        let h = if self.dsc_slice_height > 0 {
            self.dsc_slice_height
        } else {
            2
        };
        (w, h)
    }

    /// Bounded wait applied to the previous retire fence: `(first, rest)`.
    #[must_use]
    pub const fn retire_wait(&self) -> (Duration, Duration) {
        let first = self.vsync_period.saturating_mul(self.retire_wait_vsyncs as u64);
        (first, self.retire_wait_budget.saturating_sub(first))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_validate() {
        assert_eq!(DisplayConfig::primary(1080, 2400).validate(), Ok(()));
        assert_eq!(DisplayConfig::minimal(720, 1280).validate(), Ok(()));
    }

    #[test]
    fn minimal_disables_optional_features() {
        let c = DisplayConfig::minimal(720, 1280);
        assert!(!c.skip_static);
        assert!(!c.window_update);
        assert!(!c.dynamic_recomposition);
        assert_eq!(c.window_count, DisplayConfig::primary(720, 1280).window_count);
    }

    #[test]
    fn rejects_bad_values() {
        let mut c = DisplayConfig::primary(0, 100);
        assert_eq!(c.validate(), Err(ConfigError::ZeroResolution));
        c.xres = 100;
        c.window_count = MAX_WINDOWS + 1;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::WindowCount { .. })
        ));
    }

    #[test]
    fn rejects_slicing_that_does_not_fit() {
        let mut c = DisplayConfig::primary(1440, 3040);
        c.dsc_slices = 2;
        c.dsc_slice_height = 40;
        assert_eq!(c.validate(), Ok(()), "two slices fit");

        c.dsc_slices = 1441;
        assert!(
            matches!(c.validate(), Err(ConfigError::DscSlices { slices: 1441, .. })),
            "more slices than columns"
        );

        c.dsc_slices = 0;
        assert!(
            matches!(c.validate(), Err(ConfigError::DscSlices { .. })),
            "slice height without slices"
        );

        c.dsc_slices = 2;
        c.dsc_slice_height = 0;
        assert!(
            matches!(c.validate(), Err(ConfigError::DscSlices { .. })),
            "slices without a height"
        );
    }

    #[test]
    fn update_block_follows_slices() {
        let mut c = DisplayConfig::primary(1440, 3040);
        assert_eq!(c.update_block(), (2, 2));
        c.dsc_slices = 2;
        c.dsc_slice_height = 40;
        assert_eq!(c.update_block(), (720, 40));
    }

    #[test]
    fn retire_wait_splits_budget() {
        let c = DisplayConfig::primary(1080, 2400);
        let (first, rest) = c.retire_wait();
        assert_eq!(first.as_millis(), 83);
        assert_eq!(first + rest, c.retire_wait_budget);
    }
}
