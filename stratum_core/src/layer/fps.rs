// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-layer refresh-rate measurement.

use crate::time::{Duration, HostTime};

/// Length of one measurement window.
const WINDOW: Duration = Duration(1_000_000_000);

/// Counts buffer updates and reports updates per second over one-second
/// windows.
///
/// The rate is recomputed only when a window has fully elapsed; in between,
/// the last measured rate is reported. Until the first window completes the
/// layer is assumed to update at [`FpsCounter::INITIAL_FPS`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FpsCounter {
    window_start: HostTime,
    frames: u32,
    fps: u32,
}

impl FpsCounter {
    /// Rate reported before the first window completes.
    pub const INITIAL_FPS: u32 = 60;

    /// Starts measuring at `now`.
    #[must_use]
    pub const fn new(now: HostTime) -> Self {
        Self {
            window_start: now,
            frames: 0,
            fps: Self::INITIAL_FPS,
        }
    }

    /// Records one buffer update.
    pub fn record(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Returns the measured rate, closing the window if it has elapsed.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "frames per second over a window of at least one second fits in u32"
    )]
    pub fn check(&mut self, now: HostTime) -> u32 {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= WINDOW {
            self.fps = (u64::from(self.frames) * WINDOW.nanos() / elapsed.nanos()) as u32;
            self.frames = 0;
            self.window_start = now;
        }
        self.fps
    }

    /// Last measured rate without closing a window.
    #[must_use]
    pub const fn last(&self) -> u32 {
        self.fps
    }
}
