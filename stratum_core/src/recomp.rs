// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic recomposition: moving a quiet frame to client composition.
//!
//! When every layer updates slowly, composing the whole frame once on the
//! client and scanning out a single target saves power over keeping every
//! layer on its own plane. [`RecompController`] decides when to enter that
//! mode ([`RecompMode::DeviceToClient`]) and when to leave it
//! ([`RecompMode::ClientToDevice`]). Each transition is returned as a
//! [`RecompSwitch`]; the display raises a geometry change for it so the next
//! validate reclassifies.
//!
//! While in `DeviceToClient`, every validate is evaluated and the first one
//! is taken as a sign of renewed activity. Outside it, evaluations are rate
//! limited to one per [`DisplayConfig::recomp_rate_limit`].
//!
//! [`low_fps_range`] is the per-layer variant: a contiguous run of slow
//! layers is sent to the client while the rest stay on planes.

use crate::classify::TargetRange;
use crate::config::DisplayConfig;
use crate::image::Priority;
use crate::time::HostTime;

/// Whole-frame composition preference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RecompMode {
    /// No switch in effect.
    #[default]
    NoModeSwitch,
    /// Compose everything on the client.
    DeviceToClient,
    /// Returned from client composition to planes.
    ClientToDevice,
}

impl RecompMode {
    /// Returns a short label for logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoModeSwitch => "no_mode_switch",
            Self::DeviceToClient => "device_to_client",
            Self::ClientToDevice => "client_to_device",
        }
    }
}

/// What triggered a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SwitchReason {
    /// The controller was disabled.
    Disabled,
    /// A High/Max or pre-processed layer is present.
    Priority,
    /// The layers cover no more pixels than the panel.
    Bandwidth,
    /// Estimated update rate fell below the threshold.
    LowFps,
    /// Estimated update rate reached the threshold.
    HighFps,
}

impl SwitchReason {
    /// Returns a short label for logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Priority => "priority",
            Self::Bandwidth => "bandwidth",
            Self::LowFps => "low_fps",
            Self::HighFps => "high_fps",
        }
    }
}

/// One mode transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecompSwitch {
    /// Mode before.
    pub from: RecompMode,
    /// Mode after.
    pub to: RecompMode,
    /// Trigger.
    pub reason: SwitchReason,
}

/// Frame summary the controller decides on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecompInput {
    /// Sum of the layers' display-frame areas.
    pub incoming_pixels: u64,
    /// Any layer with High/Max priority or pre-processing.
    pub has_priority_layer: bool,
    /// Highest measured layer update rate.
    pub max_fps: u32,
}

/// Hysteresis controller for [`RecompMode`].
#[derive(Clone, Copy, Debug)]
pub struct RecompController {
    mode: RecompMode,
    last_switch: Option<HostTime>,
    updates: u32,
    enabled: bool,
}

impl RecompController {
    /// Creates a controller in [`RecompMode::NoModeSwitch`].
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            mode: RecompMode::NoModeSwitch,
            last_switch: None,
            updates: 0,
            enabled,
        }
    }

    /// Current mode.
    #[inline]
    #[must_use]
    pub const fn mode(&self) -> RecompMode {
        self.mode
    }

    /// Whether the whole frame should be composed by the client.
    #[inline]
    #[must_use]
    pub fn forces_client(&self) -> bool {
        self.mode == RecompMode::DeviceToClient
    }

    /// Whether evaluations run.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns evaluations on or off. The next evaluation applies it.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Counts one frame update (a validate).
    pub fn note_update(&mut self) {
        self.updates = self.updates.saturating_add(1);
    }

    fn switch(&mut self, to: RecompMode, reason: SwitchReason) -> RecompSwitch {
        let from = self.mode;
        self.mode = to;
        tracing::debug!(from = from.as_str(), to = to.as_str(), reason = reason.as_str(), "recomposition switch");
        RecompSwitch { from, to, reason }
    }

    /// Leaves `DeviceToClient` for `reason`, or does nothing.
    fn back_to_device(&mut self, now: HostTime, reason: SwitchReason) -> Option<RecompSwitch> {
        if self.mode != RecompMode::DeviceToClient {
            return None;
        }
        self.updates = 0;
        self.last_switch = Some(now);
        Some(self.switch(RecompMode::ClientToDevice, reason))
    }

    /// Runs one evaluation at `now`.
    ///
    /// Returns the transition, if the mode changed.
    pub fn evaluate(
        &mut self,
        now: HostTime,
        input: &RecompInput,
        config: &DisplayConfig,
    ) -> Option<RecompSwitch> {
        if !self.enabled {
            self.last_switch = None;
            return (self.mode != RecompMode::NoModeSwitch)
                .then(|| self.switch(RecompMode::NoModeSwitch, SwitchReason::Disabled));
        }

        let Some(last_switch) = self.last_switch else {
            self.last_switch = Some(now);
            self.mode = RecompMode::NoModeSwitch;
            return None;
        };

        if input.has_priority_layer {
            return self.back_to_device(now, SwitchReason::Priority);
        }
        if input.incoming_pixels <= config.panel_pixels() {
            return self.back_to_device(now, SwitchReason::Bandwidth);
        }

        if self.mode != RecompMode::DeviceToClient
            && now.saturating_duration_since(last_switch) < config.recomp_rate_limit
        {
            return None;
        }
        self.last_switch = Some(now);

        let estimate = if self.mode == RecompMode::DeviceToClient && self.updates == 1 {
            config.recomp_fps_threshold
        } else {
            input.max_fps
        };
        self.updates = 0;

        if estimate < config.recomp_fps_threshold {
            (self.mode != RecompMode::DeviceToClient)
                .then(|| self.switch(RecompMode::DeviceToClient, SwitchReason::LowFps))
        } else {
            (self.mode == RecompMode::DeviceToClient)
                .then(|| self.switch(RecompMode::ClientToDevice, SwitchReason::HighFps))
        }
    }
}

/// Finds the contiguous run of slow layers to compose on the client.
///
/// Layers are scanned bottom to top. A layer below High priority updating
/// under `threshold` joins the run; the first other layer after the run
/// started ends it. A run of a single layer is discarded, since one plane
/// costs less than a client pass.
#[must_use]
pub fn low_fps_range(fps: &[u32], priorities: &[Priority], threshold: u32) -> Option<TargetRange> {
    let mut range: Option<TargetRange> = None;
    for (i, (&rate, &priority)) in fps.iter().zip(priorities).enumerate() {
        if !priority.is_high() && rate < threshold {
            range = Some(match range {
                Some(r) => TargetRange { first: r.first, last: i },
                None => TargetRange { first: i, last: i },
            });
        } else if range.is_some() {
            break;
        }
    }
    range.filter(|r| r.len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Duration;

    const MS: u64 = 1_000_000;

    fn busy(max_fps: u32) -> RecompInput {
        RecompInput {
            incoming_pixels: u64::MAX,
            has_priority_layer: false,
            max_fps,
        }
    }

    fn config() -> DisplayConfig {
        DisplayConfig::primary(1080, 1920)
    }

    /// Drives the controller into `DeviceToClient` starting at `t0`.
    fn enter_client(c: &mut RecompController, t0: u64) {
        let cfg = config();
        assert_eq!(c.evaluate(HostTime(t0), &busy(2), &cfg), None, "first call records time");
        let s = c.evaluate(HostTime(t0 + 300 * MS), &busy(2), &cfg);
        assert_eq!(s.map(|s| s.to), Some(RecompMode::DeviceToClient), "low fps enters client mode");
    }

    #[test]
    fn first_evaluation_only_records() {
        let mut c = RecompController::new(true);
        assert_eq!(c.evaluate(HostTime(10), &busy(0), &config()), None, "no switch on first call");
        assert_eq!(c.mode(), RecompMode::NoModeSwitch, "mode untouched");
    }

    #[test]
    fn rate_limited_outside_client_mode() {
        let cfg = config();
        let mut c = RecompController::new(true);
        c.evaluate(HostTime(MS), &busy(2), &cfg);
        assert_eq!(c.evaluate(HostTime(100 * MS), &busy(2), &cfg), None, "within 250 ms");
        assert_eq!(c.evaluate(HostTime(250 * MS), &busy(2), &cfg), None, "still within 250 ms");
        let s = c.evaluate(HostTime(252 * MS), &busy(2), &cfg);
        assert_eq!(s.map(|s| s.reason), Some(SwitchReason::LowFps), "switch after the limit");
    }

    #[test]
    fn switches_at_most_once_per_window() {
        let cfg = config();
        let mut c = RecompController::new(true);
        let mut switches = Vec::new();
        let mut fps = 2;
        for step in 0..40_u64 {
            let now = HostTime(step * 16 * MS);
            c.note_update();
            if let Some(s) = c.evaluate(now, &busy(fps), &cfg) {
                switches.push((now, s));
                // Alternate load so every evaluation wants a switch.
                fps = if fps == 2 { 60 } else { 2 };
            }
        }
        assert!(switches.len() >= 2, "controller switched");
        for pair in switches.windows(2) {
            let (a, sa) = pair[0];
            let (b, _) = pair[1];
            if sa.to != RecompMode::DeviceToClient {
                assert!(
                    b.saturating_duration_since(a) >= cfg.recomp_rate_limit,
                    "switches {a:?} and {b:?} closer than the rate limit"
                );
            }
        }
    }

    #[test]
    fn first_update_in_client_mode_returns_to_device() {
        let cfg = config();
        let mut c = RecompController::new(true);
        enter_client(&mut c, MS);
        c.note_update();
        let s = c.evaluate(HostTime(320 * MS), &busy(2), &cfg);
        assert_eq!(
            s,
            Some(RecompSwitch {
                from: RecompMode::DeviceToClient,
                to: RecompMode::ClientToDevice,
                reason: SwitchReason::HighFps,
            }),
            "new content wakes planes"
        );
    }

    #[test]
    fn background_evaluation_keeps_client_mode() {
        let cfg = config();
        let mut c = RecompController::new(true);
        enter_client(&mut c, MS);
        assert_eq!(c.evaluate(HostTime(400 * MS), &busy(1), &cfg), None, "no updates, still slow");
        assert!(c.forces_client(), "client mode held");
    }

    #[test]
    fn priority_layer_forces_device_immediately() {
        let cfg = config();
        let mut c = RecompController::new(true);
        enter_client(&mut c, MS);
        let input = RecompInput {
            has_priority_layer: true,
            ..busy(1)
        };
        let s = c.evaluate(HostTime(302 * MS), &input, &cfg);
        assert_eq!(s.map(|s| s.reason), Some(SwitchReason::Priority), "forced out");
        assert_eq!(c.evaluate(HostTime(303 * MS), &input, &cfg), None, "no further change");
    }

    #[test]
    fn small_frames_leave_client_mode() {
        let cfg = config();
        let mut c = RecompController::new(true);
        enter_client(&mut c, MS);
        let input = RecompInput {
            incoming_pixels: cfg.panel_pixels(),
            ..busy(1)
        };
        let s = c.evaluate(HostTime(302 * MS), &input, &cfg);
        assert_eq!(s.map(|s| s.reason), Some(SwitchReason::Bandwidth), "bandwidth check");
    }

    #[test]
    fn disabling_resets() {
        let cfg = config();
        let mut c = RecompController::new(true);
        enter_client(&mut c, MS);
        c.set_enabled(false);
        let s = c.evaluate(HostTime(302 * MS), &busy(1), &cfg);
        assert_eq!(s.map(|s| s.to), Some(RecompMode::NoModeSwitch), "disable reported");
        c.set_enabled(true);
        assert_eq!(c.evaluate(HostTime(303 * MS), &busy(1), &cfg), None, "re-records time");
        assert_eq!(cfg.recomp_rate_limit, Duration::from_millis(250));
    }

    #[test]
    fn low_fps_run_detection() {
        let n = Priority::Normal;
        let h = Priority::High;
        assert_eq!(
            low_fps_range(&[60, 2, 1, 60, 1], &[n; 5], 5),
            Some(TargetRange { first: 1, last: 2 }),
            "first run only"
        );
        assert_eq!(low_fps_range(&[60, 2, 60], &[n; 3], 5), None, "single layer discarded");
        assert_eq!(low_fps_range(&[1, 1, 1], &[n, h, n], 5), None, "high layer breaks the run");
        assert_eq!(
            low_fps_range(&[1, 1, 1], &[h, n, n], 5),
            Some(TargetRange { first: 1, last: 2 }),
            "leading high layer skipped"
        );
    }
}
