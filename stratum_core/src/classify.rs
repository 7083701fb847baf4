// Copyright 2026 the Stratum Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Composition classification.
//!
//! Given the sorted layer list, [`classify`] assigns every layer one
//! [`CompositionPath`] and derives the index range each composition target
//! covers. The result is deterministic in its inputs.
//!
//! Classification runs in three stages:
//!
//! 1. **Placement**: each layer starts on the path its resource placement and
//!    overrides allow.
//! 2. **Fixpoint**: the interaction rules below run until nothing changes.
//!    Rules move layers toward the client target. The one exception pulls a
//!    normal device layer into the secondary range around it, and nothing
//!    moves a normal layer back to a device plane, so the loop terminates.
//! 3. **Window budget**: while device layers plus active targets exceed the
//!    window count, the lowest non-priority device layer is demoted and the
//!    fixpoint re-runs.
//!
//! ```text
//!   index   path        client range   secondary range
//!     4     Device
//!     3     Secondary                  ── last
//!     2     Secondary                  ── first
//!     1     Client      ── last
//!     0     Client      ── first
//! ```

use crate::error::ResourceError;
use crate::geometry::BlendMode;
use crate::image::{ImageInfo, Priority};
use crate::resource::Placement;

/// Where a layer is composed this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompositionPath {
    /// Rendered by the client into the client target.
    #[default]
    Client,
    /// Shown directly on a hardware plane.
    Device,
    /// Composed by the secondary compositor into its target.
    Secondary,
}

impl CompositionPath {
    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Device => "device",
            Self::Secondary => "secondary",
        }
    }
}

/// Inclusive index range of a composition target over the sorted layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetRange {
    /// Lowest covered index.
    pub first: usize,
    /// Highest covered index.
    pub last: usize,
}

impl TargetRange {
    /// Number of covered indices.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.last - self.first + 1
    }

    /// Returns `true` if `index` lies in the range.
    #[must_use]
    pub const fn contains(&self, index: usize) -> bool {
        self.first <= index && index <= self.last
    }

    /// Returns `true` if `index` lies strictly between the ends.
    #[must_use]
    pub const fn strictly_contains(&self, index: usize) -> bool {
        self.first < index && index < self.last
    }

    /// Returns `true` if the ranges share an index.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    /// Covered indices.
    pub fn indices(&self) -> core::ops::RangeInclusive<usize> {
        self.first..=self.last
    }
}

/// Per-layer input to [`classify`].
#[derive(Clone, Copy, Debug)]
pub struct ClassifyInput {
    /// Layer description.
    pub image: ImageInfo,
    /// Resource manager's placement judgement.
    pub placement: Placement,
    /// Whether the secondary compositor can take the layer.
    pub secondary_ok: bool,
    /// Client composition requested or forced (mode switch, low-fps range).
    pub force_client: bool,
}

/// Classification result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Path per sorted layer.
    pub paths: Vec<CompositionPath>,
    /// Client target range, if any layer is client-composed.
    pub client: Option<TargetRange>,
    /// Secondary target range, if any layer is secondary-composed.
    pub secondary: Option<TargetRange>,
    /// Layers demoted to meet the window budget.
    pub demoted: usize,
}

/// Window indices for one frame, bottom to top.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WindowPlan {
    /// Window per device layer.
    pub layers: Vec<Option<usize>>,
    /// Window of the client target.
    pub client: Option<usize>,
    /// Window of the secondary target.
    pub secondary: Option<usize>,
}

impl Classification {
    /// Every layer client-composed.
    #[must_use]
    pub fn all_client(len: usize) -> Self {
        let paths = vec![CompositionPath::Client; len];
        let client = range_of(&paths, CompositionPath::Client);
        Self {
            paths,
            client,
            secondary: None,
            demoted: 0,
        }
    }

    /// Number of device-path layers.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.paths
            .iter()
            .filter(|&&p| p == CompositionPath::Device)
            .count()
    }

    /// Windows needed: one per device layer and one per active target.
    #[must_use]
    pub fn windows_needed(&self) -> usize {
        self.device_count() + usize::from(self.client.is_some()) + usize::from(self.secondary.is_some())
    }

    /// Assigns windows in z-order. A target takes its window at the position
    /// of its lowest layer.
    #[must_use]
    pub fn assign_windows(&self) -> WindowPlan {
        let mut plan = WindowPlan {
            layers: vec![None; self.paths.len()],
            client: None,
            secondary: None,
        };
        let mut next = 0;
        for (i, path) in self.paths.iter().enumerate() {
            if self.client.is_some_and(|r| r.first == i) {
                plan.client = Some(next);
                next += 1;
            }
            if self.secondary.is_some_and(|r| r.first == i) {
                plan.secondary = Some(next);
                next += 1;
            }
            if *path == CompositionPath::Device {
                plan.layers[i] = Some(next);
                next += 1;
            }
        }
        plan
    }

    /// Recomputes both target ranges from the paths.
    pub fn refresh_ranges(&mut self) {
        self.client = range_of(&self.paths, CompositionPath::Client);
        self.secondary = range_of(&self.paths, CompositionPath::Secondary);
    }

    /// Moves every secondary layer to the client target.
    pub fn evict_secondary(&mut self) {
        for p in &mut self.paths {
            if *p == CompositionPath::Secondary {
                *p = CompositionPath::Client;
            }
        }
        self.refresh_ranges();
    }
}

/// Smallest range covering every layer on `path`.
#[must_use]
pub fn range_of(paths: &[CompositionPath], path: CompositionPath) -> Option<TargetRange> {
    let first = paths.iter().position(|&p| p == path)?;
    let last = paths.iter().rposition(|&p| p == path)?;
    Some(TargetRange { first, last })
}

/// Highest index above the bottom layer whose opaque source-copy blending
/// would expose what is below it, if any.
///
/// Such a layer qualifies when it has no buffer, or when it is below High
/// priority and its format carries alpha.
#[must_use]
pub fn blending_none_index(inputs: &[ClassifyInput]) -> Option<usize> {
    inputs
        .iter()
        .enumerate()
        .skip(1)
        .filter(|(_, l)| {
            l.image.blend == BlendMode::None
                && match l.image.buffer {
                    None => true,
                    Some(b) => !l.image.priority.is_high() && b.format.has_alpha(),
                }
        })
        .map(|(i, _)| i)
        .next_back()
}

/// Classifies the sorted layers.
///
/// Fails with [`ResourceError::NoWindows`] when even the all-demotable layers
/// moved to the client target do not fit `window_count`.
pub fn classify(
    inputs: &[ClassifyInput],
    window_count: usize,
    secondary_combo: bool,
) -> Result<Classification, ResourceError> {
    let mut c = Classification {
        paths: inputs.iter().map(initial_path).collect(),
        ..Classification::default()
    };
    let bni = blending_none_index(inputs);

    loop {
        settle(&mut c, inputs, bni, secondary_combo);

        let needed = c.windows_needed();
        if needed <= window_count {
            break;
        }
        let victim = (0..inputs.len()).find(|&i| {
            c.paths[i] == CompositionPath::Device && !inputs[i].image.priority.is_high()
        });
        let Some(victim) = victim else {
            return Err(ResourceError::NoWindows {
                needed,
                available: window_count,
            });
        };
        tracing::debug!(layer = victim, needed, window_count, "demote to client for window budget");
        c.paths[victim] = CompositionPath::Client;
        c.demoted += 1;
    }

    Ok(c)
}

fn initial_path(l: &ClassifyInput) -> CompositionPath {
    if l.force_client {
        return CompositionPath::Client;
    }
    if l.image.priority == Priority::Max && l.secondary_ok {
        return CompositionPath::Secondary;
    }
    match l.placement {
        Placement::Overlay | Placement::OverlayViaM2m => CompositionPath::Device,
        Placement::Secondary if l.secondary_ok => CompositionPath::Secondary,
        Placement::Secondary | Placement::ClientOnly => CompositionPath::Client,
    }
}

/// Applies the interaction rules until a fixpoint.
fn settle(c: &mut Classification, inputs: &[ClassifyInput], bni: Option<usize>, combo: bool) {
    loop {
        c.refresh_ranges();
        let changed = sandwich(c, inputs)
            || secondary_sandwich(c, inputs)
            || source_over(c, inputs, bni)
            || max_exclusive(c, inputs)
            || nesting(c, inputs)
            || priority_mix(c, inputs, combo);
        if !changed {
            c.refresh_ranges();
            return;
        }
    }
}

fn set(c: &mut Classification, i: usize, path: CompositionPath) -> bool {
    if c.paths[i] == path {
        false
    } else {
        c.paths[i] = path;
        true
    }
}

/// Layers strictly inside the client range join it, unless High priority.
fn sandwich(c: &mut Classification, inputs: &[ClassifyInput]) -> bool {
    let Some(r) = c.client else {
        return false;
    };
    let mut changed = false;
    for i in r.first + 1..r.last {
        if !inputs[i].image.priority.is_high() {
            changed |= set(c, i, CompositionPath::Client);
        }
    }
    changed
}

/// Normal device layers strictly inside the secondary range join it, or go
/// to the client target when the secondary compositor cannot take them.
fn secondary_sandwich(c: &mut Classification, inputs: &[ClassifyInput]) -> bool {
    let Some(r) = c.secondary else {
        return false;
    };
    let mut changed = false;
    for i in r.first + 1..r.last {
        if c.paths[i] != CompositionPath::Device || inputs[i].image.priority.is_high() {
            continue;
        }
        let path = if inputs[i].secondary_ok {
            CompositionPath::Secondary
        } else {
            CompositionPath::Client
        };
        tracing::trace!(layer = i, path = path.as_str(), "sandwiched by secondary range");
        changed |= set(c, i, path);
    }
    changed
}

/// A source-copy layer above client content pulls everything below it into
/// the client target.
fn source_over(c: &mut Classification, inputs: &[ClassifyInput], bni: Option<usize>) -> bool {
    let Some(b) = bni else {
        return false;
    };
    let client_below = (0..=b).any(|i| {
        c.paths[i] == CompositionPath::Client && !inputs[i].image.priority.is_high()
    });
    if !client_below {
        return false;
    }
    let mut changed = false;
    for i in 0..=b {
        if !inputs[i].image.priority.is_high() {
            changed |= set(c, i, CompositionPath::Client);
        }
    }
    changed
}

/// A Max layer keeps the secondary compositor to itself.
fn max_exclusive(c: &mut Classification, inputs: &[ClassifyInput]) -> bool {
    let Some(r) = c.secondary else {
        return false;
    };
    let has_max = r.indices().any(|i| {
        c.paths[i] == CompositionPath::Secondary && inputs[i].image.priority == Priority::Max
    });
    if !has_max {
        return false;
    }
    let mut changed = false;
    for i in r.indices() {
        match inputs[i].image.priority {
            Priority::Max => {}
            Priority::High => {
                if c.paths[i] == CompositionPath::Secondary {
                    changed |= set(c, i, CompositionPath::Device);
                }
            }
            Priority::Normal => changed |= set(c, i, CompositionPath::Client),
        }
    }
    changed
}

/// Overlapping ranges: the shorter secondary tail outside the client range
/// moves to the client target. Ties move the upper tail.
fn nesting(c: &mut Classification, inputs: &[ClassifyInput]) -> bool {
    let (Some(cr), Some(sr)) = (c.client, c.secondary) else {
        return false;
    };
    if !cr.overlaps(&sr) {
        return false;
    }
    let lower = cr.first.saturating_sub(sr.first);
    let upper = sr.last.saturating_sub(cr.last);
    let tail = if lower < upper {
        sr.first..cr.first
    } else {
        cr.last + 1..sr.last + 1
    };
    let mut changed = false;
    for i in tail {
        if c.paths[i] == CompositionPath::Secondary {
            let path = if inputs[i].image.priority.is_high() {
                CompositionPath::Device
            } else {
                CompositionPath::Client
            };
            changed |= set(c, i, path);
        }
    }
    changed
}

/// Without priority multiplexing, High layers at the ends of the secondary
/// range move to their own plane, and a High layer strictly inside it
/// invalidates the target.
fn priority_mix(c: &mut Classification, inputs: &[ClassifyInput], combo: bool) -> bool {
    if combo {
        return false;
    }
    let Some(r) = c.secondary else {
        return false;
    };
    let mut shrunk = false;
    for i in [r.first, r.last] {
        if inputs[i].image.priority == Priority::High {
            shrunk |= set(c, i, CompositionPath::Device);
        }
    }
    if shrunk {
        return true;
    }
    let blocked = (r.first + 1..r.last).any(|i| inputs[i].image.priority == Priority::High);
    if !blocked {
        return false;
    }
    let mut changed = false;
    for i in r.indices() {
        if c.paths[i] == CompositionPath::Secondary && !inputs[i].image.priority.is_high() {
            changed |= set(c, i, CompositionPath::Client);
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Dataspace, PixelFormat};
    use crate::geometry::{Color, Rect, Transform};
    use crate::image::BufferHandle;

    use CompositionPath::{Client as C, Device as D, Secondary as S};

    fn layer(placement: Placement) -> ClassifyInput {
        ClassifyInput {
            image: ImageInfo {
                buffer: Some(BufferHandle::packed(1, 64, 64, PixelFormat::Rgbx8888)),
                crop: Rect::from_xywh(0, 0, 64, 64),
                frame: Rect::from_xywh(0, 0, 64, 64),
                format: PixelFormat::Rgbx8888,
                dataspace: Dataspace::SRGB,
                transform: Transform::empty(),
                blend: BlendMode::Premultiplied,
                plane_alpha: 1.0,
                color: Color::default(),
                priority: Priority::Normal,
            },
            placement,
            secondary_ok: true,
            force_client: false,
        }
    }

    fn with_priority(mut l: ClassifyInput, p: Priority) -> ClassifyInput {
        l.image.priority = p;
        l
    }

    fn partitioned(c: &Classification, inputs: &[ClassifyInput]) {
        for (path, range) in [(C, c.client), (S, c.secondary)] {
            assert_eq!(range, range_of(&c.paths, path), "{path:?} range is its span");
            let Some(r) = range else { continue };
            for i in r.indices() {
                assert!(
                    c.paths[i] == path || inputs[i].image.priority.is_high(),
                    "index {i} is {:?} inside the {path:?} range {r:?}",
                    c.paths[i]
                );
            }
        }
    }

    #[test]
    fn all_overlay_fits() {
        let inputs = vec![layer(Placement::Overlay); 3];
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [D, D, D]);
        assert!(c.client.is_none());
        assert_eq!(c.windows_needed(), 3);
    }

    #[test]
    fn sandwiched_overlay_joins_client() {
        let inputs = vec![
            layer(Placement::ClientOnly),
            layer(Placement::Overlay),
            layer(Placement::ClientOnly),
            layer(Placement::Overlay),
        ];
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [C, C, C, D]);
        assert_eq!(c.client, Some(TargetRange { first: 0, last: 2 }));
        partitioned(&c, &inputs);
    }

    #[test]
    fn high_priority_survives_sandwich() {
        let inputs = vec![
            layer(Placement::ClientOnly),
            with_priority(layer(Placement::Overlay), Priority::High),
            layer(Placement::ClientOnly),
        ];
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [C, D, C]);
    }

    #[test]
    fn source_copy_pulls_lower_layers() {
        let mut top = layer(Placement::Overlay);
        top.image.blend = BlendMode::None;
        top.image.buffer = Some(BufferHandle::packed(2, 64, 64, PixelFormat::Rgba8888));
        top.image.format = PixelFormat::Rgba8888;
        let inputs = vec![
            layer(Placement::ClientOnly),
            layer(Placement::Overlay),
            top,
            layer(Placement::Overlay),
        ];
        assert_eq!(blending_none_index(&inputs), Some(2));
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [C, C, C, D]);
    }

    #[test]
    fn source_copy_ignored_without_client_below() {
        let mut top = layer(Placement::Overlay);
        top.image.blend = BlendMode::None;
        top.image.buffer = None;
        let inputs = vec![layer(Placement::Overlay), top, layer(Placement::ClientOnly)];
        assert_eq!(blending_none_index(&inputs), Some(1));
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [D, D, C]);
    }

    #[test]
    fn max_layer_is_alone_on_secondary() {
        let inputs = vec![
            layer(Placement::Secondary),
            with_priority(layer(Placement::Secondary), Priority::Max),
            layer(Placement::Secondary),
        ];
        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [C, S, C]);
        assert_eq!(c.secondary, Some(TargetRange { first: 1, last: 1 }));
        assert_eq!(c.client, Some(TargetRange { first: 0, last: 2 }));
        partitioned(&c, &inputs);
    }

    #[test]
    fn max_exclusivity_returns_high_to_overlay() {
        let inputs = vec![
            with_priority(layer(Placement::Secondary), Priority::Max),
            with_priority(layer(Placement::Secondary), Priority::High),
        ];
        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [S, D]);
    }

    #[test]
    fn nesting_converts_shorter_tail() {
        // Secondary covers 0..=4, client sits at 2: the tails are equal, so
        // the upper one moves to the client target.
        let inputs = vec![
            layer(Placement::Secondary),
            layer(Placement::Secondary),
            layer(Placement::ClientOnly),
            layer(Placement::Secondary),
            layer(Placement::Secondary),
        ];
        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [S, S, C, C, C]);
        assert!(!c.client.unwrap().overlaps(&c.secondary.unwrap()));

        let inputs = vec![
            layer(Placement::Secondary),
            layer(Placement::ClientOnly),
            layer(Placement::Secondary),
            layer(Placement::Secondary),
        ];
        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [C, C, S, S]);
    }

    #[test]
    fn high_inside_secondary_without_combo() {
        let inputs = vec![
            layer(Placement::Secondary),
            with_priority(layer(Placement::Overlay), Priority::High),
            layer(Placement::Secondary),
        ];
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [C, D, C]);
        assert!(c.secondary.is_none());

        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [S, D, S]);
    }

    #[test]
    fn overlay_inside_secondary_range_joins_it() {
        let inputs = vec![
            layer(Placement::Secondary),
            layer(Placement::Overlay),
            layer(Placement::Secondary),
        ];
        for combo in [false, true] {
            let c = classify(&inputs, 6, combo).unwrap();
            assert_eq!(c.paths, [S, S, S], "combo={combo}");
            assert_eq!(
                c.secondary,
                Some(TargetRange { first: 0, last: 2 }),
                "one secondary range"
            );
            partitioned(&c, &inputs);
        }
    }

    #[test]
    fn unassignable_overlay_inside_secondary_range_goes_to_client() {
        let mut middle = layer(Placement::Overlay);
        middle.secondary_ok = false;
        let inputs = vec![layer(Placement::Secondary), middle, layer(Placement::Secondary)];
        let c = classify(&inputs, 6, true).unwrap();
        // The client layer splits the range; the upper tail follows it.
        assert_eq!(c.paths, [S, C, C], "no gap left in either range");
        partitioned(&c, &inputs);
    }

    #[test]
    fn client_inside_secondary_range_is_resolved() {
        let inputs = vec![
            layer(Placement::Secondary),
            layer(Placement::ClientOnly),
            layer(Placement::Secondary),
        ];
        for combo in [false, true] {
            let c = classify(&inputs, 6, combo).unwrap();
            assert!(
                !c.client.unwrap().overlaps(&c.secondary.unwrap()),
                "ranges are disjoint with combo={combo}"
            );
            partitioned(&c, &inputs);
        }
    }

    #[test]
    fn high_at_secondary_edge_leaves_range_without_combo() {
        let inputs = vec![
            with_priority(layer(Placement::Secondary), Priority::High),
            layer(Placement::Secondary),
            layer(Placement::Secondary),
            with_priority(layer(Placement::Secondary), Priority::High),
        ];
        let c = classify(&inputs, 6, false).unwrap();
        assert_eq!(c.paths, [D, S, S, D], "edges take their own planes");
        assert_eq!(
            c.secondary,
            Some(TargetRange { first: 1, last: 2 }),
            "range shrinks past the High layers"
        );
        partitioned(&c, &inputs);

        let c = classify(&inputs, 6, true).unwrap();
        assert_eq!(c.paths, [S, S, S, S], "combo keeps them");
        partitioned(&c, &inputs);
    }

    #[test]
    fn window_budget_demotes_lowest_normal_layer() {
        let inputs = vec![
            with_priority(layer(Placement::Overlay), Priority::High),
            layer(Placement::Overlay),
            layer(Placement::Overlay),
            layer(Placement::Overlay),
        ];
        let c = classify(&inputs, 3, false).unwrap();
        assert_eq!(c.paths, [D, C, C, D]);
        assert!(c.windows_needed() <= 3);
        assert_eq!(c.demoted, 2);
    }

    #[test]
    fn window_budget_failure() {
        let inputs = vec![with_priority(layer(Placement::Overlay), Priority::High); 3];
        assert_eq!(
            classify(&inputs, 2, false),
            Err(ResourceError::NoWindows {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn forced_client_overrides_placement() {
        let mut l = layer(Placement::Overlay);
        l.force_client = true;
        let c = classify(&[l, layer(Placement::Overlay)], 6, false).unwrap();
        assert_eq!(c.paths, [C, D]);
    }

    #[test]
    fn windows_follow_z_order() {
        let inputs = vec![
            layer(Placement::ClientOnly),
            layer(Placement::ClientOnly),
            layer(Placement::Overlay),
            layer(Placement::Secondary),
        ];
        let c = classify(&inputs, 6, false).unwrap();
        let plan = c.assign_windows();
        assert_eq!(plan.client, Some(0));
        assert_eq!(plan.layers, [None, None, Some(1), None]);
        assert_eq!(plan.secondary, Some(2));
    }

    #[test]
    fn all_client_covers_everything() {
        let c = Classification::all_client(3);
        assert_eq!(c.client, Some(TargetRange { first: 0, last: 2 }));
        assert_eq!(c.windows_needed(), 1);
        assert!(Classification::all_client(0).client.is_none());
    }
}
