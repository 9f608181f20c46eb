//! Carousel engine for the memory hall.
//!
//! Memories sit on a circular ring and are browsed by index. The engine owns
//! a fractional center index that eases toward the selected target along the
//! shortest arc, and one [`CarouselSlot`] per memory holding its smoothed
//! transform. [`CarouselEngine::update`] is the only writer of slot
//! transforms.
//!
//! Per item `i` with `offset = wrapped_offset(i, center, count)`:
//!
//! ```text
//! angle = offset * angle_step
//! x     = sin(angle) * radius
//! y     = y_offset
//! z     = z_base - depth * |offset|^2.2
//! scale = exp(-0.28 * |offset|)
//! yaw   = -angle * face_in_strength
//! ```

use serde::{Deserialize, Serialize};
use vek::ops::Lerp;
use vek::{Quaternion, Vec3};

use crate::render::{clamp_or, ParamSink, Uniform, VisualParams};

// ---------------------------------------------------------------------------
// Index math
// ---------------------------------------------------------------------------

/// Wrap `index` into `[0, count)`. `0` for an empty ring.
#[must_use]
pub fn wrap_index(index: isize, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let count = count as isize;
    index.rem_euclid(count) as usize
}

/// Signed shortest-arc distance from `center` to `index` on a ring of
/// `count` items. `0` for an empty ring.
#[must_use]
pub fn wrapped_offset(index: f32, center: f32, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    let count = count as f32;
    let half = count / 2.0;
    let mut offset = index - center;
    if offset > half {
        offset -= count;
    }
    if offset < -half {
        offset += count;
    }
    offset
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Ring radius limits.
pub const RING_RADIUS_LIMITS: (f32, f32) = (1.5, 4.0);
/// Ring depth limits.
pub const RING_DEPTH_LIMITS: (f32, f32) = (0.8, 6.0);
/// Angle step limits, in radians.
pub const RING_ANGLE_LIMITS: (f32, f32) = (0.18, 0.6);

/// User-adjustable ring geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingSettings {
    /// Horizontal radius.
    pub radius: f32,
    /// How far side items recede.
    pub depth: f32,
    /// Angle between neighbours, in radians.
    pub angle_step: f32,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            radius: 4.0,
            depth: 0.8,
            angle_step: 0.59,
        }
    }
}

impl RingSettings {
    /// Take `next`, clamped to the limits. Non-finite fields keep the value
    /// from `self`.
    #[must_use]
    pub fn merged(self, next: Self) -> Self {
        Self {
            radius: clamp_or(next.radius, self.radius, RING_RADIUS_LIMITS),
            depth: clamp_or(next.depth, self.depth, RING_DEPTH_LIMITS),
            angle_step: clamp_or(next.angle_step, self.angle_step, RING_ANGLE_LIMITS),
        }
    }
}

/// Animation constants of the carousel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselTuning {
    /// Z of the centered item.
    pub z_base: f32,
    /// Y of every item.
    pub y_offset: f32,
    /// How strongly side items turn toward the viewer.
    pub face_in_strength: f32,
    /// `uEdgeFade` written to visible items.
    pub edge_fade: f32,
    /// `uEdgeWidth` written to visible items.
    pub edge_width: f32,
    /// Opacity decay per unit of offset.
    pub opacity_falloff: f32,
    /// Lower opacity clamp.
    pub opacity_min: f32,
    /// Upper opacity clamp.
    pub opacity_max: f32,
    /// Dimming per unit of offset.
    pub dim_falloff: f32,
    /// Lower dim clamp.
    pub dim_min: f32,
    /// Scale decay per unit of offset.
    pub scale_falloff: f32,
    /// Exponent of depth recession.
    pub depth_exponent: f32,
    /// Easing rate of the center index.
    pub index_lerp: f32,
    /// Easing rate of position.
    pub pos_lerp: f32,
    /// Easing rate of orientation.
    pub rot_lerp: f32,
    /// Easing rate of scale.
    pub scale_lerp: f32,
    /// Items further than this from the target are hidden.
    pub visible_range: f32,
    /// Below this remaining offset the center snaps to the target.
    pub snap_epsilon: f32,
}

impl Default for CarouselTuning {
    fn default() -> Self {
        Self {
            z_base: 0.6,
            y_offset: -0.1,
            face_in_strength: 1.0,
            edge_fade: 0.75,
            edge_width: 0.38,
            opacity_falloff: 0.45,
            opacity_min: 0.12,
            opacity_max: 0.9,
            dim_falloff: 0.18,
            dim_min: 0.4,
            scale_falloff: 0.28,
            depth_exponent: 2.2,
            index_lerp: 0.12,
            pos_lerp: 0.14,
            rot_lerp: 0.14,
            scale_lerp: 0.14,
            visible_range: 2.0,
            snap_epsilon: 0.001,
        }
    }
}

impl CarouselTuning {
    /// Opacity of an item `abs_offset` slots from the center.
    #[must_use]
    pub fn opacity(&self, opacity_base: f32, abs_offset: f32) -> f32 {
        (opacity_base * (-abs_offset * self.opacity_falloff).exp())
            .clamp(self.opacity_min, self.opacity_max)
    }

    /// Dim factor of an item `abs_offset` slots from the center.
    #[must_use]
    pub fn dim(&self, abs_offset: f32) -> f32 {
        (1.0 - self.dim_falloff * abs_offset).clamp(self.dim_min, 1.0)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Selected index and the eased center that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CarouselState {
    /// Selected item.
    pub index_target: usize,
    /// Fractional center, converging on `index_target`.
    pub index_float: f32,
}

/// Smoothed transform of one carousel item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarouselSlot {
    /// Where the item is heading.
    pub target_pos: Vec3<f32>,
    /// Uniform scale it is heading to.
    pub target_scale: Vec3<f32>,
    /// Orientation it is heading to.
    pub target_quat: Quaternion<f32>,
    /// Committed position.
    pub position: Vec3<f32>,
    /// Committed scale.
    pub scale: Vec3<f32>,
    /// Committed orientation.
    pub orientation: Quaternion<f32>,
    /// Whether the item is drawn this frame.
    pub visible: bool,
    /// Draw order; larger draws later.
    pub render_order: i32,
}

impl Default for CarouselSlot {
    fn default() -> Self {
        Self {
            target_pos: Vec3::zero(),
            target_scale: Vec3::one(),
            target_quat: Quaternion::identity(),
            position: Vec3::zero(),
            scale: Vec3::one(),
            orientation: Quaternion::identity(),
            visible: false,
            render_order: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ring layout, navigation state and per-item slots.
#[derive(Debug, Clone, Default)]
pub struct CarouselEngine {
    state: CarouselState,
    tuning: CarouselTuning,
    slots: Vec<CarouselSlot>,
}

impl CarouselEngine {
    /// Create an empty carousel.
    #[must_use]
    pub fn new(tuning: CarouselTuning) -> Self {
        Self {
            state: CarouselState::default(),
            tuning,
            slots: Vec::new(),
        }
    }

    /// Navigation state.
    #[must_use]
    pub fn state(&self) -> CarouselState {
        self.state
    }

    /// Animation constants.
    #[must_use]
    pub fn tuning(&self) -> &CarouselTuning {
        &self.tuning
    }

    /// Per-item slots, in archive order.
    #[must_use]
    pub fn slots(&self) -> &[CarouselSlot] {
        &self.slots
    }

    /// Slot of item `index`.
    #[must_use]
    pub fn slot(&self, index: usize) -> Option<&CarouselSlot> {
        self.slots.get(index)
    }

    /// Move the selection by `delta` and return the new target.
    ///
    /// `None` on an empty ring. The caller is expected to request the
    /// full-resolution asset of the returned index.
    pub fn navigate(&mut self, delta: isize, count: usize) -> Option<usize> {
        if count == 0 {
            self.state = CarouselState::default();
            return None;
        }
        let current = wrap_index(self.state.index_target as isize, count);
        let target = wrap_index(current as isize + delta.rem_euclid(count as isize), count);
        self.state.index_target = target;
        Some(target)
    }

    /// Jump straight to `index` without easing.
    pub fn snap_to_index(&mut self, index: usize, count: usize) {
        if count == 0 {
            self.state = CarouselState::default();
            return;
        }
        let target = wrap_index(index as isize, count);
        self.state.index_target = target;
        self.state.index_float = target as f32;
    }

    /// A new item was inserted at `at`; its slot starts hidden.
    pub fn insert_slot(&mut self, at: usize) {
        let at = at.min(self.slots.len());
        self.slots.insert(at, CarouselSlot::default());
    }

    /// Item `at` was removed.
    pub fn remove_slot(&mut self, at: usize) {
        if at < self.slots.len() {
            self.slots.remove(at);
        }
        if self.slots.is_empty() {
            self.state = CarouselState::default();
        }
    }

    /// Grow or shrink the slot list to `count`.
    pub fn sync_len(&mut self, count: usize) {
        self.slots.resize(count, CarouselSlot::default());
        if count == 0 {
            self.state = CarouselState::default();
        }
    }

    /// Advance the center index one frame and return it.
    fn step_center(&mut self, count: usize) -> f32 {
        let target = wrap_index(self.state.index_target as isize, count);
        self.state.index_target = target;
        let offset = wrapped_offset(target as f32, self.state.index_float, count);
        if offset.abs() < self.tuning.snap_epsilon {
            self.state.index_float = target as f32;
        } else {
            self.state.index_float += offset * self.tuning.index_lerp;
        }
        self.state.index_float = self.state.index_float.rem_euclid(count as f32);
        self.state.index_float
    }

    /// Per-frame update: ease the center, lay out every item and write the
    /// carousel uniforms of visible items.
    ///
    /// `visuals` is the archive's item list in order; the slot list is
    /// resized to match.
    pub fn update(&mut self, ring: &RingSettings, opacity_base: f32, visuals: &[&VisualParams]) {
        let count = visuals.len();
        self.sync_len(count);
        if count == 0 {
            return;
        }

        let center = self.step_center(count);
        let target = self.state.index_target as f32;
        let tuning = &self.tuning;

        for (i, (slot, visual)) in self.slots.iter_mut().zip(visuals).enumerate() {
            let offset = wrapped_offset(i as f32, center, count);
            let visible = wrapped_offset(i as f32, target, count).abs() <= tuning.visible_range;
            let was_visible = slot.visible;
            slot.visible = visible;
            if !visible {
                continue;
            }

            let abs_offset = offset.abs();
            let angle = offset * ring.angle_step;
            let scale = (-tuning.scale_falloff * abs_offset).exp();

            slot.target_pos = Vec3::new(
                angle.sin() * ring.radius,
                tuning.y_offset,
                tuning.z_base - ring.depth * abs_offset.powf(tuning.depth_exponent),
            );
            slot.target_scale = Vec3::broadcast(scale);
            slot.target_quat = Quaternion::rotation_y(-angle * tuning.face_in_strength);

            visual.set_uniform(Uniform::Opacity, tuning.opacity(opacity_base, abs_offset));
            visual.set_uniform(Uniform::Dim, tuning.dim(abs_offset));
            visual.set_uniform(Uniform::EdgeFade, tuning.edge_fade);
            visual.set_uniform(Uniform::EdgeWidth, tuning.edge_width);
            slot.render_order = 10 - (abs_offset * 2.0).round() as i32;

            if was_visible {
                slot.position = Lerp::lerp(slot.position, slot.target_pos, tuning.pos_lerp);
                slot.scale = Lerp::lerp(slot.scale, slot.target_scale, tuning.scale_lerp);
                slot.orientation =
                    Quaternion::slerp(slot.orientation, slot.target_quat, tuning.rot_lerp);
            } else {
                slot.position = slot.target_pos;
                slot.scale = slot.target_scale;
                slot.orientation = slot.target_quat;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EffectSettings;

    fn visuals(n: usize) -> Vec<VisualParams> {
        (0..n)
            .map(|_| VisualParams::from_snapshot(&EffectSettings::default(), 1.0))
            .collect()
    }

    fn run_frames(engine: &mut CarouselEngine, items: &[VisualParams], frames: usize) {
        let refs: Vec<&VisualParams> = items.iter().collect();
        for _ in 0..frames {
            engine.update(&RingSettings::default(), 0.62, &refs);
        }
    }

    #[test]
    fn wrap_index_handles_negatives_and_empty() {
        assert_eq!(wrap_index(-1, 5), 4);
        assert_eq!(wrap_index(7, 5), 2);
        assert_eq!(wrap_index(3, 0), 0);
    }

    #[test]
    fn wrapped_offset_takes_short_arc() {
        assert!((wrapped_offset(5.0, 0.0, 6) - -1.0).abs() < f32::EPSILON);
        assert!((wrapped_offset(0.0, 5.0, 6) - 1.0).abs() < f32::EPSILON);
        assert!((wrapped_offset(2.0, 0.0, 6) - 2.0).abs() < f32::EPSILON);
        assert!(wrapped_offset(1.0, 0.0, 0).abs() < f32::EPSILON);
    }

    #[test]
    fn navigate_on_empty_ring_is_noop() {
        let mut engine = CarouselEngine::default();
        assert_eq!(engine.navigate(1, 0), None);
        assert_eq!(engine.state(), CarouselState::default());
    }

    #[test]
    fn navigate_extreme_deltas_wrap() {
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(3, 5);
        // isize::MAX ≡ 2 (mod 5)
        assert_eq!(engine.navigate(isize::MAX, 5), Some(0));

        engine.snap_to_index(3, 5);
        // isize::MIN ≡ 2 (mod 5)
        assert_eq!(engine.navigate(isize::MIN, 5), Some(0));

        engine.snap_to_index(0, 5);
        assert_eq!(engine.navigate(-7, 5), Some(3));
    }

    #[test]
    fn navigate_three_steps_converges() {
        let items = visuals(6);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(0, 6);
        for _ in 0..3 {
            engine.navigate(1, 6);
        }
        assert_eq!(engine.state().index_target, 3);

        run_frames(&mut engine, &items, 200);
        assert!((engine.state().index_float - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn center_wraps_along_short_arc() {
        let items = visuals(6);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(0, 6);
        engine.navigate(-1, 6);
        assert_eq!(engine.state().index_target, 5);

        run_frames(&mut engine, &items, 1);
        // Moving backwards from 0 wraps to just below 6.
        let float = engine.state().index_float;
        assert!(float > 5.5 && float < 6.0, "index_float = {float}");
    }

    #[test]
    fn visibility_horizon_is_two() {
        let items = visuals(8);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(0, 8);
        run_frames(&mut engine, &items, 1);

        let visible: Vec<bool> = engine.slots().iter().map(|s| s.visible).collect();
        assert_eq!(
            visible,
            vec![true, true, true, false, false, false, true, true]
        );
    }

    #[test]
    fn center_item_layout_and_uniforms() {
        let items = visuals(3);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(1, 3);
        run_frames(&mut engine, &items, 1);

        let slot = engine.slot(1).expect("slot");
        assert!(slot.position.x.abs() < 1e-6);
        assert!((slot.position.y - -0.1).abs() < 1e-6);
        assert!((slot.position.z - 0.6).abs() < 1e-6);
        assert!((slot.scale.x - 1.0).abs() < 1e-6);
        assert_eq!(slot.render_order, 10);
        assert_eq!(items[1].uniform(Uniform::Opacity), Some(0.62));
        assert_eq!(items[1].uniform(Uniform::Dim), Some(1.0));

        let side = engine.slot(0).expect("slot");
        assert!(side.position.x < 0.0);
        assert_eq!(side.render_order, 8);
    }

    #[test]
    fn newly_visible_items_snap_then_ease() {
        let items = visuals(8);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(0, 8);
        run_frames(&mut engine, &items, 1);
        assert!(!engine.slot(3).expect("slot").visible);

        engine.navigate(1, 8);
        run_frames(&mut engine, &items, 1);
        let slot = *engine.slot(3).expect("slot");
        assert!(slot.visible);
        assert_eq!(slot.position, slot.target_pos);

        let before = *engine.slot(1).expect("slot");
        run_frames(&mut engine, &items, 1);
        let after = *engine.slot(1).expect("slot");
        assert_ne!(after.position, after.target_pos);
        assert_ne!(after.position, before.position);
    }

    #[test]
    fn invisible_items_keep_last_transform() {
        let items = visuals(8);
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(2, 8);
        run_frames(&mut engine, &items, 1);
        let kept = *engine.slot(0).expect("slot");

        engine.snap_to_index(5, 8);
        run_frames(&mut engine, &items, 1);
        let hidden = engine.slot(0).expect("slot");
        assert!(!hidden.visible);
        assert_eq!(hidden.position, kept.position);
    }

    #[test]
    fn structural_changes_clamp_state() {
        let mut engine = CarouselEngine::default();
        engine.sync_len(3);
        engine.snap_to_index(2, 3);
        engine.insert_slot(0);
        assert_eq!(engine.slots().len(), 4);
        engine.remove_slot(10);
        assert_eq!(engine.slots().len(), 4);
        engine.sync_len(0);
        assert_eq!(engine.state(), CarouselState::default());
    }

    #[test]
    fn ring_merge_clamps_and_keeps_on_nan() {
        let ring = RingSettings::default().merged(RingSettings {
            radius: 0.1,
            depth: f32::NAN,
            angle_step: 5.0,
        });
        assert!((ring.radius - 1.5).abs() < f32::EPSILON);
        assert!((ring.depth - 0.8).abs() < f32::EPSILON);
        assert!((ring.angle_step - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn opacity_and_dim_curves() {
        let tuning = CarouselTuning::default();
        assert!((tuning.opacity(0.62, 0.0) - 0.62).abs() < f32::EPSILON);
        assert!((tuning.opacity(1.0, 0.0) - 0.9).abs() < f32::EPSILON);
        assert!(tuning.opacity(0.62, 1.0) < tuning.opacity(0.62, 0.5));
        assert!((tuning.opacity(0.62, 50.0) - 0.12).abs() < f32::EPSILON);
        assert!((tuning.dim(10.0) - 0.4).abs() < f32::EPSILON);
    }
}
