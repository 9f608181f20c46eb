//! Property-based tests for the carousel ring math.
//!
//! The wrapped offset must always pick the short arc, navigation must be
//! reversible, and the center index must converge on any target.

use proptest::prelude::*;

use afterglow_core::carousel::{
    wrap_index, wrapped_offset, CarouselEngine, CarouselTuning, RingSettings,
};
use afterglow_core::render::VisualParams;
use afterglow_core::types::EffectSettings;

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// A ring size plus two indices on it.
fn ring_and_pair() -> impl Strategy<Value = (usize, usize, usize)> {
    (1..64usize).prop_flat_map(|count| (Just(count), 0..count, 0..count))
}

fn visuals(count: usize) -> Vec<VisualParams> {
    (0..count)
        .map(|_| VisualParams::from_snapshot(&EffectSettings::default(), 1.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Property: wrapped offset is bounded and lands back on the index
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn wrapped_offset_is_shortest_arc((count, center, index) in ring_and_pair()) {
        let offset = wrapped_offset(index as f32, center as f32, count);
        prop_assert!(offset.abs() <= (count / 2) as f32);

        let landed = wrap_index(center as isize + offset as isize, count);
        prop_assert_eq!(landed, index);
    }
}

// ---------------------------------------------------------------------------
// Property: wrap_index always lands in range
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn wrap_index_in_range(index in -10_000isize..10_000, count in 1..500usize) {
        let wrapped = wrap_index(index, count);
        prop_assert!(wrapped < count);
        prop_assert_eq!((wrapped as isize - index).rem_euclid(count as isize), 0);
    }
}

// ---------------------------------------------------------------------------
// Property: +1 then -1 is the identity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn navigate_is_reversible((count, start, _) in ring_and_pair(), delta in -20isize..20) {
        let mut engine = CarouselEngine::default();
        engine.snap_to_index(start, count);

        engine.navigate(delta, count);
        engine.navigate(-delta, count);
        prop_assert_eq!(engine.state().index_target, start);
    }
}

// ---------------------------------------------------------------------------
// Property: the center converges to any target
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn center_converges((count, start, target) in ring_and_pair()) {
        let items = visuals(count);
        let refs: Vec<&VisualParams> = items.iter().collect();
        let mut engine = CarouselEngine::new(CarouselTuning::default());
        engine.snap_to_index(start, count);
        engine.navigate(target as isize - start as isize, count);

        for _ in 0..400 {
            engine.update(&RingSettings::default(), 0.62, &refs);
        }
        let state = engine.state();
        prop_assert_eq!(state.index_target, target);
        prop_assert!((state.index_float - target as f32).abs() < f32::EPSILON);
    }
}

// ---------------------------------------------------------------------------
// Property: opacity peaks at the center and falls off monotonically
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn opacity_falls_off(base in 0.2f32..1.0, a in 0.0f32..4.0, b in 0.0f32..4.0) {
        let tuning = CarouselTuning::default();
        let at_center = tuning.opacity(base, 0.0);
        prop_assert!((at_center - base.clamp(0.12, 0.9)).abs() < 1e-6);

        let (near, far) = if a < b { (a, b) } else { (b, a) };
        prop_assert!(tuning.opacity(base, far) <= tuning.opacity(base, near));

        let raw_far = base * (-far * 0.45).exp();
        let raw_near = base * (-near * 0.45).exp();
        if far > near + 1e-3 && raw_near < 0.9 && raw_far > 0.12 {
            prop_assert!(tuning.opacity(base, far) < tuning.opacity(base, near));
        }
    }
}
