//! Animation sessions.
//!
//! A session binds one shape definition to an origin and is driven by an owner
//! calling [`AnimationSession::tick`] at the scheduler's cadence. Each tick:
//!
//! 1. Selects the first equation set whose guards hold. No match: nothing
//!    advances and the tick is a no-op.
//! 2. Counts towards the set's frame interval; an unfinished interval returns
//!    early.
//! 3. Otherwise advances the frame counter and angle, evaluates the set's
//!    formulas once per stream and emits one burst per stream.
//! 4. Moves the tracked position down by the set's clamped speed.
//!
//! The session never stops itself. The owner polls
//! [`AnimationSession::should_stop`] and decides what to do next.

use std::sync::Arc;

use glam::DVec3;

use crate::condition::ConditionContext;
use crate::config::{RegionMarker, SessionSettings};
use crate::effect::EffectSink;
use crate::shape::ShapeDefinition;
use crate::variables::VariableContext;

/// Reports what occupies a position.
pub trait Terrain {
    fn region_type_at(&self, position: DVec3) -> RegionMarker;
}

/// Terrain that is solid at or below a fixed height.
#[derive(Debug, Clone, Copy)]
pub struct FlatFloor {
    pub floor_y: f64,
}

impl Terrain for FlatFloor {
    fn region_type_at(&self, position: DVec3) -> RegionMarker {
        if position.y <= self.floor_y {
            RegionMarker::Solid
        } else {
            RegionMarker::Empty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Stopped,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The owner already stopped the session.
    Stopped,
    /// No equation set matched.
    NoMatch,
    /// The selected set's frame interval has not elapsed yet.
    Waiting { set: usize },
    /// A frame was emitted with one burst per stream.
    Emitted { set: usize, bursts: u32 },
}

/// Runtime state of one animation.
#[derive(Debug)]
pub struct AnimationSession {
    shape: Arc<ShapeDefinition>,
    settings: SessionSettings,
    variables: VariableContext,
    origin: DVec3,
    start: DVec3,
    position: DVec3,
    tick_counter: u64,
    theta: f64,
    wait_counter: u32,
    active_set: Option<usize>,
    state: SessionState,
}

impl AnimationSession {
    /// Start a session at `origin` raised by the shape's start height.
    pub fn new(shape: Arc<ShapeDefinition>, origin: DVec3, settings: SessionSettings) -> Self {
        let start = origin + DVec3::Y * shape.start_height();
        let variables = VariableContext::with_seed(settings.random_seed);
        Self {
            shape,
            settings,
            variables,
            origin,
            start,
            position: start,
            tick_counter: 0,
            theta: 0.0,
            wait_counter: 0,
            active_set: None,
            state: SessionState::Running,
        }
    }

    /// Advance the animation by one scheduler tick.
    pub fn tick(&mut self, effects: &mut dyn EffectSink) -> TickOutcome {
        if self.state == SessionState::Stopped {
            return TickOutcome::Stopped;
        }

        let shape = Arc::clone(&self.shape);
        self.variables
            .refresh(self.position, self.tick_counter, self.theta);
        let ctx = ConditionContext::new(&self.variables, self.position, self.start);
        let Some((index, set)) = shape.select(&ctx) else {
            log::trace!("Shape '{}': no equation set matched", shape.id());
            return TickOutcome::NoMatch;
        };

        if self.active_set != Some(index) {
            log::debug!(
                "Shape '{}': switching to equation set {} at frame {}",
                shape.id(),
                index,
                self.tick_counter
            );
            self.active_set = Some(index);
            self.wait_counter = 0;
        }

        self.wait_counter += 1;
        if self.wait_counter < set.params.frame_interval {
            log::trace!(
                "Shape '{}': waiting {}/{}",
                shape.id(),
                self.wait_counter,
                set.params.frame_interval
            );
            return TickOutcome::Waiting { set: index };
        }
        self.wait_counter = 0;

        self.tick_counter += 1;
        self.theta += set.params.theta_step;

        let streams = set.params.streams.max(1);
        let step = set.stream_step();
        for stream in 0..streams {
            let angle = self.theta + f64::from(stream) * step;
            self.variables
                .refresh(self.position, self.tick_counter, angle);
            let at = self.position + set.offset(&self.variables);
            effects.spawn_effect(&set.params.effect, at);
        }
        log::debug!(
            "Shape '{}': frame {} emitted {} burst(s) of '{}'",
            shape.id(),
            self.tick_counter,
            streams,
            set.params.effect.effect
        );

        self.position.y -= self.settings.clamp_descent(set.params.speed);

        TickOutcome::Emitted {
            set: index,
            bursts: streams,
        }
    }

    /// True once the tracked position is inside a terminal region, or when
    /// the shape has no equation sets at all.
    pub fn should_stop(&self, terrain: &dyn Terrain) -> bool {
        self.shape.is_empty() || self.settings.is_terminal(terrain.region_type_at(self.position))
    }

    /// Mark the session finished. Later ticks do nothing.
    pub fn stop(&mut self) {
        self.state = SessionState::Stopped;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current tracked position.
    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Number of emitted frames so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    /// Angle accumulator in degrees.
    pub fn theta(&self) -> f64 {
        self.theta
    }

    /// Index of the equation set chosen on the last matching tick.
    pub fn active_set(&self) -> Option<usize> {
        self.active_set
    }

    pub fn shape(&self) -> &Arc<ShapeDefinition> {
        &self.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, ConditionRef, ConditionRegistry};
    use crate::effect::{EffectCatalog, RecordingEffects};
    use crate::function_registry::FunctionRegistry;
    use crate::shape_loader::ShapeLoader;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    const EPS: f64 = 1e-9;

    fn load(doc: Value) -> Arc<ShapeDefinition> {
        load_with(doc, ConditionRegistry::new())
    }

    fn load_with(doc: Value, conditions: ConditionRegistry) -> Arc<ShapeDefinition> {
        let functions = FunctionRegistry::new();
        let effects = EffectCatalog::new();
        let loader = ShapeLoader::new(&functions, &conditions, &effects);
        Arc::new(loader.load_value(&doc).unwrap())
    }

    fn session(shape: Arc<ShapeDefinition>) -> AnimationSession {
        AnimationSession::new(shape, DVec3::new(0.0, 64.0, 0.0), SessionSettings::default())
    }

    #[test]
    fn test_empty_shape_stops_before_first_tick() {
        let shape = Arc::new(ShapeDefinition::new("empty", 5.0, vec![]).unwrap());
        let mut session = session(shape);
        let terrain = FlatFloor { floor_y: 0.0 };
        assert!(session.should_stop(&terrain));

        let mut effects = RecordingEffects::new();
        assert_eq!(session.tick(&mut effects), TickOutcome::NoMatch);
        assert!(effects.bursts.is_empty());
        assert_eq!(session.state(), SessionState::Running);
    }

    #[test]
    fn test_starts_above_origin() {
        let shape = load(json!({ "id": "a", "start_height": 3, "equations": [ { "effect": "flame" } ] }));
        let session = session(shape);
        assert_eq!(session.position(), DVec3::new(0.0, 67.0, 0.0));
        assert_eq!(session.origin(), DVec3::new(0.0, 64.0, 0.0));
    }

    #[test]
    fn test_first_match_wins() {
        let shape = load(json!({
            "id": "a",
            "defaults": { "effect": "flame", "speed": 0.1 },
            "equations": [ { "x": "1" }, { "x": "2" } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        for _ in 0..20 {
            assert_eq!(
                session.tick(&mut effects),
                TickOutcome::Emitted { set: 0, bursts: 1 }
            );
        }
        assert!(effects.bursts.iter().all(|b| b.position[0] == 1.0));
    }

    #[test]
    fn test_frame_interval_throttles_emission() {
        let shape = load(json!({
            "id": "a",
            "equations": [ { "effect": "flame", "frame_interval": 4 } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();

        for tick in 1..4 {
            assert_eq!(session.tick(&mut effects), TickOutcome::Waiting { set: 0 }, "tick {}", tick);
            assert!(effects.bursts.is_empty());
        }
        assert_eq!(
            session.tick(&mut effects),
            TickOutcome::Emitted { set: 0, bursts: 1 }
        );
        assert_eq!(effects.bursts.len(), 1);
        assert_eq!(session.tick_count(), 1);

        // The next frame comes after another full interval.
        for _ in 0..3 {
            assert_eq!(session.tick(&mut effects), TickOutcome::Waiting { set: 0 });
        }
        assert!(matches!(session.tick(&mut effects), TickOutcome::Emitted { .. }));
        assert_eq!(effects.bursts.len(), 2);
    }

    #[test]
    fn test_frame_interval_zero_and_one_emit_every_tick() {
        for interval in [0, 1] {
            let shape = load(json!({
                "id": "a",
                "equations": [ { "effect": "flame", "frame_interval": interval } ]
            }));
            let mut session = session(shape);
            let mut effects = RecordingEffects::new();
            for _ in 0..3 {
                session.tick(&mut effects);
            }
            assert_eq!(effects.bursts.len(), 3, "interval {}", interval);
        }
    }

    #[test]
    fn test_streams_are_spaced_evenly() {
        let shape = load(json!({
            "id": "a",
            "equations": [ { "effect": "flame", "x": "cos theta", "z": "sin theta", "streams": 4, "theta_step": 10 } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        assert_eq!(
            session.tick(&mut effects),
            TickOutcome::Emitted { set: 0, bursts: 4 }
        );
        assert_eq!(effects.bursts.len(), 4);

        let angles: Vec<f64> = effects
            .bursts
            .iter()
            .map(|b| b.position[2].atan2(b.position[0]).to_degrees())
            .collect();
        for (k, angle) in angles.iter().enumerate() {
            let expected = 10.0 + 90.0 * k as f64;
            let diff = (angle - expected).rem_euclid(360.0);
            assert!(diff < 1e-6 || (360.0 - diff) < 1e-6, "stream {}: {} vs {}", k, angle, expected);
        }

        // The accumulator only moves by the step, not by the stream spacing.
        assert!((session.theta() - 10.0).abs() < EPS);
    }

    #[test]
    fn test_uneven_stream_count_partitions_exactly() {
        let shape = load(json!({
            "id": "a",
            "equations": [ { "effect": "flame", "x": "theta", "streams": 7 } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        session.tick(&mut effects);
        let last = effects.bursts.last().unwrap().position[0];
        assert!((last - 6.0 * 360.0 / 7.0).abs() < EPS);
    }

    #[test]
    fn test_variables_refreshed_per_frame() {
        let shape = load(json!({
            "id": "a",
            "equations": [ { "effect": "flame", "x": "t", "z": "theta", "theta_step": 5, "speed": 0.5 } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        for _ in 0..3 {
            session.tick(&mut effects);
        }
        let xs: Vec<f64> = effects.bursts.iter().map(|b| b.position[0]).collect();
        let zs: Vec<f64> = effects.bursts.iter().map(|b| b.position[2]).collect();
        let ys: Vec<f64> = effects.bursts.iter().map(|b| b.position[1]).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(zs, vec![5.0, 10.0, 15.0]);
        assert_eq!(ys, vec![64.0, 63.5, 63.0]);
    }

    #[test]
    fn test_no_match_is_a_no_op() {
        let shape = load(json!({
            "id": "a",
            "start_height": 2,
            "equations": [ {
                "effect": "flame",
                "theta_step": 30,
                "conditions": [ { "type": "compare", "value": "y", "operator": "less_than", "than": 0 } ]
            } ]
        }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        let before = session.position();
        for _ in 0..5 {
            assert_eq!(session.tick(&mut effects), TickOutcome::NoMatch);
        }
        assert_eq!(session.position(), before);
        assert_eq!(session.tick_count(), 0);
        assert_eq!(session.theta(), 0.0);
        assert!(effects.bursts.is_empty());
        assert_eq!(session.state(), SessionState::Running);
    }

    #[derive(Debug)]
    struct Flag(Arc<AtomicBool>);

    impl Condition for Flag {
        fn test(&self, _ctx: &ConditionContext<'_>) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_wait_counter_resets_on_selection_change() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut conditions = ConditionRegistry::new();
        let shared = flag.clone();
        conditions.register("flag", move |_, _| Ok(Arc::new(Flag(shared.clone())) as ConditionRef));

        let shape = load_with(
            json!({
                "id": "a",
                "defaults": { "effect": "flame" },
                "equations": [
                    { "conditions": [ "flag" ], "frame_interval": 5 },
                    { "frame_interval": 2 }
                ]
            }),
            conditions,
        );
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();

        assert_eq!(session.tick(&mut effects), TickOutcome::Waiting { set: 0 });
        assert_eq!(session.tick(&mut effects), TickOutcome::Waiting { set: 0 });
        flag.store(false, Ordering::SeqCst);
        // A carried-over counter (3) would emit immediately.
        assert_eq!(session.tick(&mut effects), TickOutcome::Waiting { set: 1 });
        assert_eq!(
            session.tick(&mut effects),
            TickOutcome::Emitted { set: 1, bursts: 1 }
        );
        assert_eq!(session.active_set(), Some(1));
    }

    #[test]
    fn test_descent_is_clamped() {
        let fast = load(json!({ "id": "a", "equations": [ { "effect": "flame", "speed": 50 } ] }));
        let still = load(json!({ "id": "b", "equations": [ { "effect": "flame", "speed": 0 } ] }));
        let settings = SessionSettings::default();
        let mut effects = RecordingEffects::new();

        let mut session = AnimationSession::new(fast, DVec3::ZERO, settings.clone());
        session.tick(&mut effects);
        assert!((session.position().y + settings.max_descent).abs() < EPS);

        let mut session = AnimationSession::new(still, DVec3::ZERO, settings.clone());
        session.tick(&mut effects);
        assert!((session.position().y + settings.min_descent).abs() < EPS);
    }

    #[test]
    fn test_should_stop_on_reaching_floor() {
        let shape = load(json!({ "id": "a", "start_height": 3, "equations": [ { "effect": "flame", "speed": 1 } ] }));
        let mut session = AnimationSession::new(shape, DVec3::ZERO, SessionSettings::default());
        let terrain = FlatFloor { floor_y: 0.0 };
        let mut effects = RecordingEffects::new();

        let mut ticks = 0;
        while !session.should_stop(&terrain) {
            session.tick(&mut effects);
            ticks += 1;
            assert!(ticks < 100, "session never reached the floor");
        }
        assert_eq!(ticks, 3);
        assert_eq!(effects.bursts.len(), 3);
        // The session itself keeps running until the owner stops it.
        assert_eq!(session.state(), SessionState::Running);
        session.stop();
        assert_eq!(session.tick(&mut effects), TickOutcome::Stopped);
        assert_eq!(effects.bursts.len(), 3);
    }

    #[test]
    fn test_terminal_markers_come_from_settings() {
        struct Water;
        impl Terrain for Water {
            fn region_type_at(&self, _position: DVec3) -> RegionMarker {
                RegionMarker::Liquid
            }
        }

        let shape = load(json!({ "id": "a", "equations": [ { "effect": "flame" } ] }));
        let dry = session(shape.clone());
        assert!(!dry.should_stop(&Water));

        let settings = SessionSettings {
            terminal_markers: vec![RegionMarker::Solid, RegionMarker::Liquid],
            ..SessionSettings::default()
        };
        let wet = AnimationSession::new(shape, DVec3::ZERO, settings);
        assert!(wet.should_stop(&Water));
    }

    #[test]
    fn test_numeric_anomalies_still_emit() {
        let shape = load(json!({ "id": "a", "equations": [ { "effect": "flame", "x": "1/0", "z": "log 0" } ] }));
        let mut session = session(shape);
        let mut effects = RecordingEffects::new();
        assert!(matches!(session.tick(&mut effects), TickOutcome::Emitted { .. }));
        assert!(effects.bursts[0].position[0].is_infinite());
        assert!(effects.bursts[0].position[2].is_nan());
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_definitions_are_shareable_across_threads() {
        assert_send_sync::<ShapeDefinition>();
        assert_send_sync::<crate::shape::ShapeRegistry>();
        assert_send_sync::<crate::expression::Expression>();
        assert_send_sync::<crate::condition::ConditionRef>();

        let shape = load(json!({ "id": "a", "equations": [ { "effect": "flame", "x": "t * 2" } ] }));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shape = shape.clone();
                std::thread::spawn(move || {
                    let mut session = session(shape);
                    let mut effects = RecordingEffects::new();
                    for _ in 0..3 {
                        session.tick(&mut effects);
                    }
                    effects.bursts.last().map(|b| b.position[0])
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(6.0));
        }
    }

    #[test]
    fn test_shared_shape_drives_independent_sessions() {
        let shape = load(json!({ "id": "a", "equations": [ { "effect": "flame", "x": "t" } ] }));
        let mut a = session(shape.clone());
        let mut b = session(shape);
        let mut effects = RecordingEffects::new();
        a.tick(&mut effects);
        a.tick(&mut effects);
        b.tick(&mut effects);
        assert_eq!(a.tick_count(), 2);
        assert_eq!(b.tick_count(), 1);
    }
}
