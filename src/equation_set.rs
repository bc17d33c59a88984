//! Equation sets: one x/z formula pair, its guards and its animation parameters.

use glam::DVec3;

use crate::condition::{ConditionContext, ConditionRef};
use crate::effect::EffectParams;
use crate::expression::Expression;
use crate::variables::VariableContext;

/// Animation parameters resolved for one equation set.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationParams {
    pub effect: EffectParams,
    /// Simultaneous emission directions per frame (at least 1).
    pub streams: u32,
    /// Downward movement per frame before clamping.
    pub speed: f64,
    /// Ticks per emitted frame; 0 and 1 both emit on every tick.
    pub frame_interval: u32,
    /// Degrees added to the angle accumulator per frame.
    pub theta_step: f64,
}

/// Immutable once built.
#[derive(Debug, Clone)]
pub struct EquationSet {
    pub x: Expression,
    pub z: Expression,
    /// All must hold for the set to be selected.
    pub conditions: Vec<ConditionRef>,
    pub params: AnimationParams,
}

impl EquationSet {
    pub fn new(
        x: Expression,
        z: Expression,
        conditions: Vec<ConditionRef>,
        params: AnimationParams,
    ) -> Self {
        Self {
            x,
            z,
            conditions,
            params,
        }
    }

    /// True if every guard holds. An empty guard list always matches.
    pub fn matches(&self, ctx: &ConditionContext<'_>) -> bool {
        self.conditions.iter().all(|c| c.test(ctx))
    }

    /// Planar offset for the current variable values.
    pub fn offset(&self, variables: &VariableContext) -> DVec3 {
        DVec3::new(self.x.evaluate(variables), 0.0, self.z.evaluate(variables))
    }

    /// Angle between consecutive streams in degrees.
    pub fn stream_step(&self) -> f64 {
        360.0 / f64::from(self.params.streams.max(1))
    }
}
