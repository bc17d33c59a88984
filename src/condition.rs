//! Guard conditions for equation sets.
//!
//! A condition is an immutable predicate over a [`ConditionContext`]. Shape
//! documents name conditions by string; the [`ConditionRegistry`] maps each
//! name to a factory that builds the predicate from the entry's parameters at
//! load time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::DVec3;
use serde_json::Value;
use thiserror::Error;

use crate::variables::{Variable, VariableContext};

/// Everything a condition may look at.
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub variables: &'a VariableContext,
    /// Current tracked position.
    pub position: DVec3,
    /// Position the session started from (origin raised by the start height).
    pub start: DVec3,
}

impl<'a> ConditionContext<'a> {
    pub fn new(variables: &'a VariableContext, position: DVec3, start: DVec3) -> Self {
        Self {
            variables,
            position,
            start,
        }
    }
}

/// An immutable predicate.
pub trait Condition: Send + Sync + fmt::Debug {
    fn test(&self, ctx: &ConditionContext<'_>) -> bool;
}

/// Shared handle to a condition.
pub type ConditionRef = Arc<dyn Condition>;

/// Builds a condition from its name and parameters.
pub type ConditionFactory =
    Arc<dyn Fn(&str, &Value) -> Result<ConditionRef, String> + Send + Sync>;

/// Matches unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysCondition;

impl Condition for AlwaysCondition {
    fn test(&self, _ctx: &ConditionContext<'_>) -> bool {
        true
    }
}

/// Value a comparison reads from the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextValue {
    Variable(Variable),
    /// Vertical distance travelled below the start position.
    Descended,
}

impl ContextValue {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "descended" => Some(ContextValue::Descended),
            "tick" => Some(ContextValue::Variable(Variable::T)),
            other => Variable::from_name(other).map(ContextValue::Variable),
        }
    }

    pub fn read(&self, ctx: &ConditionContext<'_>) -> f64 {
        match self {
            ContextValue::Variable(var) => ctx.variables.get(*var),
            ContextValue::Descended => ctx.start.y - ctx.position.y,
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    LessThan,
    GreaterThan,
    EqualTo,
}

impl Comparison {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "less_than" => Some(Comparison::LessThan),
            "greater_than" => Some(Comparison::GreaterThan),
            "equal_to" => Some(Comparison::EqualTo),
            _ => None,
        }
    }

    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::LessThan => lhs < rhs,
            Comparison::GreaterThan => lhs > rhs,
            Comparison::EqualTo => lhs == rhs,
        }
    }
}

/// `value <operator> than`.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonCondition {
    pub value: ContextValue,
    pub operator: Comparison,
    pub than: f64,
}

impl ComparisonCondition {
    pub fn new(value: ContextValue, operator: Comparison, than: f64) -> Self {
        Self {
            value,
            operator,
            than,
        }
    }

    /// Build from `{"value": "y", "operator": "less_than", "than": 3}`.
    pub fn from_params(params: &Value) -> Result<Self, String> {
        let value_name = params
            .get("value")
            .and_then(Value::as_str)
            .ok_or("missing string parameter 'value'")?;
        let value = ContextValue::from_name(value_name)
            .ok_or_else(|| format!("unknown context value '{}'", value_name))?;

        let op_name = params
            .get("operator")
            .and_then(Value::as_str)
            .ok_or("missing string parameter 'operator'")?;
        let operator = Comparison::from_name(op_name).ok_or_else(|| {
            format!(
                "unknown operator '{}' (expected less_than, greater_than or equal_to)",
                op_name
            )
        })?;

        let than = params
            .get("than")
            .and_then(Value::as_f64)
            .ok_or("missing numeric parameter 'than'")?;

        Ok(Self::new(value, operator, than))
    }
}

impl Condition for ComparisonCondition {
    fn test(&self, ctx: &ConditionContext<'_>) -> bool {
        self.operator.compare(self.value.read(ctx), self.than)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition '{0}' is not registered")]
    NotFound(String),
    #[error("condition '{name}': {message}")]
    Invalid { name: String, message: String },
}

/// Name → factory table.
pub struct ConditionRegistry {
    factories: HashMap<String, ConditionFactory>,
    always: ConditionRef,
}

impl ConditionRegistry {
    /// Create a registry with the built-in `always` and `compare` conditions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin_conditions();
        registry
    }

    /// Create a registry with no factories.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            always: Arc::new(AlwaysCondition),
        }
    }

    fn register_builtin_conditions(&mut self) {
        let always = self.always.clone();
        self.register("always", move |_, _| Ok(always.clone()));
        self.register("compare", |_, params| {
            Ok(Arc::new(ComparisonCondition::from_params(params)?) as ConditionRef)
        });
    }

    /// The shared always-true condition.
    pub fn always(&self) -> ConditionRef {
        self.always.clone()
    }

    /// Register a factory. Returns false if `name` is taken; the existing
    /// factory is kept.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&str, &Value) -> Result<ConditionRef, String> + Send + Sync + 'static,
    ) -> bool {
        let name = name.into();
        if self.factories.contains_key(&name) {
            log::warn!("Condition '{}' is already registered, ignoring", name);
            return false;
        }
        self.factories.insert(name, Arc::new(factory));
        true
    }

    pub fn get(&self, name: &str) -> Option<&ConditionFactory> {
        self.factories.get(name)
    }

    /// Build a condition by name.
    pub fn create(&self, name: &str, params: &Value) -> Result<ConditionRef, ConditionError> {
        let factory = self
            .get(name)
            .ok_or_else(|| ConditionError::NotFound(name.to_string()))?;
        factory(name, params).map_err(|message| ConditionError::Invalid {
            name: name.to_string(),
            message,
        })
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionRegistry")
            .field("names", &self.names())
            .finish()
    }
}
