//! Shape definitions and the lookup-by-id registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::condition::ConditionContext;
use crate::equation_set::EquationSet;

/// An immutable, ordered list of equation sets plus a starting height.
///
/// Declaration order is selection priority: the first set whose guards all hold
/// is the one used for a tick.
#[derive(Debug, Clone)]
pub struct ShapeDefinition {
    id: String,
    start_height: f64,
    equation_sets: Vec<EquationSet>,
}

impl ShapeDefinition {
    /// Build a definition. `start_height` must be finite and non-negative.
    pub fn new(
        id: impl Into<String>,
        start_height: f64,
        equation_sets: Vec<EquationSet>,
    ) -> Result<Self, String> {
        let id = id.into();
        if id.is_empty() {
            return Err("shape id cannot be empty".to_string());
        }
        if !start_height.is_finite() || start_height < 0.0 {
            return Err(format!(
                "start height must be a non-negative number, got {}",
                start_height
            ));
        }
        Ok(Self {
            id,
            start_height,
            equation_sets,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start_height(&self) -> f64 {
        self.start_height
    }

    pub fn equation_sets(&self) -> &[EquationSet] {
        &self.equation_sets
    }

    pub fn is_empty(&self) -> bool {
        self.equation_sets.is_empty()
    }

    /// First matching equation set and its index.
    pub fn select(&self, ctx: &ConditionContext<'_>) -> Option<(usize, &EquationSet)> {
        self.equation_sets
            .iter()
            .enumerate()
            .find(|(_, set)| set.matches(ctx))
    }
}

/// Loaded shape definitions keyed by id.
///
/// Readers share definitions through `Arc`, so a reload can build a fresh
/// registry and swap it in while running sessions keep their own definition.
#[derive(Debug, Default, Clone)]
pub struct ShapeRegistry {
    shapes: BTreeMap<String, Arc<ShapeDefinition>>,
}

impl ShapeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Returns false if the id is taken; the existing
    /// definition is kept.
    pub fn register(&mut self, shape: ShapeDefinition) -> bool {
        if self.shapes.contains_key(shape.id()) {
            log::warn!("Shape '{}' is already registered, ignoring", shape.id());
            return false;
        }
        self.shapes.insert(shape.id.clone(), Arc::new(shape));
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<ShapeDefinition>> {
        self.shapes.get(id).cloned()
    }

    /// All definitions ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ShapeDefinition>> {
        self.shapes.values()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.shapes.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
