//! Named unary operators available to formulas.
//!
//! A `FunctionRegistry` is an owned table handed to the parser. Parsing borrows
//! it immutably, so every parse sees a stable snapshot; registration needs
//! `&mut` and therefore cannot overlap with a parse. Names are never removed or
//! overwritten.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A unary numeric operator.
///
/// Operators are shared into every expression that references them, so they
/// must be `Send + Sync` and free of mutable state.
#[derive(Clone)]
pub struct UnaryFn(Arc<dyn Fn(f64) -> f64 + Send + Sync>);

impl UnaryFn {
    pub fn new(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn apply(&self, value: f64) -> f64 {
        (self.0)(value)
    }
}

impl fmt::Debug for UnaryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnaryFn")
    }
}

/// Name → operator table.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, UnaryFn>,
}

impl FunctionRegistry {
    /// Create a registry with no functions at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the built-in operators.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin_functions();
        registry
    }

    fn register_builtin_functions(&mut self) {
        // Trig operates in degrees.
        self.register("sqrt", f64::sqrt);
        self.register("abs", f64::abs);
        self.register("log", |v| if v <= 0.0 { f64::NAN } else { v.ln() });
        self.register("sin", |v| v.to_radians().sin());
        self.register("cos", |v| v.to_radians().cos());
        self.register("tan", |v| v.to_radians().tan());
        self.register("csc", |v| 1.0 / v.to_radians().sin());
        self.register("sec", |v| 1.0 / v.to_radians().cos());
        self.register("cot", |v| 1.0 / v.to_radians().tan());
        self.register("rad", f64::to_radians);
        self.register("deg", f64::to_degrees);
    }

    /// Register a new operator.
    ///
    /// Returns false, leaving the existing mapping untouched, if `name` is
    /// already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(f64) -> f64 + Send + Sync + 'static,
    ) -> bool {
        let name = name.into();
        if self.functions.contains_key(&name) {
            log::warn!("Function '{}' is already registered, ignoring", name);
            return false;
        }
        self.functions.insert(name, UnaryFn::new(f));
        true
    }

    /// Look up an operator by name.
    pub fn get(&self, name: &str) -> Option<&UnaryFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
