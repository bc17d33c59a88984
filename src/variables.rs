//! Variable context read by expressions.
//!
//! The session refreshes the fixed slots once per frame; expressions only read
//! them. `random` is the exception: every read draws a fresh value in `[0, 1)`
//! from a deterministic xorshift64 generator owned by the context.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;

/// Default seed used when a seed of 0 is requested (xorshift is stuck at 0).
const DEFAULT_SEED: u64 = 0x5DEECE66D;

/// Built-in variable slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
    X,
    Y,
    Z,
    /// Frame counter.
    T,
    /// Angle accumulator in degrees.
    Theta,
    Random,
}

impl Variable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "x" => Some(Variable::X),
            "y" => Some(Variable::Y),
            "z" => Some(Variable::Z),
            "t" => Some(Variable::T),
            "theta" => Some(Variable::Theta),
            "random" => Some(Variable::Random),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variable::X => "x",
            Variable::Y => "y",
            Variable::Z => "z",
            Variable::T => "t",
            Variable::Theta => "theta",
            Variable::Random => "random",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mutable numeric slots for one session.
#[derive(Debug)]
pub struct VariableContext {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub t: f64,
    pub theta: f64,
    extras: HashMap<String, f64>,
    rng_state: Cell<u64>,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose `random` sequence is derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            t: 0.0,
            theta: 0.0,
            extras: HashMap::new(),
            rng_state: Cell::new(if seed == 0 { DEFAULT_SEED } else { seed }),
        }
    }

    /// Read a built-in slot. `Random` advances the generator.
    pub fn get(&self, var: Variable) -> f64 {
        match var {
            Variable::X => self.x,
            Variable::Y => self.y,
            Variable::Z => self.z,
            Variable::T => self.t,
            Variable::Theta => self.theta,
            Variable::Random => self.next_random(),
        }
    }

    /// Read a named extra slot, defaulting to 0.0 when absent.
    pub fn get_named(&self, name: &str) -> f64 {
        Variable::from_name(name)
            .map(|v| self.get(v))
            .unwrap_or_else(|| self.extras.get(name).copied().unwrap_or(0.0))
    }

    /// Set a slot by name. Built-in names write the fixed slots.
    pub fn set(&mut self, name: &str, value: f64) {
        match Variable::from_name(name) {
            Some(Variable::X) => self.x = value,
            Some(Variable::Y) => self.y = value,
            Some(Variable::Z) => self.z = value,
            Some(Variable::T) => self.t = value,
            Some(Variable::Theta) => self.theta = value,
            Some(Variable::Random) => {}
            None => {
                self.extras.insert(name.to_string(), value);
            }
        }
    }

    /// Refresh the per-frame slots in one go.
    pub fn refresh(&mut self, position: glam::DVec3, tick: u64, theta: f64) {
        self.x = position.x;
        self.y = position.y;
        self.z = position.z;
        self.t = tick as f64;
        self.theta = theta;
    }

    fn next_random(&self) -> f64 {
        let mut s = self.rng_state.get();
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.rng_state.set(s);
        // Top 53 bits give a uniform value in [0, 1).
        (s >> 11) as f64 / (1u64 << 53) as f64
    }
}
