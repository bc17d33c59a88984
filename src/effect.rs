//! Visual effect types and the emission boundary.
//!
//! Shape documents name effects by string. The [`EffectCatalog`] lists the
//! names the host can actually spawn; loading resolves every name against it
//! so an unknown effect is caught before any session runs.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use glam::DVec3;
use serde::Serialize;

/// Effect names available out of the box.
const BUILTIN_EFFECTS: &[&str] = &[
    "cloud",
    "crit",
    "dragon_breath",
    "dust",
    "enchant",
    "end_rod",
    "flame",
    "happy_villager",
    "heart",
    "note",
    "portal",
    "smoke",
    "soul_fire_flame",
    "spell_witch",
    "totem_of_undying",
];

/// A resolved effect name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(Arc<str>);

impl EffectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EffectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EffectId({})", self.0)
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for EffectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Set of effect names the host can spawn.
#[derive(Debug, Clone, Default)]
pub struct EffectCatalog {
    effects: BTreeSet<EffectId>,
}

impl EffectCatalog {
    /// Catalog seeded with the built-in effect names.
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        for name in BUILTIN_EFFECTS {
            catalog.register(name);
        }
        catalog
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Add an effect name. Returns false if it was already known.
    pub fn register(&mut self, name: &str) -> bool {
        self.effects.insert(EffectId(Arc::from(name)))
    }

    /// Resolve a name to its shared id.
    pub fn resolve(&self, name: &str) -> Option<EffectId> {
        self.effects.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.effects.iter().map(EffectId::as_str)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }
}

/// Per-burst emission parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectParams {
    pub effect: EffectId,
    pub count: u32,
    /// Random spread handed to the host on each axis.
    pub offset: DVec3,
    /// Effect-specific extra value (usually speed).
    pub extra: f64,
}

/// Receives effect bursts. Emission is fire-and-forget.
pub trait EffectSink {
    fn spawn_effect(&mut self, params: &EffectParams, position: DVec3);
}

/// One recorded burst.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectBurst {
    pub effect: EffectId,
    pub position: [f64; 3],
    pub count: u32,
    pub offset: [f64; 3],
    pub extra: f64,
}

/// Sink that keeps every burst in memory.
#[derive(Debug, Default)]
pub struct RecordingEffects {
    pub bursts: Vec<EffectBurst>,
}

impl RecordingEffects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&mut self) -> Vec<EffectBurst> {
        std::mem::take(&mut self.bursts)
    }
}

impl EffectSink for RecordingEffects {
    fn spawn_effect(&mut self, params: &EffectParams, position: DVec3) {
        self.bursts.push(EffectBurst {
            effect: params.effect.clone(),
            position: position.to_array(),
            count: params.count,
            offset: params.offset.to_array(),
            extra: params.extra,
        });
    }
}
