//! Engine configuration.
//!
//! Loaded from a JSON file; every field has a default so an empty object is a
//! valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default lower clamp for downward movement per frame.
fn default_min_descent() -> f64 {
    0.01
}

/// Default upper clamp for downward movement per frame.
fn default_max_descent() -> f64 {
    2.0
}

fn default_terminal_markers() -> Vec<RegionMarker> {
    vec![RegionMarker::Solid]
}

/// What occupies a position, as reported by the host world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionMarker {
    Empty,
    Solid,
    Liquid,
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Minimum downward movement per emitted frame.
    #[serde(default = "default_min_descent")]
    pub min_descent_per_frame: f64,

    /// Maximum downward movement per emitted frame.
    #[serde(default = "default_max_descent")]
    pub max_descent_per_frame: f64,

    /// Markers that end an animation when the tracked position enters them.
    #[serde(default = "default_terminal_markers")]
    pub terminal_markers: Vec<RegionMarker>,

    /// Seed for the `random` variable. 0 selects the built-in seed.
    #[serde(default)]
    pub random_seed: u64,

    /// Directory of shape documents.
    #[serde(default)]
    pub shapes_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_descent_per_frame: default_min_descent(),
            max_descent_per_frame: default_max_descent(),
            terminal_markers: default_terminal_markers(),
            random_seed: 0,
            shapes_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {:?}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        let (min, max) = (self.min_descent_per_frame, self.max_descent_per_frame);
        if !min.is_finite() || !max.is_finite() {
            return Err("Descent limits must be finite".to_string());
        }
        if min < 0.0 {
            return Err("Minimum descent must not be negative".to_string());
        }
        if min > max {
            return Err(format!(
                "Minimum descent ({}) is greater than maximum descent ({})",
                min, max
            ));
        }
        Ok(())
    }

    /// Settings handed to each animation session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            min_descent: self.min_descent_per_frame,
            max_descent: self.max_descent_per_frame,
            terminal_markers: self.terminal_markers.clone(),
            random_seed: self.random_seed,
        }
    }
}

/// Per-session subset of [`EngineConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub min_descent: f64,
    pub max_descent: f64,
    pub terminal_markers: Vec<RegionMarker>,
    pub random_seed: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        EngineConfig::default().session_settings()
    }
}

impl SessionSettings {
    /// Clamp a requested per-frame descent into the configured range.
    pub fn clamp_descent(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            return self.min_descent;
        }
        speed.clamp(self.min_descent, self.max_descent)
    }

    pub fn is_terminal(&self, marker: RegionMarker) -> bool {
        self.terminal_markers.contains(&marker)
    }
}
