//! Shape document loading.
//!
//! A shape document is a JSON object:
//!
//! ```json
//! {
//!   "id": "spiral",
//!   "start_height": 6.0,
//!   "defaults": { "effect": "flame", "speed": 0.1, "theta_step": 10 },
//!   "equations": [
//!     { "x": "2 * cos theta", "z": "2 * sin theta", "streams": 3,
//!       "conditions": [ { "type": "compare", "value": "t", "operator": "less_than", "than": 40 } ] }
//!   ]
//! }
//! ```
//!
//! Animation parameters resolve in three layers: the equation set's own value,
//! then `defaults`, then the built-in default. `effect` has no built-in default.
//! A missing `start_height` is 0.0.
//! Every problem is reported with the path of the offending field and aborts
//! the whole definition.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use glam::DVec3;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::condition::{ConditionError, ConditionRef, ConditionRegistry};
use crate::effect::{EffectCatalog, EffectId, EffectParams};
use crate::equation_set::{AnimationParams, EquationSet};
use crate::expression::Expression;
use crate::expression_parser::{ExpressionParser, ParseError};
use crate::function_registry::FunctionRegistry;
use crate::shape::{ShapeDefinition, ShapeRegistry};

const TOP_LEVEL_KEYS: &[&str] = &["id", "start_height", "defaults", "equations"];
const PARAM_KEYS: &[&str] = &[
    "effect",
    "count",
    "offset",
    "extra",
    "streams",
    "speed",
    "frame_interval",
    "theta_step",
];
const FORMULA_KEYS: &[&str] = &["x", "z", "conditions"];

/// Built-in defaults for parameters missing from both layers.
const DEFAULT_COUNT: u32 = 1;
const DEFAULT_EXTRA: f64 = 0.0;
const DEFAULT_STREAMS: u32 = 1;
const DEFAULT_SPEED: f64 = 1.0;
const DEFAULT_FRAME_INTERVAL: u32 = 0;
const DEFAULT_THETA_STEP: f64 = 0.0;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("{field}: {message}")]
    Field { field: String, message: String },
    #[error("{field}: invalid expression {expression:?} {source}")]
    Expression {
        field: String,
        expression: String,
        source: ParseError,
    },
    #[error("{field}: {source}")]
    Condition {
        field: String,
        source: ConditionError,
    },
    #[error("{field}: unknown effect '{name}'")]
    UnknownEffect { field: String, name: String },
    #[error("shape '{0}' is already registered")]
    DuplicateShape(String),
}

impl LoadError {
    fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Materialises a structured document from a path.
pub trait DocumentSource {
    fn load_document(&self, path: &Path) -> Result<Value, LoadError>;
}

/// Reads JSON files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileSource;

impl DocumentSource for JsonFileSource {
    fn load_document(&self, path: &Path) -> Result<Value, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Outcome of loading a directory of documents.
#[derive(Debug, Default)]
pub struct DirLoadReport {
    /// Ids registered, in file-name order.
    pub loaded: Vec<String>,
    /// Files that were rejected and why.
    pub failed: Vec<(PathBuf, LoadError)>,
}

impl DirLoadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Builds shape definitions against a set of registries.
#[derive(Clone, Copy)]
pub struct ShapeLoader<'a> {
    parser: ExpressionParser<'a>,
    conditions: &'a ConditionRegistry,
    effects: &'a EffectCatalog,
}

impl<'a> ShapeLoader<'a> {
    pub fn new(
        functions: &'a FunctionRegistry,
        conditions: &'a ConditionRegistry,
        effects: &'a EffectCatalog,
    ) -> Self {
        Self {
            parser: ExpressionParser::new(functions),
            conditions,
            effects,
        }
    }

    /// Parse a document held in a string.
    pub fn load_str(&self, text: &str) -> Result<ShapeDefinition, LoadError> {
        let doc: Value = serde_json::from_str(text)?;
        self.load_value(&doc)
    }

    /// Build a definition from an already materialised document.
    pub fn load_value(&self, doc: &Value) -> Result<ShapeDefinition, LoadError> {
        let root = Section::root(doc)?;
        root.reject_unknown(&[TOP_LEVEL_KEYS])?;

        let id = root
            .str("id")?
            .ok_or_else(|| LoadError::field("id", "required"))?;
        if !shape_id_pattern().is_match(id) {
            return Err(LoadError::field(
                "id",
                format!(
                    "'{}' must start with a lowercase letter or digit and contain only [a-z0-9_-]",
                    id
                ),
            ));
        }

        let start_height = root.f64("start_height")?.unwrap_or(0.0);
        if start_height < 0.0 {
            return Err(LoadError::field(
                "start_height",
                format!("must not be negative, got {}", start_height),
            ));
        }

        let defaults = match root.get("defaults") {
            Some(value) => {
                let section = Section::nested(value, "defaults".to_string())?;
                section.reject_unknown(&[PARAM_KEYS])?;
                self.read_params(&section)?
            }
            None => RawParams::default(),
        };

        let equations = root
            .get("equations")
            .ok_or_else(|| LoadError::field("equations", "required"))?
            .as_array()
            .ok_or_else(|| LoadError::field("equations", "expected an array"))?;
        if equations.is_empty() {
            return Err(LoadError::field(
                "equations",
                "at least one equation set is required",
            ));
        }

        let mut sets = Vec::with_capacity(equations.len());
        for (index, entry) in equations.iter().enumerate() {
            sets.push(self.read_equation_set(entry, index, &defaults)?);
        }

        ShapeDefinition::new(id, start_height, sets).map_err(|message| LoadError::field("id", message))
    }

    /// Load one document through `source`.
    pub fn load_path(
        &self,
        source: &dyn DocumentSource,
        path: &Path,
    ) -> Result<ShapeDefinition, LoadError> {
        let doc = source.load_document(path)?;
        self.load_value(&doc)
    }

    /// Load one document and register it. Nothing is registered on failure.
    pub fn load_into(
        &self,
        registry: &mut ShapeRegistry,
        source: &dyn DocumentSource,
        path: &Path,
    ) -> Result<String, LoadError> {
        let shape = self.load_path(source, path)?;
        let id = shape.id().to_string();
        if !registry.register(shape) {
            return Err(LoadError::DuplicateShape(id));
        }
        log::debug!("Registered shape '{}' from {:?}", id, path);
        Ok(id)
    }

    /// Load every `*.json` file in `dir`, in file-name order.
    ///
    /// A broken file is reported and skipped; it never stops the others.
    pub fn load_dir(
        &self,
        registry: &mut ShapeRegistry,
        source: &dyn DocumentSource,
        dir: &Path,
    ) -> Result<DirLoadReport, LoadError> {
        let entries = std::fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LoadError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut report = DirLoadReport::default();
        for path in paths {
            match self.load_into(registry, source, &path) {
                Ok(id) => report.loaded.push(id),
                Err(e) => {
                    log::warn!("Rejected shape document {:?}: {}", path, e);
                    report.failed.push((path, e));
                }
            }
        }

        log::info!(
            "Loaded {} shape(s) from {:?} ({} rejected)",
            report.loaded.len(),
            dir,
            report.failed.len()
        );
        Ok(report)
    }

    fn read_equation_set(
        &self,
        entry: &Value,
        index: usize,
        defaults: &RawParams,
    ) -> Result<EquationSet, LoadError> {
        let section = Section::nested(entry, format!("equations[{}]", index))?;
        section.reject_unknown(&[FORMULA_KEYS, PARAM_KEYS])?;

        let x = self.read_formula(&section, "x")?;
        let z = self.read_formula(&section, "z")?;
        let conditions = self.read_conditions(&section)?;
        let params = self.read_params(&section)?.layered_over(defaults);
        let params = params.resolve(&section.path)?;

        Ok(EquationSet::new(x, z, conditions, params))
    }

    fn read_formula(&self, section: &Section<'_>, key: &str) -> Result<Expression, LoadError> {
        let Some(source) = section.get(key) else {
            return Ok(Expression::constant(0.0));
        };
        let field = section.field(key);
        let text = match source {
            Value::String(s) => s.clone(),
            Value::Number(n) => {
                return n
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .map(Expression::constant)
                    .ok_or_else(|| LoadError::field(field, "expected a finite number"));
            }
            _ => return Err(LoadError::field(field, "expected a formula string")),
        };
        self.parser
            .parse(&text)
            .map_err(|source| LoadError::Expression {
                field,
                expression: text,
                source,
            })
    }

    fn read_conditions(&self, section: &Section<'_>) -> Result<Vec<ConditionRef>, LoadError> {
        let Some(value) = section.get("conditions") else {
            return Ok(vec![self.conditions.always()]);
        };
        let field = section.field("conditions");
        let items = value
            .as_array()
            .ok_or_else(|| LoadError::field(field.clone(), "expected an array"))?;

        let empty = Value::Object(Map::new());
        let mut conditions = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let item_field = format!("{}[{}]", field, i);
            let (name, params) = match item {
                Value::String(name) => (name.as_str(), &empty),
                Value::Object(map) => {
                    let name = map.get("type").and_then(Value::as_str).ok_or_else(|| {
                        LoadError::field(format!("{}.type", item_field), "required string")
                    })?;
                    (name, item)
                }
                _ => {
                    return Err(LoadError::field(
                        item_field,
                        "expected a condition name or object",
                    ))
                }
            };
            let condition = self
                .conditions
                .create(name, params)
                .map_err(|source| LoadError::Condition {
                    field: item_field,
                    source,
                })?;
            conditions.push(condition);
        }
        Ok(conditions)
    }

    fn read_params(&self, section: &Section<'_>) -> Result<RawParams, LoadError> {
        let effect = match section.str("effect")? {
            Some(name) => {
                let field = section.field("effect");
                let id = self
                    .effects
                    .resolve(name)
                    .ok_or_else(|| LoadError::UnknownEffect {
                        field,
                        name: name.to_string(),
                    })?;
                Some(id)
            }
            None => None,
        };

        let streams = section.u32("streams")?;
        if streams == Some(0) {
            return Err(LoadError::field(section.field("streams"), "must be at least 1"));
        }

        Ok(RawParams {
            effect,
            count: section.u32("count")?,
            offset: section.vec3("offset")?,
            extra: section.f64("extra")?,
            streams,
            speed: section.f64("speed")?,
            frame_interval: section.u32("frame_interval")?,
            theta_step: section.f64("theta_step")?,
        })
    }
}

fn shape_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").expect("valid shape id pattern"))
}

/// Parameters as written in one layer; `None` means "not given here".
#[derive(Debug, Clone, Default)]
struct RawParams {
    effect: Option<EffectId>,
    count: Option<u32>,
    offset: Option<DVec3>,
    extra: Option<f64>,
    streams: Option<u32>,
    speed: Option<f64>,
    frame_interval: Option<u32>,
    theta_step: Option<f64>,
}

impl RawParams {
    /// Fill every missing value from `fallback`.
    fn layered_over(self, fallback: &RawParams) -> RawParams {
        RawParams {
            effect: self.effect.or_else(|| fallback.effect.clone()),
            count: self.count.or(fallback.count),
            offset: self.offset.or(fallback.offset),
            extra: self.extra.or(fallback.extra),
            streams: self.streams.or(fallback.streams),
            speed: self.speed.or(fallback.speed),
            frame_interval: self.frame_interval.or(fallback.frame_interval),
            theta_step: self.theta_step.or(fallback.theta_step),
        }
    }

    fn resolve(self, path: &str) -> Result<AnimationParams, LoadError> {
        let effect = self.effect.ok_or_else(|| {
            LoadError::field(
                format!("{}.effect", path),
                "no effect given here or in defaults",
            )
        })?;
        Ok(AnimationParams {
            effect: EffectParams {
                effect,
                count: self.count.unwrap_or(DEFAULT_COUNT),
                offset: self.offset.unwrap_or(DVec3::ZERO),
                extra: self.extra.unwrap_or(DEFAULT_EXTRA),
            },
            streams: self.streams.unwrap_or(DEFAULT_STREAMS),
            speed: self.speed.unwrap_or(DEFAULT_SPEED),
            frame_interval: self.frame_interval.unwrap_or(DEFAULT_FRAME_INTERVAL),
            theta_step: self.theta_step.unwrap_or(DEFAULT_THETA_STEP),
        })
    }
}

/// A JSON object plus the path used in error messages.
struct Section<'v> {
    path: String,
    map: &'v Map<String, Value>,
}

impl<'v> Section<'v> {
    fn root(value: &'v Value) -> Result<Self, LoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| LoadError::field("<document>", "expected an object"))?;
        Ok(Self {
            path: String::new(),
            map,
        })
    }

    fn nested(value: &'v Value, path: String) -> Result<Self, LoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| LoadError::field(path.clone(), "expected an object"))?;
        Ok(Self { path, map })
    }

    fn field(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", self.path, key)
        }
    }

    fn get(&self, key: &str) -> Option<&'v Value> {
        self.map.get(key)
    }

    fn reject_unknown(&self, allowed: &[&[&str]]) -> Result<(), LoadError> {
        for key in self.map.keys() {
            if !allowed.iter().any(|keys| keys.contains(&key.as_str())) {
                return Err(LoadError::field(self.field(key), "unknown field"));
            }
        }
        Ok(())
    }

    fn str(&self, key: &str) -> Result<Option<&'v str>, LoadError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(LoadError::field(self.field(key), "expected a string")),
        }
    }

    fn f64(&self, key: &str) -> Result<Option<f64>, LoadError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .map(Some)
                .ok_or_else(|| LoadError::field(self.field(key), "expected a number")),
        }
    }

    fn u32(&self, key: &str) -> Result<Option<u32>, LoadError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| {
                    LoadError::field(self.field(key), "expected a non-negative integer")
                }),
        }
    }

    fn vec3(&self, key: &str) -> Result<Option<DVec3>, LoadError> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let invalid = || LoadError::field(self.field(key), "expected an array of three numbers");
        let items = value.as_array().ok_or_else(invalid)?;
        if items.len() != 3 {
            return Err(invalid());
        }
        let mut out = [0.0; 3];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = item.as_f64().filter(|v| v.is_finite()).ok_or_else(invalid)?;
        }
        Ok(Some(DVec3::from_array(out)))
    }
}
