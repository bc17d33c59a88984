use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::DVec3;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::condition::{ConditionError, ConditionRegistry};
use crate::config::EngineConfig;
use crate::effect::{EffectBurst, EffectCatalog, RecordingEffects};
use crate::function_registry::FunctionRegistry;
use crate::session::{AnimationSession, FlatFloor, TickOutcome};
use crate::shape::{ShapeDefinition, ShapeRegistry};
use crate::shape_loader::{DirLoadReport, JsonFileSource, LoadError, ShapeLoader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every shape document in a directory and report problems
    Validate {
        /// Directory of shape documents (*.json)
        dir: PathBuf,
    },

    /// Run one shape against a flat floor and print every burst as JSON
    Preview {
        /// Directory of shape documents (defaults to the config's shapes_dir)
        #[arg(long)]
        shapes: Option<PathBuf>,

        /// Id of the shape to run
        #[arg(long)]
        shape: String,

        /// Origin as X,Y,Z
        #[arg(long, value_parser = parse_vec3, default_value = "0,0,0")]
        origin: DVec3,

        /// Height of the floor that ends the animation
        #[arg(long, default_value_t = 0.0)]
        floor: f64,

        /// Give up after this many ticks
        #[arg(long, default_value_t = 2000)]
        max_ticks: u64,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { dir } => validate(&dir, &mut std::io::stdout().lock()),
        Commands::Preview {
            shapes,
            shape,
            origin,
            floor,
            max_ticks,
            config,
        } => {
            let config = match config {
                Some(path) => EngineConfig::from_file(&path).map_err(anyhow::Error::msg)?,
                None => EngineConfig::default(),
            };
            let dir = shapes
                .or_else(|| config.shapes_dir.clone())
                .context("No shape directory given (use --shapes or set shapes_dir in the config)")?;

            let (registry, _) = Registries::builtin().load_shapes(&dir)?;
            let definition = registry
                .get(&shape)
                .with_context(|| format!("Shape '{}' not found in {:?}", shape, dir))?;

            let stdout = std::io::stdout();
            let summary = preview(
                definition,
                &config,
                origin,
                floor,
                max_ticks,
                &mut stdout.lock(),
            )?;
            eprintln!(
                "{} tick(s), {} frame(s), {} burst(s), final position {:?}{}",
                summary.ticks,
                summary.frames,
                summary.bursts,
                summary.final_position,
                if summary.reached_end { "" } else { " (tick limit reached)" }
            );
            Ok(())
        }
    }
}

/// Registries every command loads shapes against.
struct Registries {
    functions: FunctionRegistry,
    conditions: ConditionRegistry,
    effects: EffectCatalog,
}

impl Registries {
    fn builtin() -> Self {
        Self {
            functions: FunctionRegistry::new(),
            conditions: ConditionRegistry::new(),
            effects: EffectCatalog::new(),
        }
    }

    fn load_shapes(&self, dir: &Path) -> Result<(ShapeRegistry, DirLoadReport)> {
        let loader = ShapeLoader::new(&self.functions, &self.conditions, &self.effects);
        let mut registry = ShapeRegistry::new();
        let report = loader
            .load_dir(&mut registry, &JsonFileSource, dir)
            .with_context(|| format!("Failed to load shapes from {:?}", dir))?;
        Ok((registry, report))
    }

    /// Extra line pointing at the valid names for an unknown effect or condition.
    fn hint(&self, err: &LoadError) -> Option<String> {
        match err {
            LoadError::UnknownEffect { .. } => Some(format!(
                "known effects: {}",
                self.effects.names().collect::<Vec<_>>().join(", ")
            )),
            LoadError::Condition {
                source: ConditionError::NotFound(_),
                ..
            } => Some(format!(
                "known conditions: {}",
                self.conditions.names().join(", ")
            )),
            _ => None,
        }
    }
}

fn validate(dir: &Path, out: &mut dyn Write) -> Result<()> {
    let registries = Registries::builtin();
    let (registry, report) = registries.load_shapes(dir)?;

    for id in &report.loaded {
        if let Some(shape) = registry.get(id) {
            writeln!(out, "ok {} ({} equation sets)", id, shape.equation_sets().len())?;
        }
    }
    for (path, err) in &report.failed {
        writeln!(out, "error {}: {}", path.display(), err)?;
        if let Some(hint) = registries.hint(err) {
            writeln!(out, "  {}", hint)?;
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} document(s) failed validation", report.failed.len());
    }
    Ok(())
}

/// One line of preview output.
#[derive(Serialize)]
struct PreviewLine<'a> {
    tick: u64,
    frame: u64,
    #[serde(flatten)]
    burst: &'a EffectBurst,
}

/// Totals for a finished preview.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSummary {
    pub ticks: u64,
    pub frames: u64,
    pub bursts: usize,
    pub final_position: DVec3,
    /// False when the tick limit cut the run short.
    pub reached_end: bool,
}

/// Drive a session until it should stop or `max_ticks` have run, writing each
/// burst as a JSON line.
pub fn preview(
    shape: Arc<ShapeDefinition>,
    config: &EngineConfig,
    origin: DVec3,
    floor_y: f64,
    max_ticks: u64,
    out: &mut dyn Write,
) -> Result<PreviewSummary> {
    let terrain = FlatFloor { floor_y };
    let mut session = AnimationSession::new(shape, origin, config.session_settings());
    let mut effects = RecordingEffects::new();
    let mut ticks = 0;
    let mut bursts = 0;

    while !session.should_stop(&terrain) {
        if ticks >= max_ticks {
            log::warn!(
                "Shape '{}' did not finish within {} ticks",
                session.shape().id(),
                max_ticks
            );
            break;
        }
        ticks += 1;
        if let TickOutcome::Emitted { .. } = session.tick(&mut effects) {
            for burst in effects.drain() {
                let line = PreviewLine {
                    tick: ticks,
                    frame: session.tick_count(),
                    burst: &burst,
                };
                serde_json::to_writer(&mut *out, &line)?;
                writeln!(out)?;
                bursts += 1;
            }
        }
    }

    let reached_end = session.should_stop(&terrain);
    session.stop();
    Ok(PreviewSummary {
        ticks,
        frames: session.tick_count(),
        bursts,
        final_position: session.position(),
        reached_end,
    })
}

fn parse_vec3(s: &str) -> Result<DVec3, String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid coordinate in '{}': {}", s, e))?;
    match parts.as_slice() {
        [x, y, z] => Ok(DVec3::new(*x, *y, *z)),
        _ => Err(format!("expected X,Y,Z but got '{}'", s)),
    }
}
