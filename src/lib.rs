// Formula evaluation
pub mod function_registry;
pub mod variables;
pub mod expression;
pub mod expression_parser;

// Shape definitions
pub mod condition;
pub mod effect;
pub mod equation_set;
pub mod shape;
pub mod shape_loader;

// Runtime
pub mod config;
pub mod session;

pub mod cli;

pub use condition::{ConditionContext, ConditionRegistry};
pub use config::{EngineConfig, RegionMarker, SessionSettings};
pub use effect::{EffectCatalog, EffectSink};
pub use expression::Expression;
pub use expression_parser::{ExpressionParser, ParseError};
pub use function_registry::FunctionRegistry;
pub use session::{AnimationSession, TickOutcome, Terrain};
pub use shape::{ShapeDefinition, ShapeRegistry};
pub use shape_loader::{JsonFileSource, LoadError, ShapeLoader};
pub use variables::VariableContext;
