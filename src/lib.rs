//! A declarative rule evaluation engine.
//!
//! A specification describes one law or policy as declarations: typed
//! inputs and sources, named definitions, gating requirements, and output
//! actions built from a small operation language (arithmetic, comparison,
//! logical, conditional, date). [`Engine::evaluate`] runs a specification
//! against caller-supplied context and returns its outputs together with a
//! full execution trace.
//!
//! # Example
//!
//! ```ignore
//! use policy_engine::{Engine, EvaluateOptions, Specification};
//!
//! # async fn run() -> policy_engine::error::Result<()> {
//! let yaml = r#"
//! service: demo
//! law: demo-law
//! properties:
//!   output:
//!     - name: total
//! actions:
//!   - output: total
//!     operation: ADD
//!     values: [30, 80]
//! "#;
//! let spec = Specification::from_yaml_str(yaml)?;
//! let engine = Engine::new(spec);
//! let result = engine.evaluate(EvaluateOptions::default()).await?;
//! assert_eq!(result.output["total"].value, policy_engine::types::Value::Float(100.0));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod operations;
pub mod service;
pub mod spec;
pub mod trace;
pub mod types;

pub use context::{PropertyBinding, RuleContext};
pub use engine::{ActionOutput, Engine, EvaluateOptions, EvaluationResult};
pub use error::{EngineError, Result};
pub use operations::{evaluate_operation, evaluate_value};
pub use service::{NullServiceProvider, ServiceProvider, StaticServiceProvider};
pub use spec::{
    Action, ActionValue, IfCondition, OperationNode, OutputSpec, Properties, PropertySpec,
    Requirement, ServiceReference, SourcePropertySpec, SourceReference, Specification,
    ValuesField,
};
pub use trace::{PathKind, PathNode, TraceBuilder, TraceGuard};
pub use types::{TypeSpec, Value};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
