//! Error types for the rule evaluation engine
//!
//! Per the error-handling design (§7), most data problems (unresolved
//! references, malformed operations, out-of-range output values) are
//! absorbed into the trace/value machinery rather than raised as errors —
//! the engine is a lenient evaluator. This enum carries only the genuinely
//! fatal cases: malformed date input, specification load failure, a
//! `ServiceProvider` failure, and an operation tree nested deeper than the
//! configured guard. `TypeMismatch` is used internally by the arithmetic and
//! comparison helpers and is caught at the operation dispatcher rather than
//! surfaced to callers of `evaluate`.

use thiserror::Error;

/// The engine's error type.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to load or parse a specification document.
    #[error("failed to load specification: {0}")]
    LoadError(String),

    /// YAML parse error.
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON error (used for interop with JSON-compatible hosts).
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Type mismatch encountered while coercing an operand to a number.
    ///
    /// Internal: caught by the operation dispatcher and converted into a
    /// `0` result with `details.error` set, per §7's "malformed operation"
    /// handling. Never observed by callers of `evaluate`.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Non-parseable ISO-8601 date passed to a `_DATE` operation. Fatal
    /// per §7: "parser exception propagates".
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// The configured `ServiceProvider` failed. Propagates to the caller of
    /// `evaluate`; the whole evaluation fails. No retry at this layer.
    #[error("service provider failed: {0}")]
    ServiceProviderError(String),

    /// Operation tree nested deeper than `config::MAX_OPERATION_DEPTH`.
    #[error("maximum operation nesting depth exceeded: {0} levels")]
    MaxDepthExceeded(usize),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
