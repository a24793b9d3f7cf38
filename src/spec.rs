//! The specification data model: the immutable input tree the engine
//! evaluates (§3).
//!
//! A `Specification` is deserialized from YAML (or JSON, since the `Value`
//! type underlying it is JSON-compatible) into these strongly typed
//! structures. Field names are part of the external contract (§6) and are
//! matched exactly via `serde` renames where Rust naming conventions would
//! otherwise diverge (`else` is a keyword, for instance).

use crate::config;
use crate::error::{EngineError, Result};
use crate::types::{TypeSpec, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level specification for one law/policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub service: String,
    pub law: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Specification {
    /// Parse a specification from a YAML (or JSON) string (§12).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::LoadError` if `content` exceeds
    /// `config::MAX_SPEC_SIZE`, if parsing fails, or if any array in the
    /// deserialized specification exceeds `config::MAX_ARRAY_SIZE`.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.len() > config::MAX_SPEC_SIZE {
            tracing::warn!(
                size = content.len(),
                max = config::MAX_SPEC_SIZE,
                "specification exceeds size limit"
            );
            return Err(EngineError::LoadError(format!(
                "specification exceeds maximum size limit ({} bytes)",
                config::MAX_SPEC_SIZE
            )));
        }

        let spec: Self = serde_yaml::from_str(content).map_err(EngineError::YamlError)?;
        spec.validate_array_sizes()?;
        tracing::debug!(service = %spec.service, law = %spec.law, "parsed specification");
        Ok(spec)
    }

    fn validate_array_sizes(&self) -> Result<()> {
        check_array_size("requirements", self.requirements.len())?;
        check_array_size("actions", self.actions.len())?;
        check_array_size("properties.input", self.properties.input.len())?;
        check_array_size("properties.sources", self.properties.sources.len())?;
        check_array_size("properties.output", self.properties.output.len())?;
        for requirement in &self.requirements {
            requirement.validate_array_sizes()?;
        }
        for action in &self.actions {
            action.node.validate_array_sizes()?;
        }
        Ok(())
    }
}

fn check_array_size(what: &str, len: usize) -> Result<()> {
    if len > config::MAX_ARRAY_SIZE {
        return Err(EngineError::LoadError(format!(
            "too many entries in {} ({}, max {})",
            what,
            len,
            config::MAX_ARRAY_SIZE
        )));
    }
    Ok(())
}

/// The `properties` section: definitions, inputs, sources, and outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default)]
    pub definitions: HashMap<String, Value>,
    #[serde(default)]
    pub input: Vec<PropertySpec>,
    #[serde(default)]
    pub sources: Vec<SourcePropertySpec>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
}

/// One input property: a name, optionally bound to another service's field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    #[serde(default)]
    pub service_reference: Option<ServiceReference>,
    #[serde(default)]
    pub temporal: Option<Value>,
}

/// A binding to a field produced by another law, resolved via a
/// [`crate::service::ServiceProvider`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReference {
    pub service: String,
    pub law: String,
    pub field: String,
}

/// One materialized source property: a name, optionally bound to a
/// `(table, field)` location in the caller-supplied `sources` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePropertySpec {
    pub name: String,
    #[serde(default)]
    pub source_reference: Option<SourceReference>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub table: String,
    pub field: String,
}

/// One declared output: its name, declared type, description, and
/// [`TypeSpec`] constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub output_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub temporal: Option<Value>,
}

/// A gating condition (§4.5): `{all: [...]}`, `{or: [...]}`, or a plain
/// operation tree evaluated for truthiness.
///
/// `#[serde(untagged)]` tries each variant in order; `All`/`Or` only match
/// documents carrying their respective key, so any other object falls
/// through to `Test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Requirement {
    All { all: Vec<Requirement> },
    Or { or: Vec<Requirement> },
    Test(OperationNode),
}

impl Requirement {
    fn validate_array_sizes(&self) -> Result<()> {
        match self {
            Requirement::All { all } => {
                check_array_size("all", all.len())?;
                all.iter().try_for_each(Requirement::validate_array_sizes)
            }
            Requirement::Or { or } => {
                check_array_size("or", or.len())?;
                or.iter().try_for_each(Requirement::validate_array_sizes)
            }
            Requirement::Test(node) => node.validate_array_sizes(),
        }
    }
}

/// A value that is either a literal/reference or a nested operation tree.
///
/// `Operation` is tried first, but this is safe because a bare literal
/// (number, string, `$reference`, list) never carries an `operation` key and
/// so falls through to `Literal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Operation(Box<OperationNode>),
    Literal(Value),
}

/// One branch of an `IF` operation's `conditions` list (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IfCondition {
    Test { test: ActionValue, then: ActionValue },
    Else {
        #[serde(rename = "else")]
        else_branch: ActionValue,
    },
}

/// The shape of an operation's `values` field: either a YAML list, or a
/// singleton (a `$reference`, a nested operation, or a bare scalar).
///
/// `List` is tried first, since list syntax never parses as a singleton.
/// `AND`/`OR`/arithmetic/`_DATE` operations always treat `values` as a list
/// (a bare singleton is promoted to a one-element one); `IN` instead treats
/// the whole field as one unit, matching the original's singleton-or-list
/// `values` handling (§4.4) — a `$reference` there may itself resolve to a
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValuesField {
    List(Vec<ActionValue>),
    Single(Box<ActionValue>),
}

impl ValuesField {
    /// Element-wise view used by operations that iterate `values` as a list.
    pub fn as_elements(&self) -> Vec<&ActionValue> {
        match self {
            ValuesField::List(items) => items.iter().collect(),
            ValuesField::Single(v) => vec![v.as_ref()],
        }
    }
}

/// An operation tree: the generic shape shared by requirements, action
/// bodies, and nested operation arguments. `operation` is the dispatch key
/// (§4.4); the remaining fields are populated according to which kind it
/// names. Absence of `operation` alongside a `value` field means "direct
/// value passthrough" (§4.4's first table row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationNode {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub subject: Option<ActionValue>,
    #[serde(default)]
    pub value: Option<ActionValue>,
    #[serde(default)]
    pub values: Option<ValuesField>,
    #[serde(default)]
    pub conditions: Option<Vec<IfCondition>>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl OperationNode {
    fn validate_array_sizes(&self) -> Result<()> {
        if let Some(subject) = &self.subject {
            validate_action_value_array_sizes(subject)?;
        }
        if let Some(value) = &self.value {
            validate_action_value_array_sizes(value)?;
        }
        if let Some(values) = &self.values {
            let elements = values.as_elements();
            check_array_size("values", elements.len())?;
            for v in elements {
                validate_action_value_array_sizes(v)?;
            }
        }
        if let Some(conditions) = &self.conditions {
            check_array_size("conditions", conditions.len())?;
            for condition in conditions {
                match condition {
                    IfCondition::Test { test, then } => {
                        validate_action_value_array_sizes(test)?;
                        validate_action_value_array_sizes(then)?;
                    }
                    IfCondition::Else { else_branch } => {
                        validate_action_value_array_sizes(else_branch)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_action_value_array_sizes(value: &ActionValue) -> Result<()> {
    match value {
        ActionValue::Operation(node) => node.validate_array_sizes(),
        ActionValue::Literal(_) => Ok(()),
    }
}

/// One action: computes a single named output (§4.6). Shares its operation
/// fields with [`OperationNode`] via `#[serde(flatten)]`, matching the
/// design note that "the whole action dict is a valid operation with
/// `output` being an extra key".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub output: String,
    #[serde(flatten)]
    pub node: OperationNode,
}
