//! The evaluation façade (§4.7): requirement evaluator, action evaluator,
//! and `Engine::evaluate`, the single entry point a host calls.
//!
//! # Example
//!
//! ```ignore
//! use policy_engine::{Engine, EvaluateOptions, Specification};
//!
//! let spec: Specification = serde_yaml::from_str(yaml)?;
//! let engine = Engine::new(spec);
//! let result = engine.evaluate(EvaluateOptions::default()).await?;
//! println!("{:?}", result.output);
//! ```

use crate::context::{root_node, RuleContext};
use crate::error::Result;
use crate::operations::{evaluate_operation, evaluate_value};
use crate::service::ServiceProvider;
use crate::spec::{Action, OutputSpec, Requirement, Specification};
use crate::trace::{PathKind, PathNode};
use crate::types::{TypeSpec, Value};
use async_recursion::async_recursion;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-call arguments to [`Engine::evaluate`] (§4.7's parameter list).
#[derive(Debug, Clone, Default)]
pub struct EvaluateOptions {
    /// Identifies the subject of evaluation, forwarded unchanged to the
    /// `ServiceProvider` and made available to operations via resolution.
    pub service_context: HashMap<String, Value>,
    /// Caller-supplied overrides, keyed `@{service}.{field}` or
    /// `@{service}.{output_name}`.
    pub overwrite_input: HashMap<String, Value>,
    /// Materialized `table -> field -> value` lookups.
    pub sources: HashMap<String, HashMap<String, Value>>,
    /// ISO-8601 date bound to `$calculation_date`. Defaults to today if
    /// omitted.
    pub calculation_date: Option<String>,
    /// If set, only the action producing this output name is evaluated.
    pub requested_output: Option<String>,
    /// Whether to record an execution trace. Disable for hot paths that
    /// don't need one; the interpreter itself is unaffected either way.
    pub trace_enabled: bool,
}

/// One computed output, packaged with the metadata declared for it in the
/// specification (§6's "Evaluation result").
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutput {
    pub value: Value,
    pub output_type: String,
    pub description: String,
    pub type_spec: Option<TypeSpec>,
    pub temporal: Option<Value>,
}

/// The result of one `evaluate` call (§4.7 step 5, §6).
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Every value resolved while evaluating requirements, keyed by path.
    pub input: HashMap<String, Value>,
    /// Computed outputs, keyed by output name.
    pub output: HashMap<String, ActionOutput>,
    pub requirements_met: bool,
    /// The execution trace, or `None` if tracing was disabled.
    pub path: Option<PathNode>,
}

/// A loaded specification paired with an optional cross-service resolver.
///
/// Built once per specification and reused across evaluations; each
/// `evaluate` call constructs its own [`RuleContext`] and discards it on
/// return.
pub struct Engine {
    spec: Specification,
    service_provider: Option<Arc<dyn ServiceProvider>>,
    output_meta: HashMap<String, OutputSpec>,
}

impl Engine {
    /// Build an engine with no cross-service resolution; any service-bound
    /// input resolves to null unless overridden or sourced.
    pub fn new(spec: Specification) -> Self {
        Self::with_service_provider(spec, None)
    }

    /// Build an engine backed by `service_provider` for service-bound
    /// inputs not otherwise resolvable via override, source, or cache.
    pub fn with_service_provider(
        spec: Specification,
        service_provider: Option<Arc<dyn ServiceProvider>>,
    ) -> Self {
        let output_meta = spec
            .properties
            .output
            .iter()
            .map(|o| (o.name.clone(), o.clone()))
            .collect();
        Self {
            spec,
            service_provider,
            output_meta,
        }
    }

    pub fn service(&self) -> &str {
        &self.spec.service
    }

    pub fn law(&self) -> &str {
        &self.spec.law
    }

    /// Evaluate this specification's requirements and, if met, its actions
    /// (§4.7).
    pub async fn evaluate(&self, options: EvaluateOptions) -> Result<EvaluationResult> {
        let started = std::time::Instant::now();
        let calculation_date = options
            .calculation_date
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().date_naive().to_string());

        tracing::debug!(
            service = %self.spec.service,
            law = %self.spec.law,
            calculation_date = %calculation_date,
            requested_output = ?options.requested_output,
            "evaluating specification"
        );

        let mut ctx = RuleContext::new(
            self.spec.properties.definitions.clone(),
            &self.spec.properties.input,
            &self.spec.properties.sources,
            &self.spec.properties.output,
            self.service_provider.clone(),
            options.service_context,
            options.sources,
            options.overwrite_input,
            calculation_date,
            options.trace_enabled,
        );

        let root = root_node("evaluation");
        ctx.trace_mut().push(root.name.clone(), root.kind);

        ctx.trace_mut()
            .push("Check all requirements", PathKind::Requirements);
        let requirements_result = evaluate_requirements(&mut ctx, &self.spec.requirements).await;
        if let Ok(met) = &requirements_result {
            ctx.trace_mut().set_result(Value::Bool(*met));
        }
        ctx.trace_mut().pop();
        let requirements_met = requirements_result?;

        let input = ctx.snapshot_values_cache();
        let mut output = HashMap::new();

        if requirements_met {
            for action in &self.spec.actions {
                if let Some(requested) = options.requested_output.as_deref() {
                    if requested != action.output {
                        tracing::debug!(output = %action.output, "skipping action");
                        continue;
                    }
                }
                let (name, action_output) =
                    evaluate_action(&mut ctx, action, &self.spec.service, &self.output_meta)
                        .await?;
                tracing::debug!(output = %name, value = ?action_output.value, "action computed");
                output.insert(name, action_output);
            }
        } else {
            tracing::debug!("requirements not met, skipping actions");
        }

        let path = ctx.finish_trace();

        tracing::info!(
            service = %self.spec.service,
            law = %self.spec.law,
            requirements_met,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "evaluation complete"
        );

        Ok(EvaluationResult {
            input,
            output,
            requirements_met,
            path,
        })
    }
}

/// Evaluate a requirement list with top-level short-circuit: the first
/// falsy requirement stops the rest from being evaluated (§4.5).
async fn evaluate_requirements(ctx: &mut RuleContext, requirements: &[Requirement]) -> Result<bool> {
    if requirements.is_empty() {
        tracing::debug!("no requirements found");
        return Ok(true);
    }

    for requirement in requirements {
        let met = evaluate_requirement(ctx, requirement).await?;
        if !met {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Evaluate one requirement. `all`/`or` children are evaluated fully
/// non-short-circuiting so their traces stay complete, matching the
/// reference behavior precisely (§4.5).
#[async_recursion]
async fn evaluate_requirement(ctx: &mut RuleContext, requirement: &Requirement) -> Result<bool> {
    let (name, kind) = match requirement {
        Requirement::All { .. } => ("Check ALL conditions", PathKind::Requirement),
        Requirement::Or { .. } => ("Check OR conditions", PathKind::Requirement),
        Requirement::Test(_) => ("Test condition", PathKind::Requirement),
    };
    ctx.trace_mut().push(name, kind);

    let result = match requirement {
        Requirement::All { all } => {
            let mut met = true;
            for child in all {
                met &= evaluate_requirement(ctx, child).await?;
            }
            Ok(met)
        }
        Requirement::Or { or } => {
            let mut met = false;
            for child in or {
                met |= evaluate_requirement(ctx, child).await?;
            }
            Ok(met)
        }
        Requirement::Test(node) => evaluate_operation(ctx, node).await.map(|v| v.to_bool()),
    };

    if let Ok(met) = &result {
        tracing::debug!(requirement = ?requirement, met, "requirement evaluated");
        ctx.trace_mut().set_result(Value::Bool(*met));
    }
    ctx.trace_mut().pop();
    result
}

/// Evaluate one action and package its output (§4.6).
async fn evaluate_action(
    ctx: &mut RuleContext,
    action: &Action,
    service_name: &str,
    output_meta: &HashMap<String, OutputSpec>,
) -> Result<(String, ActionOutput)> {
    let output_name = action.output.clone();
    ctx.trace_mut().push(
        format!("Evaluate action for {}", output_name),
        PathKind::Action,
    );

    let override_key = format!("@{}.{}", service_name, output_name);
    let raw_result = if let Some(value) = ctx.overwrite_input().get(&override_key).cloned() {
        tracing::debug!(key = %override_key, "resolving action output from override");
        Ok(value)
    } else if let Some(value) = &action.node.value {
        evaluate_value(ctx, value).await
    } else {
        evaluate_operation(ctx, &action.node).await
    };

    let result = raw_result.map(|raw| {
        ctx.output_spec(&output_name)
            .map(|spec| spec.enforce(&raw))
            .unwrap_or(raw)
    });

    if let Ok(value) = &result {
        ctx.trace_mut().set_result(value.clone());
    }
    ctx.trace_mut().pop();
    let value = result?;

    let meta = output_meta.get(&output_name);
    let action_output = ActionOutput {
        value,
        output_type: meta
            .and_then(|m| m.output_type.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        description: meta.and_then(|m| m.description.clone()).unwrap_or_default(),
        type_spec: meta.and_then(|m| m.type_spec.clone()),
        temporal: meta.and_then(|m| m.temporal.clone()),
    };
    Ok((output_name, action_output))
}
