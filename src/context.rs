//! Per-evaluation mutable state: the value-resolution layer that hides
//! whether a value comes from a definition, a cached result, a
//! caller-supplied override, a materialized source, or a cross-service
//! lookup (§4.3).
//!
//! # Resolution priority
//!
//! A `$`-prefixed reference is resolved in this order (first match wins):
//! 1. `calculation_date` (the one reserved built-in path)
//! 2. `definitions` — specification-level constants
//! 3. `values_cache` — anything already resolved this evaluation
//! 4. `overwrite_input` — caller-supplied overrides, keyed `@service.field`
//! 5. `sources` — materialized `table.field` lookups
//! 6. `service_provider` — a live cross-service call
//!
//! Definitions and cache win over external lookups because they're cheap
//! and idempotent; overrides win over sources and services for testability;
//! sources win over live services so a materialized value is deterministic.

use crate::error::{EngineError, Result};
use crate::service::ServiceProvider;
use crate::spec::{OutputSpec, PropertySpec, SourcePropertySpec};
use crate::trace::{PathNode, TraceBuilder};
use crate::types::{TypeSpec, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What an input property is bound to, if anything: a cross-service
/// reference or a materialized source location. Built once from the
/// specification's `properties.input`/`properties.sources` lists and
/// consulted by every `resolve_value` call.
#[derive(Debug, Clone)]
pub enum PropertyBinding {
    /// No binding: defaults to null if not otherwise resolvable.
    None,
    /// Bound to another law's output via a `ServiceProvider`.
    Service {
        service: String,
        law: String,
        field: String,
        temporal: Option<Value>,
    },
    /// Bound to a materialized `sources[table][field]` lookup.
    Source { table: String, field: String },
}

/// Per-evaluation mutable state (§3's RuleContext).
///
/// Constructed fresh for every `evaluate` call and discarded on return; it
/// is never shared across evaluations. The `ServiceProvider` behind it may
/// be shared, which is why the trait object requires `Send + Sync`.
pub struct RuleContext {
    definitions: HashMap<String, Value>,
    service_provider: Option<Arc<dyn ServiceProvider>>,
    service_context: HashMap<String, Value>,
    property_bindings: HashMap<String, PropertyBinding>,
    output_specs: HashMap<String, TypeSpec>,
    sources: HashMap<String, HashMap<String, Value>>,
    accessed_paths: HashSet<String>,
    values_cache: HashMap<String, Value>,
    overwrite_input: HashMap<String, Value>,
    calculation_date: String,
    trace: TraceBuilder,
    operation_depth: usize,
}

impl RuleContext {
    /// Build a context from a specification's definitions/input/sources and
    /// the caller-supplied per-evaluation arguments.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        definitions: HashMap<String, Value>,
        input: &[PropertySpec],
        source_specs: &[SourcePropertySpec],
        output_specs_list: &[OutputSpec],
        service_provider: Option<Arc<dyn ServiceProvider>>,
        service_context: HashMap<String, Value>,
        sources: HashMap<String, HashMap<String, Value>>,
        overwrite_input: HashMap<String, Value>,
        calculation_date: String,
        trace_enabled: bool,
    ) -> Self {
        let mut property_bindings = HashMap::new();
        for p in input {
            if let Some(service_reference) = &p.service_reference {
                property_bindings.insert(
                    p.name.clone(),
                    PropertyBinding::Service {
                        service: service_reference.service.clone(),
                        law: service_reference.law.clone(),
                        field: service_reference.field.clone(),
                        temporal: p.temporal.clone(),
                    },
                );
            }
        }
        for s in source_specs {
            if let Some(source_reference) = &s.source_reference {
                property_bindings.insert(
                    s.name.clone(),
                    PropertyBinding::Source {
                        table: source_reference.table.clone(),
                        field: source_reference.field.clone(),
                    },
                );
            }
        }

        let output_specs = output_specs_list
            .iter()
            .map(|o| (o.name.clone(), o.type_spec.clone().unwrap_or_default()))
            .collect();

        Self {
            definitions,
            service_provider,
            service_context,
            property_bindings,
            output_specs,
            sources,
            accessed_paths: HashSet::new(),
            values_cache: HashMap::new(),
            overwrite_input,
            calculation_date,
            trace: if trace_enabled {
                TraceBuilder::new()
            } else {
                TraceBuilder::disabled()
            },
            operation_depth: 0,
        }
    }

    pub fn output_spec(&self, name: &str) -> Option<&TypeSpec> {
        self.output_specs.get(name)
    }

    pub fn overwrite_input(&self) -> &HashMap<String, Value> {
        &self.overwrite_input
    }

    pub fn service_context(&self) -> &HashMap<String, Value> {
        &self.service_context
    }

    pub fn accessed_paths(&self) -> &HashSet<String> {
        &self.accessed_paths
    }

    pub fn values_cache(&self) -> &HashMap<String, Value> {
        &self.values_cache
    }

    /// Snapshot the current cache contents, for the façade's `input_values`
    /// (taken after requirements, before actions — §4.7 step 3).
    pub fn snapshot_values_cache(&self) -> HashMap<String, Value> {
        self.values_cache.clone()
    }

    pub fn trace_mut(&mut self) -> &mut TraceBuilder {
        &mut self.trace
    }

    /// Enter one level of operation nesting, failing with
    /// `MaxDepthExceeded` once `config::MAX_OPERATION_DEPTH` is passed
    /// rather than letting a malicious or accidental operation tree
    /// overflow the stack.
    pub fn enter_operation(&mut self) -> Result<()> {
        self.operation_depth += 1;
        if self.operation_depth > crate::config::MAX_OPERATION_DEPTH {
            return Err(EngineError::MaxDepthExceeded(self.operation_depth));
        }
        Ok(())
    }

    /// Leave one level of operation nesting. Called unconditionally after
    /// a successful `enter_operation`, regardless of whether the nested
    /// evaluation itself succeeded.
    pub fn exit_operation(&mut self) {
        self.operation_depth = self.operation_depth.saturating_sub(1);
    }

    /// Consume the context and finalize its trace, popping any nodes still
    /// on the stack (normally just the root). Called once, at the end of
    /// `evaluate`.
    pub fn finish_trace(self) -> Option<PathNode> {
        self.trace.build()
    }

    /// Strip a leading `$` and resolve the bare path, tracking access and
    /// honoring the priority chain (§4.3).
    ///
    /// A `ServiceProvider` failure is the one fatal case in this chain
    /// (§7) and propagates to the caller of `evaluate`; every other miss
    /// resolves to null.
    pub async fn resolve_reference(&mut self, reference: &str) -> Result<Value> {
        let path = reference.strip_prefix('$').unwrap_or(reference);
        self.resolve_value(path).await
    }

    /// Resolve a bare path (without the leading `$`) through the priority
    /// chain, caching the result (except for the `calculation_date`
    /// built-in and definitions, which need no caching since they are
    /// already O(1) lookups into read-only maps).
    pub async fn resolve_value(&mut self, path: &str) -> Result<Value> {
        self.accessed_paths.insert(path.to_string());

        if path == "calculation_date" {
            return Ok(Value::String(self.calculation_date.clone()));
        }

        if let Some(value) = self.definitions.get(path) {
            return Ok(value.clone());
        }

        if let Some(value) = self.values_cache.get(path) {
            return Ok(value.clone());
        }

        let binding = self.property_bindings.get(path).cloned();

        if let Some(PropertyBinding::Service { service, .. }) = &binding {
            let key = format!("@{}.{}", service, path_field(&binding));
            if let Some(value) = self.overwrite_input.get(&key) {
                let value = value.clone();
                self.values_cache.insert(path.to_string(), value.clone());
                return Ok(value);
            }
        }

        if let Some(PropertyBinding::Source { table, field }) = &binding {
            if let Some(value) = self
                .sources
                .get(table)
                .and_then(|fields| fields.get(field))
            {
                let value = value.clone();
                self.values_cache.insert(path.to_string(), value.clone());
                return Ok(value);
            }
        }

        if let Some(PropertyBinding::Service {
            service,
            law,
            field,
            temporal,
        }) = &binding
        {
            if let Some(provider) = &self.service_provider {
                let value = provider
                    .get_value(
                        service,
                        law,
                        field,
                        temporal.as_ref(),
                        &self.service_context,
                        &self.overwrite_input,
                    )
                    .await
                    .map_err(|err| {
                        EngineError::ServiceProviderError(format!("{}: {}", path, err))
                    })?;
                self.values_cache.insert(path.to_string(), value.clone());
                return Ok(value);
            }
        }

        tracing::warn!(path = %path, "unresolved reference");
        Ok(Value::Null)
    }
}

/// The override key for a service-bound property is `@{service}.{field}`,
/// not `@{service}.{path}` — the bare path is usually the same as the
/// field name but the spec allows them to diverge.
fn path_field(binding: &Option<PropertyBinding>) -> String {
    match binding {
        Some(PropertyBinding::Service { field, .. }) => field.clone(),
        _ => String::new(),
    }
}

/// The root node for one evaluation, pushed before any component runs
/// (§4.2). Kept as a free function rather than a `RuleContext` method since
/// it is only ever called once, by the façade.
pub fn root_node(name: impl Into<String>) -> PathNode {
    PathNode::new(crate::trace::PathKind::Root, name)
}
