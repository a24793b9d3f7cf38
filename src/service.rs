//! The `ServiceProvider` boundary (§6): the single hook through which the
//! engine reaches outside its own specification for a field it does not
//! define, cache, override, or source locally.
//!
//! A real implementation typically proxies to another running evaluation, a
//! database, or a network call, so the trait is expressed with
//! [`async_trait`] — the one point in the engine where evaluation can
//! legitimately suspend.

use crate::error::Result;
use crate::types::Value;
use async_trait::async_trait;
use std::collections::HashMap;

/// External resolver for fields the specification itself cannot produce.
///
/// Implementors decide how `(service, law, field)` maps to a value —
/// another specification evaluation, a cached lookup, a remote call. The
/// engine calls this only after its own resolution chain (definitions,
/// cache, override, sources) has been exhausted (§4.3).
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Resolve `field` as produced by `law` under `service`.
    ///
    /// `temporal` carries the property's temporal qualifier, if any
    /// (a point in time or period the value applies to). `service_context`
    /// and `overwrite_input` are passed through unchanged from the calling
    /// evaluation so a delegating provider can thread them further.
    async fn get_value(
        &self,
        service: &str,
        law: &str,
        field: &str,
        temporal: Option<&Value>,
        service_context: &HashMap<String, Value>,
        overwrite_input: &HashMap<String, Value>,
    ) -> Result<Value>;
}

/// A provider with nothing behind it: every lookup resolves to `Value::Null`.
///
/// Useful for evaluating specifications that declare service references but
/// don't exercise them in a given test, and as the default when no provider
/// is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullServiceProvider;

#[async_trait]
impl ServiceProvider for NullServiceProvider {
    async fn get_value(
        &self,
        _service: &str,
        _law: &str,
        _field: &str,
        _temporal: Option<&Value>,
        _service_context: &HashMap<String, Value>,
        _overwrite_input: &HashMap<String, Value>,
    ) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// A provider backed by a fixed `(service, law, field) -> value` table, for
/// tests that need a deterministic cross-service answer without standing up
/// a second evaluation.
#[derive(Debug, Default, Clone)]
pub struct StaticServiceProvider {
    values: HashMap<(String, String, String), Value>,
}

impl StaticServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(
        mut self,
        service: impl Into<String>,
        law: impl Into<String>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        self.values
            .insert((service.into(), law.into(), field.into()), value);
        self
    }
}

#[async_trait]
impl ServiceProvider for StaticServiceProvider {
    async fn get_value(
        &self,
        service: &str,
        law: &str,
        field: &str,
        _temporal: Option<&Value>,
        _service_context: &HashMap<String, Value>,
        _overwrite_input: &HashMap<String, Value>,
    ) -> Result<Value> {
        let key = (service.to_string(), law.to_string(), field.to_string());
        Ok(self.values.get(&key).cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_service_provider_always_null() {
        let provider = NullServiceProvider;
        let result = provider
            .get_value("svc", "law", "field", None, &HashMap::new(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_static_service_provider_returns_configured_value() {
        let provider = StaticServiceProvider::new().with_value(
            "tax-authority",
            "income-tax",
            "gross_income",
            Value::Int(50_000),
        );
        let result = provider
            .get_value(
                "tax-authority",
                "income-tax",
                "gross_income",
                None,
                &HashMap::new(),
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, Value::Int(50_000));
    }

    #[tokio::test]
    async fn test_static_service_provider_unconfigured_is_null() {
        let provider = StaticServiceProvider::new();
        let result = provider
            .get_value("svc", "law", "missing", None, &HashMap::new(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result, Value::Null);
    }
}
