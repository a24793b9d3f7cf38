//! The recursive operation interpreter (§4.4): `evaluate_value` and
//! `evaluate_operation`.
//!
//! Every call pushes exactly one [`PathNode`](crate::trace::PathNode) onto
//! the current [`RuleContext`]'s trace, so a nested operation tree produces
//! a matching nested trace. The two functions are mutually recursive
//! (an operation's operands are themselves values, which may be nested
//! operations), so both carry `#[async_recursion]` — grounded in the same
//! pattern `surrealdb-surrealdb`'s SQL expression evaluator uses for its own
//! recursive, `.await`-ing interpreter.

use crate::context::RuleContext;
use crate::error::{EngineError, Result};
use crate::spec::{ActionValue, IfCondition, OperationNode, ValuesField};
use crate::trace::PathKind;
use crate::types::Value;
use async_recursion::async_recursion;
use chrono::{DateTime, Datelike, NaiveDate};
use std::cmp::Ordering;

/// Evaluate an [`ActionValue`]: a numeric/literal pass through unchanged, a
/// `$`-reference resolves through the context, and a nested operation tree
/// delegates to [`evaluate_operation`].
#[async_recursion]
pub async fn evaluate_value(ctx: &mut RuleContext, value: &ActionValue) -> Result<Value> {
    match value {
        ActionValue::Operation(node) => evaluate_operation(ctx, node).await,
        ActionValue::Literal(Value::String(s)) if s.starts_with('$') => {
            ctx.trace_mut().push(s.clone(), PathKind::Value);
            let result = ctx.resolve_reference(s).await;
            if let Ok(v) = &result {
                ctx.trace_mut().set_result(v.clone());
            }
            ctx.trace_mut().pop();
            result
        }
        ActionValue::Literal(v) => {
            ctx.trace_mut().push(literal_label(v), PathKind::Value);
            ctx.trace_mut().set_result(v.clone());
            ctx.trace_mut().pop();
            Ok(v.clone())
        }
    }
}

async fn eval_values(ctx: &mut RuleContext, values: &[&ActionValue]) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        out.push(evaluate_value(ctx, v).await?);
    }
    Ok(out)
}

/// Element-wise view of `values`, used by every operation except `IN`.
fn elements_of(values: &Option<ValuesField>) -> Vec<&ActionValue> {
    values.as_ref().map(ValuesField::as_elements).unwrap_or_default()
}

async fn eval_optional(ctx: &mut RuleContext, value: &Option<ActionValue>) -> Result<Value> {
    match value {
        Some(v) => evaluate_value(ctx, v).await,
        None => Ok(Value::Null),
    }
}

/// Convert an `ActionValue` to its raw literal shape without evaluating it:
/// no `$`-reference resolution, no nested operation evaluation. Mirrors
/// `resolve_value`'s behavior for a non-string argument, which hands back a
/// compound value completely untouched.
fn raw_literal(value: &ActionValue) -> Value {
    match value {
        ActionValue::Literal(v) => v.clone(),
        ActionValue::Operation(node) => serde_json::to_value(node.as_ref())
            .ok()
            .and_then(|json| serde_json::from_value(json).ok())
            .unwrap_or(Value::Null),
    }
}

/// Evaluate `IN`'s `values` field as a single unit, the way the original's
/// `_evaluate_value` does: a `$`-reference resolves through the context
/// (possibly to a list); a nested operation evaluates to its result; a
/// literal list passes through with every element taken as a raw literal,
/// never individually resolved. The resulting value is then treated as the
/// candidate list if it's an array, or as a singleton otherwise.
async fn eval_in_candidates(
    ctx: &mut RuleContext,
    values: &Option<ValuesField>,
) -> Result<Vec<Value>> {
    let resolved = match values {
        None => Value::Array(Vec::new()),
        Some(ValuesField::List(items)) => Value::Array(items.iter().map(raw_literal).collect()),
        Some(ValuesField::Single(v)) => evaluate_value(ctx, v).await?,
    };
    Ok(match resolved {
        Value::Array(items) => items,
        other => vec![other],
    })
}

/// Evaluate an operation node (§4.4's dispatch table). Always pushes one
/// trace node labeled with the operation kind (or `VALUE` for the
/// no-operation direct-value row), sets its result, and pops — regardless
/// of whether the inner dispatch succeeded, so a fatal error from a nested
/// `_DATE` operation still leaves the trace balanced.
#[async_recursion]
pub async fn evaluate_operation(ctx: &mut RuleContext, node: &OperationNode) -> Result<Value> {
    ctx.enter_operation()?;
    let (kind, label) = match &node.operation {
        None => (PathKind::DirectValue, "VALUE".to_string()),
        Some(op) => (PathKind::Operation, op.clone()),
    };
    ctx.trace_mut().push(label, kind);
    let result = dispatch(ctx, node).await;
    if let Ok(v) = &result {
        ctx.trace_mut().set_result(v.clone());
    }
    ctx.trace_mut().pop();
    ctx.exit_operation();
    result
}

#[async_recursion]
async fn dispatch(ctx: &mut RuleContext, node: &OperationNode) -> Result<Value> {
    match node.operation.as_deref() {
        None => match &node.value {
            Some(v) => evaluate_value(ctx, v).await,
            None => invalid_operation(ctx, "missing operation and value"),
        },
        Some("IF") => evaluate_if(ctx, node).await,
        Some("IN") => {
            let subject = eval_optional(ctx, &node.subject).await?;
            let candidates = eval_in_candidates(ctx, &node.values).await?;
            Ok(Value::Bool(candidates.iter().any(|c| values_equal(&subject, c))))
        }
        Some("NOT_NULL") => {
            let subject = eval_optional(ctx, &node.subject).await?;
            Ok(Value::Bool(!subject.is_null()))
        }
        Some("AND") => {
            let elements = elements_of(&node.values);
            let vals = eval_values(ctx, &elements).await?;
            Ok(Value::Bool(vals.iter().all(Value::to_bool)))
        }
        Some("OR") => {
            let elements = elements_of(&node.values);
            let vals = eval_values(ctx, &elements).await?;
            Ok(Value::Bool(vals.iter().any(Value::to_bool)))
        }
        Some(op @ ("EQUALS" | "NOT_EQUALS" | "GREATER_THAN" | "LESS_THAN"
        | "GREATER_OR_EQUAL" | "LESS_OR_EQUAL")) => {
            let subject = eval_optional(ctx, &node.subject).await?;
            let value = eval_optional(ctx, &node.value).await?;
            Ok(compare(op, &subject, &value))
        }
        Some(op @ ("ADD" | "MIN" | "MAX" | "MULTIPLY" | "SUBTRACT" | "DIVIDE")) => {
            let elements = elements_of(&node.values);
            let vals = eval_values(ctx, &elements).await?;
            evaluate_arithmetic(ctx, op, &vals)
        }
        Some(op) if op.contains("_DATE") => evaluate_date_operation(ctx, node, op).await,
        Some(_) => invalid_operation(ctx, "unrecognized operation"),
    }
}

fn invalid_operation(ctx: &mut RuleContext, reason: &str) -> Result<Value> {
    ctx.trace_mut()
        .set_detail("error", Value::String("Invalid operation format".to_string()));
    tracing::warn!(reason, "invalid operation format");
    Ok(Value::Int(0))
}

async fn evaluate_if(ctx: &mut RuleContext, node: &OperationNode) -> Result<Value> {
    let conditions = node.conditions.as_deref().unwrap_or(&[]);
    let mut attempted = Vec::with_capacity(conditions.len());
    let mut result = Value::Int(0);

    for condition in conditions {
        match condition {
            IfCondition::Test { test, then } => {
                let truthy = evaluate_value(ctx, test).await?.to_bool();
                attempted.push(Value::Bool(truthy));
                if truthy {
                    result = evaluate_value(ctx, then).await?;
                    break;
                }
            }
            IfCondition::Else { else_branch } => {
                result = evaluate_value(ctx, else_branch).await?;
                break;
            }
        }
    }

    ctx.trace_mut()
        .set_detail("condition_results", Value::Array(attempted));
    Ok(result)
}

fn evaluate_arithmetic(ctx: &mut RuleContext, op: &str, vals: &[Value]) -> Result<Value> {
    if vals.is_empty() {
        return Ok(Value::Int(0));
    }
    let result = match op {
        "ADD" => sum_values(vals).map(numeric_result),
        "MIN" => fold_numeric(vals, f64::min).map(numeric_result),
        "MAX" => fold_numeric(vals, f64::max).map(numeric_result),
        "SUBTRACT" => fold_numeric(vals, |x, y| x - y).map(numeric_result),
        "MULTIPLY" => multiply_values(vals),
        "DIVIDE" => divide_values(vals),
        _ => unreachable!("guarded by dispatch match"),
    };
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            ctx.trace_mut().set_detail("error", Value::String(err.to_string()));
            Ok(Value::Int(0))
        }
    }
}

fn to_number(value: &Value) -> Result<f64> {
    value.as_float().ok_or_else(|| EngineError::TypeMismatch {
        expected: "number".to_string(),
        actual: value.type_name().to_string(),
    })
}

fn sum_values(vals: &[Value]) -> Result<f64> {
    vals.iter().try_fold(0.0, |acc, v| Ok(acc + to_number(v)?))
}

fn fold_numeric(vals: &[Value], op: impl Fn(f64, f64) -> f64) -> Result<f64> {
    let mut iter = vals.iter();
    let first = to_number(iter.next().expect("non-empty checked by caller"))?;
    iter.try_fold(first, |acc, v| Ok(op(acc, to_number(v)?)))
}

/// `MULTIPLY`'s left fold, with the percentage-style truncation rule: when
/// the next factor is a non-integer numeric and `|factor| < 1`, truncate
/// the running product toward zero before continuing.
fn multiply_values(vals: &[Value]) -> Result<Value> {
    let mut acc = to_number(&vals[0])?;
    for v in &vals[1..] {
        let factor = to_number(v)?;
        acc *= factor;
        if matches!(v, Value::Float(f) if f.fract() != 0.0) && factor.abs() < 1.0 {
            acc = acc.trunc();
        }
    }
    Ok(numeric_result(acc))
}

/// `DIVIDE`'s left fold: every partial quotient is truncated toward zero,
/// and any zero divisor collapses the whole result to 0 (§4.4, §9 — this
/// is a faithful, intentionally surprising carry-over: `DIVIDE([10,3]) = 3`).
fn divide_values(vals: &[Value]) -> Result<Value> {
    if vals[1..]
        .iter()
        .any(|v| to_number(v).map(|n| n == 0.0).unwrap_or(false))
    {
        return Ok(Value::Int(0));
    }
    let mut acc = to_number(&vals[0])?;
    if vals.len() == 1 {
        return Ok(numeric_result(acc));
    }
    for v in &vals[1..] {
        let divisor = to_number(v)?;
        acc = (acc / divisor).trunc();
    }
    Ok(Value::Int(acc as i64))
}

fn numeric_result(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::Int(f as i64)
    } else {
        Value::Float(f)
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> Value {
    match op {
        "EQUALS" => Value::Bool(values_equal(a, b)),
        "NOT_EQUALS" => Value::Bool(!values_equal(a, b)),
        "GREATER_THAN" => Value::Bool(ordering(a, b) == Some(Ordering::Greater)),
        "LESS_THAN" => Value::Bool(ordering(a, b) == Some(Ordering::Less)),
        "GREATER_OR_EQUAL" => {
            Value::Bool(matches!(ordering(a, b), Some(Ordering::Greater | Ordering::Equal)))
        }
        "LESS_OR_EQUAL" => {
            Value::Bool(matches!(ordering(a, b), Some(Ordering::Less | Ordering::Equal)))
        }
        _ => unreachable!("guarded by dispatch match"),
    }
}

/// Cross-type numeric equality (`1 == 1.0`), exact for strings/bools/null,
/// structural for arrays/objects, `false` across incompatible types.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ if a.is_numeric() && b.is_numeric() => a.as_float() == b.as_float(),
        _ => false,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_numeric() && b.is_numeric() {
        a.as_float()?.partial_cmp(&b.as_float()?)
    } else if let (Value::String(x), Value::String(y)) = (a, b) {
        Some(x.cmp(y))
    } else {
        None
    }
}

fn literal_label(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => format!("{:?}", other),
    }
}

fn parse_date(value: &Value) -> Result<NaiveDate> {
    match value {
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|e| EngineError::InvalidDate(format!("{}: {}", s, e))),
        Value::Int(timestamp) => DateTime::from_timestamp(*timestamp, 0)
            .map(|dt| dt.date_naive())
            .ok_or_else(|| EngineError::InvalidDate(format!("invalid timestamp: {}", timestamp))),
        other => Err(EngineError::InvalidDate(format!(
            "not a date: {}",
            other.type_name()
        ))),
    }
}

async fn evaluate_date_operation(
    ctx: &mut RuleContext,
    node: &OperationNode,
    op: &str,
) -> Result<Value> {
    let elements = elements_of(&node.values);
    let vals = eval_values(ctx, &elements).await?;
    if op != "SUBTRACT_DATE" || vals.len() != 2 {
        tracing::warn!(operation = op, "unsupported or malformed _DATE operation");
        ctx.trace_mut().set_detail(
            "error",
            Value::String("_DATE operation requires exactly two values".to_string()),
        );
        return Ok(Value::Int(0));
    }

    let end = parse_date(&vals[0])?;
    let start = parse_date(&vals[1])?;
    let unit = node.unit.as_deref().unwrap_or("days");

    let result = match unit {
        "days" => (end - start).num_days(),
        "years" => {
            let mut years = end.year() - start.year();
            if (end.month(), end.day()) < (start.month(), start.day()) {
                years -= 1;
            }
            years as i64
        }
        "months" => {
            ((end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32) as i64
        }
        other => {
            tracing::warn!(unit = other, "unknown date unit");
            ctx.trace_mut()
                .set_detail("error", Value::String(format!("unknown date unit: {}", other)));
            return Ok(Value::Int(0));
        }
    };
    Ok(Value::Int(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fresh_context() -> RuleContext {
        RuleContext::new(
            HashMap::new(),
            &[],
            &[],
            &[],
            None,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            "2024-01-01".to_string(),
            true,
        )
    }

    fn lit(v: impl Into<Value>) -> ActionValue {
        ActionValue::Literal(v.into())
    }

    fn op(operation: &str, values: Vec<ActionValue>) -> OperationNode {
        OperationNode {
            operation: Some(operation.to_string()),
            subject: None,
            value: None,
            values: Some(ValuesField::List(values)),
            conditions: None,
            unit: None,
        }
    }

    // -- arithmetic --------------------------------------------------

    #[tokio::test]
    async fn test_add_sums_literals() {
        let mut ctx = fresh_context();
        let node = op("ADD", vec![lit(30i64), lit(80i64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(110));
    }

    #[tokio::test]
    async fn test_add_empty_is_zero() {
        let mut ctx = fresh_context();
        let node = op("ADD", vec![]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(0));
    }

    #[tokio::test]
    async fn test_subtract_left_fold() {
        let mut ctx = fresh_context();
        let node = op("SUBTRACT", vec![lit(100i64), lit(30i64), lit(10i64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(60));
    }

    #[tokio::test]
    async fn test_multiply_truncates_small_float_factor() {
        let mut ctx = fresh_context();
        // 201 * 0.5 = 100.5, truncated to 100 since 0.5 is a non-integer factor < 1.
        let node = op("MULTIPLY", vec![lit(201i64), lit(0.5f64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(100));
    }

    #[tokio::test]
    async fn test_multiply_full_precision_for_large_factor() {
        let mut ctx = fresh_context();
        let node = op("MULTIPLY", vec![lit(10i64), lit(2.5f64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Float(25.0));
    }

    #[tokio::test]
    async fn test_divide_truncates_each_quotient() {
        let mut ctx = fresh_context();
        let node = op("DIVIDE", vec![lit(100i64), lit(3i64), lit(3i64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(11));
    }

    #[tokio::test]
    async fn test_divide_by_zero_divisor_yields_zero_s5() {
        let mut ctx = fresh_context();
        let node = op("DIVIDE", vec![lit(100i64), lit(0i64), lit(5i64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(0));
    }

    #[tokio::test]
    async fn test_min_max() {
        let mut ctx = fresh_context();
        let min_node = op("MIN", vec![lit(5i64), lit(2i64), lit(9i64)]);
        assert_eq!(evaluate_operation(&mut ctx, &min_node).await.unwrap(), Value::Int(2));
        let max_node = op("MAX", vec![lit(5i64), lit(2i64), lit(9i64)]);
        assert_eq!(evaluate_operation(&mut ctx, &max_node).await.unwrap(), Value::Int(9));
    }

    #[tokio::test]
    async fn test_arithmetic_type_mismatch_yields_zero_with_error_detail() {
        let mut ctx = fresh_context();
        let node = op("ADD", vec![lit("not a number"), lit(1i64)]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(0));
    }

    // -- comparison ----------------------------------------------------

    #[tokio::test]
    async fn test_comparisons() {
        let mut ctx = fresh_context();
        let mut node = OperationNode {
            operation: Some("GREATER_THAN".to_string()),
            subject: Some(lit(20i64)),
            value: Some(lit(18i64)),
            values: None,
            conditions: None,
            unit: None,
        };
        assert_eq!(evaluate_operation(&mut ctx, &node).await.unwrap(), Value::Bool(true));
        node.operation = Some("EQUALS".to_string());
        node.subject = Some(lit(1i64));
        node.value = Some(lit(1.0f64));
        assert_eq!(evaluate_operation(&mut ctx, &node).await.unwrap(), Value::Bool(true));
    }

    // -- logical / conditional ------------------------------------------

    #[tokio::test]
    async fn test_and_or_non_short_circuit_results() {
        let mut ctx = fresh_context();
        let and_node = op("AND", vec![lit(true), lit(false), lit(true)]);
        assert_eq!(evaluate_operation(&mut ctx, &and_node).await.unwrap(), Value::Bool(false));
        let or_node = op("OR", vec![lit(false), lit(false), lit(true)]);
        assert_eq!(evaluate_operation(&mut ctx, &or_node).await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_in_and_not_null() {
        let mut ctx = fresh_context();
        let in_node = OperationNode {
            operation: Some("IN".to_string()),
            subject: Some(lit(2i64)),
            value: None,
            values: Some(ValuesField::List(vec![lit(1i64), lit(2i64), lit(3i64)])),
            conditions: None,
            unit: None,
        };
        assert_eq!(evaluate_operation(&mut ctx, &in_node).await.unwrap(), Value::Bool(true));

        let not_null_node = OperationNode {
            operation: Some("NOT_NULL".to_string()),
            subject: Some(lit(Value::Null)),
            value: None,
            values: None,
            conditions: None,
            unit: None,
        };
        assert_eq!(
            evaluate_operation(&mut ctx, &not_null_node).await.unwrap(),
            Value::Bool(false)
        );
    }

    #[tokio::test]
    async fn test_in_with_reference_valued_values_resolves_to_list() {
        let mut definitions = HashMap::new();
        definitions.insert(
            "allowed_codes".to_string(),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        let mut ctx = RuleContext::new(
            definitions,
            &[],
            &[],
            &[],
            None,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            "2024-01-01".to_string(),
            true,
        );
        let node = OperationNode {
            operation: Some("IN".to_string()),
            subject: Some(lit(2i64)),
            value: None,
            values: Some(ValuesField::Single(Box::new(lit("$allowed_codes")))),
            conditions: None,
            unit: None,
        };
        assert_eq!(evaluate_operation(&mut ctx, &node).await.unwrap(), Value::Bool(true));

        let miss_node = OperationNode {
            values: Some(ValuesField::Single(Box::new(lit("$allowed_codes")))),
            subject: Some(lit(9i64)),
            ..op("IN", vec![])
        };
        assert_eq!(evaluate_operation(&mut ctx, &miss_node).await.unwrap(), Value::Bool(false));
    }

    #[tokio::test]
    async fn test_if_chain_picks_else_s3() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: Some("IF".to_string()),
            subject: None,
            value: None,
            values: None,
            conditions: Some(vec![
                IfCondition::Test {
                    test: ActionValue::Operation(Box::new(OperationNode {
                        operation: Some("GREATER_THAN".to_string()),
                        subject: Some(lit(17i64)),
                        value: Some(lit(18i64)),
                        values: None,
                        conditions: None,
                        unit: None,
                    })),
                    then: lit("adult"),
                },
                IfCondition::Else {
                    else_branch: lit("minor"),
                },
            ]),
            unit: None,
        };
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::String("minor".to_string()));
    }

    #[tokio::test]
    async fn test_if_no_match_defaults_to_zero() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: Some("IF".to_string()),
            subject: None,
            value: None,
            values: None,
            conditions: Some(vec![IfCondition::Test {
                test: lit(false),
                then: lit("never"),
            }]),
            unit: None,
        };
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(0));
    }

    // -- dates -----------------------------------------------------------

    #[tokio::test]
    async fn test_subtract_date_in_years_s4() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: Some("SUBTRACT_DATE".to_string()),
            subject: None,
            value: None,
            values: Some(ValuesField::List(vec![lit("2024-03-10"), lit("2000-03-11")])),
            conditions: None,
            unit: Some("years".to_string()),
        };
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(23));
    }

    #[tokio::test]
    async fn test_subtract_date_in_days_default_unit() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: Some("SUBTRACT_DATE".to_string()),
            subject: None,
            value: None,
            values: Some(ValuesField::List(vec![lit("2024-01-11"), lit("2024-01-01")])),
            conditions: None,
            unit: None,
        };
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(10));
    }

    #[tokio::test]
    async fn test_subtract_date_invalid_date_is_fatal() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: Some("SUBTRACT_DATE".to_string()),
            subject: None,
            value: None,
            values: Some(ValuesField::List(vec![lit("not-a-date"), lit("2024-01-01")])),
            conditions: None,
            unit: None,
        };
        let result = evaluate_operation(&mut ctx, &node).await;
        assert!(matches!(result, Err(EngineError::InvalidDate(_))));
    }

    // -- depth guard ---------------------------------------------------

    #[tokio::test]
    async fn test_deeply_nested_operation_hits_max_depth() {
        let mut ctx = fresh_context();
        let mut node = op("ADD", vec![lit(1i64)]);
        for _ in 0..crate::config::MAX_OPERATION_DEPTH + 10 {
            node = OperationNode {
                operation: Some("ADD".to_string()),
                subject: None,
                value: None,
                values: Some(ValuesField::List(vec![ActionValue::Operation(Box::new(node))])),
                conditions: None,
                unit: None,
            };
        }
        let result = evaluate_operation(&mut ctx, &node).await;
        assert!(matches!(result, Err(EngineError::MaxDepthExceeded(_))));
    }

    // -- malformed ---------------------------------------------------------

    #[tokio::test]
    async fn test_unknown_operation_yields_zero_with_error() {
        let mut ctx = fresh_context();
        let node = op("NOT_A_REAL_OP", vec![]);
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(0));
    }

    #[tokio::test]
    async fn test_direct_value_passthrough() {
        let mut ctx = fresh_context();
        let node = OperationNode {
            operation: None,
            subject: None,
            value: Some(lit(42i64)),
            values: None,
            conditions: None,
            unit: None,
        };
        let result = evaluate_operation(&mut ctx, &node).await.unwrap();
        assert_eq!(result, Value::Int(42));
    }

    #[tokio::test]
    async fn test_reference_resolves_through_definitions() {
        let mut definitions = HashMap::new();
        definitions.insert("age".to_string(), Value::Int(30));
        let mut ctx = RuleContext::new(
            definitions,
            &[],
            &[],
            &[],
            None,
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            "2024-01-01".to_string(),
            true,
        );
        let result = evaluate_value(&mut ctx, &lit("$age")).await.unwrap();
        assert_eq!(result, Value::Int(30));
    }
}
