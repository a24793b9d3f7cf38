//! Execution tracing for audit trails and debugging
//!
//! Records the path through rule evaluation as a tree of [`PathNode`]s, each
//! describing one step (resolving a reference, running an operation,
//! checking a requirement, computing an action) together with its result and
//! any free-form details worth keeping for an explanation.
//!
//! # Example
//!
//! ```
//! use policy_engine::trace::{PathKind, PathNode, TraceBuilder};
//! use policy_engine::types::Value;
//!
//! let mut builder = TraceBuilder::new();
//! builder.push("total", PathKind::Action);
//! builder.push("ADD", PathKind::Operation);
//! builder.set_result(Value::Int(110));
//! builder.pop();
//! builder.set_result(Value::Int(100));
//! let trace = builder.build().unwrap();
//! assert_eq!(trace.name, "total");
//! ```

use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// Tag identifying what kind of evaluation step a [`PathNode`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Root,
    Requirements,
    Requirement,
    Action,
    Operation,
    Value,
    DirectValue,
}

impl PathKind {
    fn as_str(&self) -> &'static str {
        match self {
            PathKind::Root => "root",
            PathKind::Requirements => "requirements",
            PathKind::Requirement => "requirement",
            PathKind::Action => "action",
            PathKind::Operation => "operation",
            PathKind::Value => "value",
            PathKind::DirectValue => "direct_value",
        }
    }
}

/// A node in the execution trace tree.
#[derive(Debug, Clone, Serialize)]
pub struct PathNode {
    /// What kind of evaluation step this node records.
    #[serde(rename = "type")]
    pub kind: PathKind,

    /// Human-readable label for this step (output name, operation kind, …).
    pub name: String,

    /// The result value produced by this step, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Free-form evaluation metadata (e.g. `operation_type`, `error`,
    /// `condition_results`, `raw_value`).
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,

    /// Child nodes, in evaluation order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PathNode>,

    /// Wall-clock duration of this step, in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
}

impl PathNode {
    /// Create a new node of the given kind and name.
    pub fn new(kind: PathKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            result: None,
            details: HashMap::new(),
            children: Vec::new(),
            duration_us: None,
        }
    }

    /// Set the result value, builder-style.
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Attach one detail entry, builder-style.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Append a child node, builder-style.
    pub fn with_child(mut self, child: PathNode) -> Self {
        self.children.push(child);
        self
    }

    /// Render the trace as a human-readable indented tree.
    ///
    /// ```text
    /// total (action) = 100.0
    /// `-- ADD (operation) = 110
    ///     +-- 30 (value) = 30
    ///     `-- 80 (value) = 80
    /// ```
    pub fn render(&self, indent: usize, is_last: bool) -> String {
        self.render_internal(indent, is_last, true)
    }

    fn render_internal(&self, indent: usize, is_last: bool, is_top_level: bool) -> String {
        let mut lines = Vec::new();

        let prefix = if is_top_level {
            String::new()
        } else if is_last {
            "`-- ".to_string()
        } else {
            "+-- ".to_string()
        };

        let child_indent = if is_top_level {
            String::new()
        } else if is_last {
            "    ".to_string()
        } else {
            "|   ".to_string()
        };

        let mut line = format!("{}{} ({})", prefix, self.name, self.kind.as_str());

        if let Some(ref result) = self.result {
            line.push_str(&format!(" = {}", format_value_compact(result)));
        }

        if let Some(duration) = self.duration_us {
            if duration >= 100 {
                line.push_str(&format!(" ({}us)", duration));
            }
        }

        lines.push(line);

        let child_count = self.children.len();
        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == child_count - 1;
            let child_str = child.render_internal(0, is_last_child, false);
            for child_line in child_str.lines() {
                lines.push(format!(
                    "{}{}",
                    " ".repeat(indent * 4) + &child_indent,
                    child_line
                ));
            }
        }

        lines.join("\n")
    }

    /// Render a compact single-line summary (kind:name=result).
    pub fn render_compact(&self) -> String {
        let result_str = self
            .result
            .as_ref()
            .map(|v| format!("={}", format_value_compact(v)))
            .unwrap_or_default();

        format!("{}:{}{}", self.kind.as_str(), self.name, result_str)
    }
}

/// Format a value compactly for trace output, truncating large values.
fn format_value_compact(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.fract() == 0.0 {
                format!("{:.1}", f)
            } else {
                format!("{:.2}", f)
            }
        }
        Value::String(s) => {
            if s.len() > 20 {
                format!("\"{}...\"", &s[..17])
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(arr) => {
            if arr.len() <= 3 {
                let items: Vec<String> = arr.iter().map(format_value_compact).collect();
                format!("[{}]", items.join(", "))
            } else {
                format!("[{} items]", arr.len())
            }
        }
        Value::Object(obj) => format!("{{...{} keys}}", obj.len()),
    }
}

/// A node being built, with timing information.
#[derive(Debug)]
struct BuildingNode {
    node: PathNode,
    start_time: Instant,
}

/// Builder for constructing execution traces with an explicit push/pop
/// stack, mirroring `RuleContext`'s own trace cursor (§4.2).
///
/// Pushing attaches a new node as a child of the current top-of-stack node
/// and makes it the new top; popping finalizes the current node (recording
/// its duration) and restores its parent as the cursor. Every push on every
/// control path — including early returns inside short-circuiting
/// evaluation — must be matched by a pop.
#[derive(Debug)]
pub struct TraceBuilder {
    stack: Vec<BuildingNode>,
    enabled: bool,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    /// Create a builder with tracing enabled.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            enabled: true,
        }
    }

    /// Create a builder that silently discards all operations.
    pub fn disabled() -> Self {
        Self {
            stack: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Push a new node, entering a new evaluation step.
    pub fn push(&mut self, name: impl Into<String>, kind: PathKind) {
        if !self.enabled {
            return;
        }
        self.stack.push(BuildingNode {
            node: PathNode::new(kind, name),
            start_time: Instant::now(),
        });
    }

    /// Set the result of the current (top-of-stack) node.
    pub fn set_result(&mut self, result: Value) {
        if !self.enabled {
            return;
        }
        if let Some(current) = self.stack.last_mut() {
            current.node.result = Some(result);
        }
    }

    /// Attach a detail entry to the current (top-of-stack) node.
    pub fn set_detail(&mut self, key: impl Into<String>, value: Value) {
        if !self.enabled {
            return;
        }
        if let Some(current) = self.stack.last_mut() {
            current.node.details.insert(key.into(), value);
        }
    }

    /// Pop the current node, attaching it as a child of its parent (if any).
    ///
    /// Returns the popped node; if it was the last node on the stack, that
    /// is the completed root.
    pub fn pop(&mut self) -> Option<PathNode> {
        if !self.enabled {
            return None;
        }
        let building = self.stack.pop()?;
        let duration = building.start_time.elapsed().as_micros() as u64;

        let mut completed = building.node;
        completed.duration_us = Some(duration);

        if let Some(parent) = self.stack.last_mut() {
            parent.node.children.push(completed.clone());
        }

        Some(completed)
    }

    /// Consume the builder, popping any remaining nodes and returning the root.
    pub fn build(mut self) -> Option<PathNode> {
        if !self.enabled {
            return None;
        }
        let mut result = None;
        while !self.stack.is_empty() {
            result = self.pop();
        }
        result
    }

    /// Current stack depth (1 once the root has been pushed).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// RAII guard that pushes on construction and pops on drop, so an early
/// return via `?` inside a scope still balances the trace stack (§9,
/// "Trace cursor as an explicit stack").
pub struct TraceGuard<'a> {
    builder: &'a mut TraceBuilder,
    popped: bool,
}

impl<'a> TraceGuard<'a> {
    pub fn enter(builder: &'a mut TraceBuilder, name: impl Into<String>, kind: PathKind) -> Self {
        builder.push(name, kind);
        Self {
            builder,
            popped: false,
        }
    }

    pub fn set_result(&mut self, result: Value) {
        self.builder.set_result(result);
    }

    pub fn set_detail(&mut self, key: impl Into<String>, value: Value) {
        self.builder.set_detail(key, value);
    }
}

impl Drop for TraceGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.builder.pop();
            self.popped = true;
        }
    }
}
