//! Execution tracing for audit trails
//!
//! Every evaluation produces a [`PathNode`] tree that mirrors the evaluator's
//! call stack: the root `evaluation` node, the requirements check, one node
//! per action, and beneath those every operation and `$name` resolution.
//! The tree is the explanation of a decision and never influences results.
//!
//! # Example
//!
//! ```ignore
//! use machine_law_engine::trace::TraceBuilder;
//! use machine_law_engine::{PathNodeType, Value};
//!
//! let mut builder = TraceBuilder::new();
//! builder.push("evaluation", PathNodeType::Root);
//! builder.push("Operation: ADD", PathNodeType::Operation);
//! builder.set_result(Value::Int(1200));
//! builder.pop();
//! let root = builder.build();
//! ```

use crate::types::{PathNodeType, ResolveType, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::Instant;

/// Durations below this are left out of rendered traces.
const RENDER_MIN_DURATION_US: u64 = 100;

/// One step of an evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct PathNode {
    pub node_type: PathNodeType,

    /// Variable path, operation label or output name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Resolver that answered a `Resolve` node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_type: Option<ResolveType>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,

    /// Operand values, branch decisions and type metadata
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PathNode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
}

impl PathNode {
    pub fn new(node_type: PathNodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            result: None,
            resolve_type: None,
            required: false,
            details: BTreeMap::new(),
            children: Vec::new(),
            duration_us: None,
        }
    }

    /// Depth-first search for the first node with the given name.
    pub fn find(&self, name: &str) -> Option<&PathNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// Number of nodes in this subtree.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(PathNode::node_count).sum::<usize>()
    }

    /// Render the tree for logs and test failures.
    ///
    /// ```text
    /// evaluation (root)
    /// +-- requirements (requirements) = true
    /// `-- net (action) = 1050
    ///     `-- Operation: SUBTRACT (operation) = 1050
    ///         +-- gross (resolve) [OUTPUT] = 1200
    ///         `-- tax (resolve) [PARAMETER] = 150
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, "", "");
        // the last line carries a newline we do not want
        out.truncate(out.trim_end().len());
        out
    }

    fn render_into(&self, out: &mut String, lead: &str, indent: &str) {
        // writing into a String cannot fail
        let _ = write!(out, "{}{} ({})", lead, self.name, self.node_type.as_str());
        if let Some(resolve_type) = self.resolve_type {
            let _ = write!(out, " [{}]", resolve_type.as_str());
        }
        if self.required {
            out.push_str(" *");
        }
        if let Some(result) = &self.result {
            let _ = write!(out, " = {}", Summary(result));
        }
        if let Some(duration) = self.duration_us.filter(|d| *d >= RENDER_MIN_DURATION_US) {
            let _ = write!(out, " ({}us)", duration);
        }
        out.push('\n');

        let mut children = self.children.iter().peekable();
        while let Some(child) = children.next() {
            let (branch, rest) = match children.peek() {
                Some(_) => ("+-- ", "|   "),
                None => ("`-- ", "    "),
            };
            child.render_into(out, &format!("{indent}{branch}"), &format!("{indent}{rest}"));
        }
    }
}

/// Short form of a value for rendered traces.
struct Summary<'a>(&'a Value);

impl fmt::Display for Summary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const MAX_CHARS: usize = 20;
        const MAX_ITEMS: usize = 3;

        match self.0 {
            Value::Float(x) if x.fract() == 0.0 => write!(f, "{:.1}", x),
            Value::Float(x) => write!(f, "{:.2}", x),
            Value::String(s) if s.chars().count() > MAX_CHARS => {
                let head: String = s.chars().take(MAX_CHARS - 3).collect();
                write!(f, "\"{}...\"", head)
            }
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Array(items) if items.len() > MAX_ITEMS => write!(f, "[{} items]", items.len()),
            Value::Array(items) => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", Summary(item))?;
                }
                f.write_char(']')
            }
            Value::Object(map) => write!(f, "{{...{} keys}}", map.len()),
            other => write!(f, "{}", other),
        }
    }
}

/// Stack-based builder for the trace tree.
///
/// Nodes are pushed when entering a scope and popped when leaving; a popped
/// node becomes the last child of the node below it. Setters act on the top
/// node and do nothing on an empty stack.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    open: Vec<(PathNode, Instant)>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&mut self) -> Option<&mut PathNode> {
        self.open.last_mut().map(|(node, _)| node)
    }

    pub fn push(&mut self, name: impl Into<String>, node_type: PathNodeType) {
        self.open
            .push((PathNode::new(node_type, name), Instant::now()));
    }

    pub fn set_result(&mut self, result: Value) {
        if let Some(node) = self.current() {
            node.result = Some(result);
        }
    }

    pub fn set_resolve_type(&mut self, resolve_type: ResolveType) {
        if let Some(node) = self.current() {
            node.resolve_type = Some(resolve_type);
        }
    }

    pub fn set_required(&mut self, required: bool) {
        if let Some(node) = self.current() {
            node.required = required;
        }
    }

    pub fn add_detail(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(node) = self.current() {
            node.details.insert(key.into(), value.into());
        }
    }

    /// Hang a finished subtree, such as a nested law's trace, below the top
    /// node.
    pub fn attach(&mut self, subtree: PathNode) {
        if let Some(node) = self.current() {
            node.children.push(subtree);
        }
    }

    /// Close the top node.
    ///
    /// Returns it only when it was the outermost node; otherwise it becomes
    /// a child of the node below.
    pub fn pop(&mut self) -> Option<PathNode> {
        let (mut node, started) = self.open.pop()?;
        node.duration_us = Some(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));
        match self.current() {
            Some(parent) => {
                parent.children.push(node);
                None
            }
            None => Some(node),
        }
    }

    /// Close every open node and return the outermost one.
    pub fn build(mut self) -> Option<PathNode> {
        let mut root = None;
        while !self.open.is_empty() {
            root = self.pop();
        }
        root
    }
}
