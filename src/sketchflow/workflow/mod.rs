//! Workflow data model.
//!
//! A workflow is a labelled directed acyclic graph plus declarative
//! metadata: typed [`Node`]s connected by labelled [`Edge`]s, a unified
//! [`Variable`] list (user inputs and derived values alike), and declared
//! [`OutputSpec`]s. Identifiers visible to the LLM are content-derived:
//! node ids are random (`node_<8 hex>`), variable ids are deterministic
//! slugs of name + source + type so that renames are observable.

pub mod compile;
pub mod store;
pub mod validator;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Node kinds understood by the canvas and the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Process,
    Decision,
    Subprocess,
    End,
}

impl NodeType {
    /// Parse the wire spelling used by tool arguments.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "start" => Some(Self::Start),
            "process" => Some(Self::Process),
            "decision" => Some(Self::Decision),
            "subprocess" => Some(Self::Subprocess),
            "end" => Some(Self::End),
            _ => None,
        }
    }

    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Process => "process",
            Self::Decision => "decision",
            Self::Subprocess => "subprocess",
            Self::End => "end",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canvas color assigned per node type.
pub fn node_color(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "teal",
        NodeType::Decision => "amber",
        NodeType::End => "green",
        NodeType::Subprocess => "rose",
        NodeType::Process => "slate",
    }
}

/// Condition attached to a decision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Variable id this decision evaluates.
    pub input_id: String,
    /// Comparator; the valid set depends on the referenced variable's type.
    pub comparator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Upper bound for range comparators (`within_range`, `date_between`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
}

/// One node of the workflow graph.
///
/// Typed fields beyond the common set are optional and populated per node
/// type: decisions carry `condition`, subprocesses carry the subflow
/// binding, end nodes carry the output shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subworkflow_id: Option<String>,
    /// Parent variable name → subflow variable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_mapping: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_variable: Option<String>,
}

impl Node {
    /// Create a bare node of the given type with the canvas color applied.
    pub fn new(id: impl Into<String>, node_type: NodeType, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type,
            label: label.into(),
            x: 0.0,
            y: 0.0,
            color: node_color(node_type).to_string(),
            condition: None,
            input_ref: None,
            output_type: None,
            output_template: None,
            output_value: None,
            subworkflow_id: None,
            input_mapping: None,
            output_variable: None,
        }
    }
}

/// Generate a fresh node id (`node_<8 hex>`).
pub fn generate_node_id() -> String {
    format!("node_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Generate a fresh workflow id (`wf_<8 hex>`).
pub fn generate_workflow_id() -> String {
    format!("wf_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// A directed edge. The id is always `<from>-><to>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: String,
}

impl Edge {
    /// Build an edge with its canonical id.
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> Self {
        let from = from.into();
        let to = to.into();
        Self {
            id: format!("{}->{}", from, to),
            from,
            to,
            label: label.into(),
        }
    }
}

/// Where a variable's value comes from at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableSource {
    Input,
    Subprocess,
    Calculated,
    Constant,
}

impl VariableSource {
    /// Abbreviated prefix used inside derived variable ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Input => "",
            Self::Subprocess => "sub",
            Self::Calculated => "calc",
            Self::Constant => "const",
        }
    }
}

/// Numeric range constraint for number-typed variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VariableRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// A workflow variable. The unified list covers user inputs and derived
/// values; `source` distinguishes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: String,
    pub source: VariableSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<VariableRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

/// A declared output of the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The graph slice of a workflow as rendered on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CanvasWorkflow {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl CanvasWorkflow {
    /// Look up a node position by id.
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Slugify a variable name: lowercase, non-alphanumeric runs collapsed to a
/// single underscore, leading/trailing underscores stripped.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Generate a deterministic variable id from name, internal type, and
/// source.
///
/// `var_<slug>_<type>` for inputs, `var_<prefix>_<slug>_<type>` for derived
/// variables. Renaming or retyping a variable therefore changes its id.
pub fn generate_variable_id(name: &str, internal_type: &str, source: VariableSource) -> String {
    let slug = {
        let s = slugify(name);
        if s.is_empty() {
            "input".to_string()
        } else {
            s
        }
    };
    match source {
        VariableSource::Input => format!("var_{}_{}", slug, internal_type),
        other => format!("var_{}_{}_{}", other.id_prefix(), slug, internal_type),
    }
}

/// Case-insensitive, whitespace-trimmed name used for duplicate checks.
pub fn normalize_variable_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Comparators valid for a variable of the given internal type.
pub fn comparators_for_type(var_type: &str) -> &'static [&'static str] {
    match var_type {
        "int" | "float" | "number" => {
            &["eq", "neq", "lt", "lte", "gt", "gte", "within_range"]
        }
        "bool" => &["is_true", "is_false"],
        "string" => &[
            "str_eq",
            "str_neq",
            "str_contains",
            "str_starts_with",
            "str_ends_with",
        ],
        "date" => &["date_eq", "date_before", "date_after", "date_between"],
        "enum" => &["enum_eq", "enum_neq"],
        _ => &[],
    }
}

/// Validate a decision condition against the variable list.
///
/// Returns a human-readable error when the referenced variable does not
/// exist or the comparator is invalid for its type.
pub fn validate_condition(condition: &Condition, variables: &[Variable]) -> Option<String> {
    let variable = match variables.iter().find(|v| v.id == condition.input_id) {
        Some(v) => v,
        None => {
            let known: Vec<&str> = variables.iter().map(|v| v.id.as_str()).collect();
            return Some(format!(
                "Condition references unknown variable '{}'. Known variables: [{}]",
                condition.input_id,
                known.join(", ")
            ));
        }
    };
    let valid = comparators_for_type(&variable.var_type);
    if !valid.contains(&condition.comparator.as_str()) {
        return Some(format!(
            "Comparator '{}' is not valid for variable '{}' of type '{}'. Valid comparators: [{}]",
            condition.comparator,
            variable.name,
            variable.var_type,
            valid.join(", ")
        ));
    }
    None
}
