//! Workflow validation.
//!
//! Deterministic, side-effect-free checking of a candidate workflow against
//! the structural and completion invariants. The validator never fails with
//! an error of its own; it always returns a verdict plus a list of
//! [`ValidationError`]s with stable codes that tools and tests match on.
//!
//! Two modes:
//! - [`ValidationMode::Lenient`] permits partial workflows (no start node
//!   yet, decisions missing branches or conditions) while still enforcing
//!   referential integrity, acyclicity, and condition validity where a
//!   condition is present.
//! - [`ValidationMode::Strict`] additionally enforces the completion
//!   invariants: exactly one start node, both branches on every decision,
//!   reachable end nodes, resolvable output templates.

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::{validate_condition, CanvasWorkflow, Edge, Node, NodeType, Variable};

/// Stable machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    NodeNotFound,
    InvalidNodeType,
    MultipleStartNodes,
    MissingStartNode,
    CycleDetected,
    SelfLoop,
    InvalidEdgeLabel,
    DuplicateEdgeLabel,
    MaxBranchesReached,
    InvalidCondition,
    UnknownInputReference,
    SubprocessValidationFailed,
    ValidationFailed,
}

impl ValidationCode {
    /// Wire spelling used in tool error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NodeNotFound => "NODE_NOT_FOUND",
            Self::InvalidNodeType => "INVALID_NODE_TYPE",
            Self::MultipleStartNodes => "MULTIPLE_START_NODES",
            Self::MissingStartNode => "MISSING_START_NODE",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::SelfLoop => "SELF_LOOP",
            Self::InvalidEdgeLabel => "INVALID_EDGE_LABEL",
            Self::DuplicateEdgeLabel => "DUPLICATE_EDGE_LABEL",
            Self::MaxBranchesReached => "MAX_BRANCHES_REACHED",
            Self::InvalidCondition => "INVALID_CONDITION",
            Self::UnknownInputReference => "UNKNOWN_INPUT_REFERENCE",
            Self::SubprocessValidationFailed => "SUBPROCESS_VALIDATION_FAILED",
            Self::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation finding: a stable code, a human-readable message, and a
/// pointer to the offending entity (node id, edge id, or variable id).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub code: ValidationCode,
    pub message: String,
    pub entity: Option<String>,
}

impl ValidationError {
    fn new(code: ValidationCode, message: impl Into<String>, entity: Option<&str>) -> Self {
        Self {
            code,
            message: message.into(),
            entity: entity.map(str::to_string),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Validation mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Lenient,
    Strict,
}

/// Candidate state handed to the validator: the staged graph plus the
/// variable list it must resolve conditions and templates against.
#[derive(Debug, Clone, Default)]
pub struct CandidateWorkflow {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub variables: Vec<Variable>,
}

impl CandidateWorkflow {
    /// Stage a candidate from the canvas slice plus the variable list.
    pub fn from_canvas(canvas: &CanvasWorkflow, variables: &[Variable]) -> Self {
        Self {
            nodes: canvas.nodes.clone(),
            edges: canvas.edges.clone(),
            variables: variables.to_vec(),
        }
    }
}

/// Deterministic workflow validator. Stateless; safe to share.
#[derive(Debug, Default, Clone)]
pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check `workflow` against the invariant set for `mode`.
    ///
    /// Returns `(ok, errors)`. `ok` is true iff `errors` is empty.
    pub fn validate(
        &self,
        workflow: &CandidateWorkflow,
        mode: ValidationMode,
    ) -> (bool, Vec<ValidationError>) {
        let mut errors = Vec::new();
        let node_ids: HashSet<&str> = workflow.nodes.iter().map(|n| n.id.as_str()).collect();
        let node_by_id: HashMap<&str, &Node> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        self.check_start_nodes(workflow, mode, &mut errors);
        self.check_edges(workflow, &node_ids, &node_by_id, &mut errors);
        self.check_cycles(workflow, &node_ids, &mut errors);
        self.check_decisions(workflow, mode, &mut errors);
        if mode == ValidationMode::Strict {
            self.check_reachability(workflow, &mut errors);
            self.check_output_templates(workflow, &mut errors);
        }

        (errors.is_empty(), errors)
    }

    /// Render errors as a newline-joined block suitable for tool results.
    pub fn format_errors(&self, errors: &[ValidationError]) -> String {
        errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn check_start_nodes(
        &self,
        workflow: &CandidateWorkflow,
        mode: ValidationMode,
        errors: &mut Vec<ValidationError>,
    ) {
        let starts: Vec<&Node> = workflow
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .collect();
        if starts.len() > 1 {
            let ids: Vec<&str> = starts.iter().map(|n| n.id.as_str()).collect();
            errors.push(ValidationError::new(
                ValidationCode::MultipleStartNodes,
                format!("Workflow has {} start nodes: [{}]", starts.len(), ids.join(", ")),
                Some(ids[1]),
            ));
        }
        if mode == ValidationMode::Strict && starts.is_empty() {
            errors.push(ValidationError::new(
                ValidationCode::MissingStartNode,
                "Workflow has no start node",
                None,
            ));
        }
    }

    fn check_edges(
        &self,
        workflow: &CandidateWorkflow,
        node_ids: &HashSet<&str>,
        node_by_id: &HashMap<&str, &Node>,
        errors: &mut Vec<ValidationError>,
    ) {
        for edge in &workflow.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !node_ids.contains(endpoint.as_str()) {
                    errors.push(ValidationError::new(
                        ValidationCode::NodeNotFound,
                        format!("Edge '{}' references missing node '{}'", edge.id, endpoint),
                        Some(&edge.id),
                    ));
                }
            }
            if edge.from == edge.to {
                errors.push(ValidationError::new(
                    ValidationCode::SelfLoop,
                    format!("Node '{}' connects to itself", edge.from),
                    Some(&edge.id),
                ));
            }
        }

        // Decision branch labels: only true/false, at most one of each, at
        // most two outgoing edges overall.
        let mut outgoing: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &workflow.edges {
            outgoing.entry(edge.from.as_str()).or_default().push(edge);
        }
        for (from, edges) in outgoing {
            let Some(node) = node_by_id.get(from) else {
                continue;
            };
            if node.node_type != NodeType::Decision {
                continue;
            }
            if edges.len() > 2 {
                errors.push(ValidationError::new(
                    ValidationCode::MaxBranchesReached,
                    format!(
                        "Decision node '{}' has {} outgoing edges; a decision has exactly two branches",
                        from,
                        edges.len()
                    ),
                    Some(from),
                ));
            }
            let mut seen_labels: HashMap<&str, &str> = HashMap::new();
            for edge in edges {
                let label = edge.label.as_str();
                if !label.is_empty() && label != "true" && label != "false" {
                    errors.push(ValidationError::new(
                        ValidationCode::InvalidEdgeLabel,
                        format!(
                            "Edge '{}' leaving decision '{}' has label '{}'; decision branches must be labelled 'true' or 'false'",
                            edge.id, from, label
                        ),
                        Some(&edge.id),
                    ));
                    continue;
                }
                if label.is_empty() {
                    continue;
                }
                if seen_labels.insert(label, edge.id.as_str()).is_some() {
                    errors.push(ValidationError::new(
                        ValidationCode::DuplicateEdgeLabel,
                        format!(
                            "Decision node '{}' has more than one '{}' branch",
                            from, label
                        ),
                        Some(&edge.id),
                    ));
                }
            }
        }
    }

    /// Iterative depth-first search with grey/black colouring. On a back
    /// edge the error message carries the cycle path joined with arrows.
    fn check_cycles(
        &self,
        workflow: &CandidateWorkflow,
        node_ids: &HashSet<&str>,
        errors: &mut Vec<ValidationError>,
    ) {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Grey,
            Black,
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &workflow.edges {
            if node_ids.contains(edge.from.as_str()) && node_ids.contains(edge.to.as_str()) {
                adjacency
                    .entry(edge.from.as_str())
                    .or_default()
                    .push(edge.to.as_str());
            }
        }

        let mut color: HashMap<&str, Color> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), Color::White)).collect();

        for root in workflow.nodes.iter().map(|n| n.id.as_str()) {
            if color.get(root) != Some(&Color::White) {
                continue;
            }
            // Each stack frame keeps a cursor into the node's successor
            // list; the stack itself is the current grey path.
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            color.insert(root, Color::Grey);
            while let Some((node, cursor)) = stack.last().copied() {
                let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);
                if cursor >= successors.len() {
                    color.insert(node, Color::Black);
                    stack.pop();
                    continue;
                }
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let next = successors[cursor];
                match color.get(next) {
                    Some(Color::White) => {
                        color.insert(next, Color::Grey);
                        stack.push((next, 0));
                    }
                    Some(Color::Grey) => {
                        let start = stack
                            .iter()
                            .position(|(id, _)| *id == next)
                            .unwrap_or(0);
                        let mut path: Vec<&str> =
                            stack[start..].iter().map(|(id, _)| *id).collect();
                        path.push(next);
                        errors.push(ValidationError::new(
                            ValidationCode::CycleDetected,
                            format!("Workflow contains a cycle: {}", path.join("->")),
                            Some(next),
                        ));
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    fn check_decisions(
        &self,
        workflow: &CandidateWorkflow,
        mode: ValidationMode,
        errors: &mut Vec<ValidationError>,
    ) {
        for node in &workflow.nodes {
            if node.node_type != NodeType::Decision {
                continue;
            }
            match &node.condition {
                Some(condition) => {
                    if let Some(message) = validate_condition(condition, &workflow.variables) {
                        let code = if workflow
                            .variables
                            .iter()
                            .any(|v| v.id == condition.input_id)
                        {
                            ValidationCode::InvalidCondition
                        } else {
                            ValidationCode::UnknownInputReference
                        };
                        errors.push(ValidationError::new(
                            code,
                            format!("Decision '{}': {}", node.label, message),
                            Some(&node.id),
                        ));
                    }
                }
                None if mode == ValidationMode::Strict => {
                    errors.push(ValidationError::new(
                        ValidationCode::InvalidCondition,
                        format!("Decision node '{}' has no condition", node.label),
                        Some(&node.id),
                    ));
                }
                None => {}
            }

            if mode == ValidationMode::Strict {
                let labels: Vec<&str> = workflow
                    .edges
                    .iter()
                    .filter(|e| e.from == node.id)
                    .map(|e| e.label.as_str())
                    .collect();
                if !(labels.len() == 2
                    && labels.contains(&"true")
                    && labels.contains(&"false"))
                {
                    errors.push(ValidationError::new(
                        ValidationCode::ValidationFailed,
                        format!(
                            "Decision node '{}' must have exactly one 'true' and one 'false' branch (found [{}])",
                            node.label,
                            labels.join(", ")
                        ),
                        Some(&node.id),
                    ));
                }
            }
        }
    }

    /// Strict mode: every end node must be reachable from the start node.
    fn check_reachability(&self, workflow: &CandidateWorkflow, errors: &mut Vec<ValidationError>) {
        let Some(start) = workflow.nodes.iter().find(|n| n.node_type == NodeType::Start) else {
            return; // already reported as MISSING_START_NODE
        };
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &workflow.edges {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack = vec![start.id.as_str()];
        while let Some(node) = stack.pop() {
            if !reachable.insert(node) {
                continue;
            }
            if let Some(next) = adjacency.get(node) {
                stack.extend(next.iter().copied());
            }
        }
        for node in &workflow.nodes {
            if node.node_type == NodeType::End && !reachable.contains(node.id.as_str()) {
                errors.push(ValidationError::new(
                    ValidationCode::ValidationFailed,
                    format!("End node '{}' is not reachable from the start node", node.label),
                    Some(&node.id),
                ));
            }
        }
    }

    /// Strict mode: `{placeholder}`s inside output templates must name
    /// existing variables.
    fn check_output_templates(
        &self,
        workflow: &CandidateWorkflow,
        errors: &mut Vec<ValidationError>,
    ) {
        let names: HashSet<String> = workflow
            .variables
            .iter()
            .map(|v| v.name.trim().to_lowercase())
            .collect();
        for node in &workflow.nodes {
            let Some(template) = node.output_template.as_deref() else {
                continue;
            };
            for placeholder in template_placeholders(template) {
                if !names.contains(&placeholder.trim().to_lowercase()) {
                    errors.push(ValidationError::new(
                        ValidationCode::UnknownInputReference,
                        format!(
                            "Output template of '{}' references unknown variable '{}'",
                            node.label, placeholder
                        ),
                        Some(&node.id),
                    ));
                }
            }
        }
    }
}

/// Extract `{placeholder}` names from an interpolation template.
pub fn template_placeholders(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                if !name.is_empty() {
                    out.push(name.to_string());
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketchflow::workflow::{Condition, VariableSource};
    use serde_json::json;

    fn variable(id: &str, name: &str, var_type: &str) -> Variable {
        Variable {
            id: id.into(),
            name: name.into(),
            var_type: var_type.into(),
            source: VariableSource::Input,
            description: None,
            range: None,
            enum_values: None,
        }
    }

    fn decision(id: &str, input_id: &str) -> Node {
        let mut node = Node::new(id, NodeType::Decision, id);
        node.condition = Some(Condition {
            input_id: input_id.into(),
            comparator: "gte".into(),
            value: Some(json!(1)),
            value2: None,
        });
        node
    }

    #[test]
    fn cycle_message_contains_arrow_path() {
        let workflow = CandidateWorkflow {
            nodes: vec![
                Node::new("n1", NodeType::Process, "n1"),
                Node::new("n2", NodeType::Process, "n2"),
                Node::new("n3", NodeType::Process, "n3"),
            ],
            edges: vec![
                Edge::new("n1", "n2", ""),
                Edge::new("n2", "n3", ""),
                Edge::new("n3", "n1", ""),
            ],
            variables: vec![],
        };
        let (ok, errors) = WorkflowValidator::new().validate(&workflow, ValidationMode::Lenient);
        assert!(!ok);
        let cycle = errors
            .iter()
            .find(|e| e.code == ValidationCode::CycleDetected)
            .expect("cycle error");
        assert!(cycle.message.contains("n1->n2->n3->n1") || cycle.message.contains("n2->n3->n1->n2"));
    }

    #[test]
    fn self_loop_is_reported() {
        let workflow = CandidateWorkflow {
            nodes: vec![Node::new("n1", NodeType::Process, "n1")],
            edges: vec![Edge::new("n1", "n1", "")],
            variables: vec![],
        };
        let (_, errors) = WorkflowValidator::new().validate(&workflow, ValidationMode::Lenient);
        assert!(errors.iter().any(|e| e.code == ValidationCode::SelfLoop));
    }

    #[test]
    fn lenient_allows_missing_start_strict_does_not() {
        let workflow = CandidateWorkflow {
            nodes: vec![Node::new("n1", NodeType::Process, "n1")],
            edges: vec![],
            variables: vec![],
        };
        let validator = WorkflowValidator::new();
        let (ok, _) = validator.validate(&workflow, ValidationMode::Lenient);
        assert!(ok);
        let (ok, errors) = validator.validate(&workflow, ValidationMode::Strict);
        assert!(!ok);
        assert!(errors.iter().any(|e| e.code == ValidationCode::MissingStartNode));
    }

    #[test]
    fn duplicate_true_branch_is_reported() {
        let mut workflow = CandidateWorkflow {
            nodes: vec![
                decision("d1", "var_x_int"),
                Node::new("a", NodeType::End, "a"),
                Node::new("b", NodeType::End, "b"),
            ],
            edges: vec![Edge::new("d1", "a", "true"), Edge::new("d1", "b", "true")],
            variables: vec![variable("var_x_int", "x", "int")],
        };
        let (_, errors) =
            WorkflowValidator::new().validate(&workflow, ValidationMode::Lenient);
        assert!(errors
            .iter()
            .any(|e| e.code == ValidationCode::DuplicateEdgeLabel));

        workflow.edges[1].label = "maybe".into();
        let (_, errors) =
            WorkflowValidator::new().validate(&workflow, ValidationMode::Lenient);
        assert!(errors
            .iter()
            .any(|e| e.code == ValidationCode::InvalidEdgeLabel));
    }

    #[test]
    fn strict_requires_both_branches_and_reachable_ends() {
        let workflow = CandidateWorkflow {
            nodes: vec![
                Node::new("s", NodeType::Start, "Start"),
                decision("d1", "var_x_int"),
                Node::new("a", NodeType::End, "a"),
                Node::new("b", NodeType::End, "orphan"),
            ],
            edges: vec![Edge::new("s", "d1", ""), Edge::new("d1", "a", "true")],
            variables: vec![variable("var_x_int", "x", "int")],
        };
        let (ok, errors) = WorkflowValidator::new().validate(&workflow, ValidationMode::Strict);
        assert!(!ok);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("exactly one 'true' and one 'false'")));
        assert!(errors
            .iter()
            .any(|e| e.message.contains("not reachable")));
    }

    #[test]
    fn unknown_condition_reference_uses_dedicated_code() {
        let workflow = CandidateWorkflow {
            nodes: vec![decision("d1", "var_ghost_int")],
            edges: vec![],
            variables: vec![],
        };
        let (_, errors) =
            WorkflowValidator::new().validate(&workflow, ValidationMode::Lenient);
        assert!(errors
            .iter()
            .any(|e| e.code == ValidationCode::UnknownInputReference));
    }

    #[test]
    fn template_placeholder_extraction() {
        assert_eq!(
            template_placeholders("Result: {BMI} and {Category}"),
            vec!["BMI".to_string(), "Category".to_string()]
        );
        assert!(template_placeholders("plain text").is_empty());
    }
}
