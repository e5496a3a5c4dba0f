//! Node and connection editing tools.
//!
//! All tools here require a `workflow_id`, stage the candidate post-state
//! on a copy of the stored record, run the validator in lenient mode, and
//! commit through the workflow store only on success.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

use super::helpers::{
    arg_f64, arg_str, decision_edge_label, failure, load_workflow, resolve_node_id, sync_session,
    validate_subprocess_node, with_state,
};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::workflow::store::WorkflowRecord;
use crate::sketchflow::workflow::validator::{
    CandidateWorkflow, ValidationMode, WorkflowValidator,
};
use crate::sketchflow::workflow::{
    generate_node_id, generate_variable_id, validate_condition, Condition, Edge, Node, NodeType,
    Variable, VariableSource,
};

type ToolOutput = Result<Value, Box<dyn Error + Send + Sync>>;

fn validate_staged(record: &WorkflowRecord) -> Option<Value> {
    let validator = WorkflowValidator::new();
    let candidate = CandidateWorkflow {
        nodes: record.nodes.clone(),
        edges: record.edges.clone(),
        variables: record.variables.clone(),
    };
    let (ok, errors) = validator.validate(&candidate, ValidationMode::Lenient);
    if ok {
        None
    } else {
        Some(failure(validator.format_errors(&errors), "VALIDATION_FAILED"))
    }
}

async fn commit(
    ctx: &ToolContext,
    store: &std::sync::Arc<dyn crate::sketchflow::workflow::store::WorkflowStore>,
    user_id: &str,
    staged: WorkflowRecord,
) -> Result<WorkflowRecord, Value> {
    let nodes = staged.nodes.clone();
    let edges = staged.edges.clone();
    let variables = staged.variables.clone();
    let outputs = staged.outputs.clone();
    let committed = store
        .update(
            &staged.workflow_id,
            user_id,
            Box::new(move |record| {
                record.nodes = nodes;
                record.edges = edges;
                record.variables = variables;
                record.outputs = outputs;
            }),
        )
        .await
        .map_err(super::helpers::store_error_payload)?;
    sync_session(ctx, &committed).await;
    Ok(committed)
}

/// Decode the condition argument for a decision node.
fn parse_condition(raw: &Value) -> Result<Condition, String> {
    serde_json::from_value(raw.clone()).map_err(|_| {
        "Provide a condition object: {input_id: '<variable_id>', comparator: '<comparator>', value: <value>}"
            .to_string()
    })
}

/// Apply end-node and subprocess fields from tool arguments onto a node.
fn apply_typed_fields(node: &mut Node, args: &Value) {
    if node.node_type == NodeType::End {
        node.output_type = Some(
            arg_str(args, "output_type").unwrap_or_else(|| "string".to_string()),
        );
        node.output_template = Some(
            args.get("output_template")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        );
        node.output_value = args.get("output_value").cloned().filter(|v| !v.is_null());
    } else {
        if let Some(output_type) = arg_str(args, "output_type") {
            node.output_type = Some(output_type);
        }
        if let Some(template) = args.get("output_template").and_then(Value::as_str) {
            node.output_template = Some(template.to_string());
        }
        if let Some(value) = args.get("output_value") {
            if !value.is_null() {
                node.output_value = Some(value.clone());
            }
        }
    }

    if let Some(subworkflow_id) = arg_str(args, "subworkflow_id") {
        node.subworkflow_id = Some(subworkflow_id);
    }
    if let Some(mapping) = args.get("input_mapping").and_then(Value::as_object) {
        node.input_mapping = Some(
            mapping
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        );
    }
    if let Some(output_variable) = arg_str(args, "output_variable") {
        node.output_variable = Some(output_variable);
    }
}

/// Register a subprocess node's output variable unless the name is taken.
/// Returns the new variable when one was added.
fn auto_register_output_variable(record: &mut WorkflowRecord, node: &Node) -> Option<Variable> {
    let output_variable = node.output_variable.as_deref()?;
    let wanted = output_variable.trim().to_lowercase();
    let exists = record
        .variables
        .iter()
        .any(|v| v.name.trim().to_lowercase() == wanted);
    if exists {
        return None;
    }
    // Subflow outputs default to string until the user corrects the type
    // with modify_workflow_variable.
    let variable = Variable {
        id: generate_variable_id(output_variable, "string", VariableSource::Subprocess),
        name: output_variable.to_string(),
        var_type: "string".to_string(),
        source: VariableSource::Subprocess,
        description: Some(format!("Output from subprocess '{}'", node.label)),
        range: None,
        enum_values: None,
    };
    record.variables.push(variable.clone());
    Some(variable)
}

/// Add a new node (block) to the workflow.
pub struct AddNodeTool;

#[async_trait]
impl WorkflowTool for AddNodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("add_node", "Add a new node (block) to the workflow.")
            .with_parameter(
                ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new(
                    "type",
                    ToolParameterType::String,
                    "Node type: start, process, decision, subprocess, or end",
                )
                .required()
                .with_enum(&["start", "process", "decision", "subprocess", "end"]),
            )
            .with_parameter(
                ToolParameter::new("label", ToolParameterType::String, "Display text for the node")
                    .required(),
            )
            .with_parameter(ToolParameter::new(
                "x",
                ToolParameterType::Number,
                "X coordinate (optional, auto-positions if omitted)",
            ))
            .with_parameter(ToolParameter::new(
                "y",
                ToolParameterType::Number,
                "Y coordinate (optional, auto-positions if omitted)",
            ))
            .with_parameter(ToolParameter::new(
                "condition",
                ToolParameterType::Object,
                "For decision nodes: {input_id, comparator, value, value2?}",
            ))
            .with_parameter(ToolParameter::new(
                "input_ref",
                ToolParameterType::String,
                "Optional: name of the workflow variable this node checks (case-insensitive)",
            ))
            .with_parameter(ToolParameter::new(
                "output_type",
                ToolParameterType::String,
                "For end nodes: data type of the produced value",
            ))
            .with_parameter(ToolParameter::new(
                "output_template",
                ToolParameterType::String,
                "For end nodes: interpolation template (e.g. 'Result: {BMI}')",
            ))
            .with_parameter(ToolParameter::new(
                "output_value",
                ToolParameterType::String,
                "For end nodes: static value to return",
            ))
            .with_parameter(ToolParameter::new(
                "subworkflow_id",
                ToolParameterType::String,
                "For subprocess: id of the workflow to call as a subflow",
            ))
            .with_parameter(ToolParameter::new(
                "input_mapping",
                ToolParameterType::Object,
                "For subprocess: map of parent variable names to subflow variable names",
            ))
            .with_parameter(ToolParameter::new(
                "output_variable",
                ToolParameterType::String,
                "For subprocess: name of the variable that stores the subflow output",
            ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };

        let Some(raw_type) = arg_str(&args, "type") else {
            return Ok(failure("'type' is required", "INVALID_NODE_TYPE"));
        };
        let Some(node_type) = NodeType::parse(&raw_type) else {
            return Ok(failure(
                format!(
                    "Invalid node type '{}'. Valid types: start, process, decision, subprocess, end",
                    raw_type
                ),
                "INVALID_NODE_TYPE",
            ));
        };
        let Some(label) = arg_str(&args, "label") else {
            return Ok(failure("'label' is required", "INVALID_PARAMETERS"));
        };

        if let Some(input_ref) = arg_str(&args, "input_ref") {
            let wanted = input_ref.trim().to_lowercase();
            let known = record
                .variables
                .iter()
                .any(|v| v.name.trim().to_lowercase() == wanted);
            if !known {
                return Ok(failure(
                    format!(
                        "Variable '{}' not found. Register it first with add_workflow_variable.",
                        input_ref
                    ),
                    "INPUT_NOT_FOUND",
                ));
            }
        }

        let mut node = Node::new(generate_node_id(), node_type, label.clone());
        node.x = arg_f64(&args, "x").unwrap_or(0.0);
        node.y = arg_f64(&args, "y").unwrap_or(0.0);
        node.input_ref = arg_str(&args, "input_ref");
        apply_typed_fields(&mut node, &args);

        match args.get("condition") {
            Some(raw) if !raw.is_null() => match parse_condition(raw) {
                Ok(condition) => {
                    if node_type == NodeType::Decision {
                        if let Some(message) = validate_condition(&condition, &record.variables) {
                            return Ok(failure(
                                format!("Invalid condition for decision node '{}': {}", label, message),
                                "INVALID_CONDITION",
                            ));
                        }
                    }
                    node.condition = Some(condition);
                }
                Err(message) => return Ok(failure(message, "INVALID_CONDITION")),
            },
            _ if node_type == NodeType::Decision => {
                return Ok(failure(
                    format!(
                        "Decision node '{}' requires a 'condition' object. Provide: {{input_id: '<variable_id>', comparator: '<comparator>', value: <value>}}",
                        label
                    ),
                    "INVALID_CONDITION",
                ));
            }
            _ => {}
        }

        let mut staged = record;
        if node_type == NodeType::Subprocess {
            let names: Vec<String> = staged.variables.iter().map(|v| v.name.clone()).collect();
            let errors = validate_subprocess_node(&node, &store, &user_id, &names).await;
            if !errors.is_empty() {
                return Ok(failure(errors.join("\n"), "SUBPROCESS_VALIDATION_FAILED"));
            }
            auto_register_output_variable(&mut staged, &node);
        }
        staged.nodes.push(node.clone());

        if let Some(payload) = validate_staged(&staged) {
            return Ok(payload);
        }
        let committed = match commit(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "action": "add_node",
                "node": node,
                "message": format!("Added {} node '{}'", node_type, label),
            }),
            &committed,
        ))
    }
}

/// Modify an existing node in place.
pub struct ModifyNodeTool;

#[async_trait]
impl WorkflowTool for ModifyNodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "modify_node",
            "Update fields of an existing node. node_id accepts a node id or a unique label.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "node_id",
                ToolParameterType::String,
                "Node id or unique label of the node to modify",
            )
            .required(),
        )
        .with_parameter(ToolParameter::new("label", ToolParameterType::String, "New label"))
        .with_parameter(ToolParameter::new(
            "type",
            ToolParameterType::String,
            "New node type",
        ))
        .with_parameter(ToolParameter::new("x", ToolParameterType::Number, "New X coordinate"))
        .with_parameter(ToolParameter::new("y", ToolParameterType::Number, "New Y coordinate"))
        .with_parameter(ToolParameter::new(
            "condition",
            ToolParameterType::Object,
            "New decision condition",
        ))
        .with_parameter(ToolParameter::new(
            "output_template",
            ToolParameterType::String,
            "New output template for end nodes",
        ))
        .with_parameter(ToolParameter::new(
            "output_type",
            ToolParameterType::String,
            "New output type for end nodes",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let Some(reference) = arg_str(&args, "node_id") else {
            return Ok(failure("'node_id' is required", "NODE_NOT_FOUND"));
        };
        let node_id = match resolve_node_id(&reference, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };

        let mut staged = record;
        let Some(index) = staged.nodes.iter().position(|n| n.id == node_id) else {
            return Ok(failure(format!("Node not found: {}", node_id), "NODE_NOT_FOUND"));
        };
        {
            let node = &mut staged.nodes[index];
            if let Some(label) = arg_str(&args, "label") {
                node.label = label;
            }
            if let Some(raw_type) = arg_str(&args, "type") {
                match NodeType::parse(&raw_type) {
                    Some(node_type) => {
                        node.node_type = node_type;
                        node.color = crate::sketchflow::workflow::node_color(node_type).to_string();
                    }
                    None => {
                        return Ok(failure(
                            format!("Invalid node type '{}'", raw_type),
                            "INVALID_NODE_TYPE",
                        ))
                    }
                }
            }
            if let Some(x) = arg_f64(&args, "x") {
                node.x = x;
            }
            if let Some(y) = arg_f64(&args, "y") {
                node.y = y;
            }
            if let Some(raw) = args.get("condition") {
                if raw.is_null() {
                    node.condition = None;
                } else {
                    match parse_condition(raw) {
                        Ok(condition) => node.condition = Some(condition),
                        Err(message) => return Ok(failure(message, "INVALID_CONDITION")),
                    }
                }
            }
            apply_typed_fields_for_modify(node, &args);
        }

        // Re-validate the condition whenever the node ends up a decision.
        let node = staged.nodes[index].clone();
        if node.node_type == NodeType::Decision {
            if let Some(condition) = &node.condition {
                if let Some(message) = validate_condition(condition, &staged.variables) {
                    return Ok(failure(
                        format!("Invalid condition for decision node: {}", message),
                        "INVALID_CONDITION",
                    ));
                }
            }
        }

        if let Some(payload) = validate_staged(&staged) {
            return Ok(payload);
        }
        let committed = match commit(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "action": "modify_node",
                "node": node,
                "message": format!("Modified node {}", node_id),
            }),
            &committed,
        ))
    }
}

fn apply_typed_fields_for_modify(node: &mut Node, args: &Value) {
    if let Some(output_type) = arg_str(args, "output_type") {
        node.output_type = Some(output_type);
    }
    if let Some(template) = args.get("output_template").and_then(Value::as_str) {
        node.output_template = Some(template.to_string());
    }
    if let Some(value) = args.get("output_value") {
        if !value.is_null() {
            node.output_value = Some(value.clone());
        }
    }
    if let Some(input_ref) = arg_str(args, "input_ref") {
        node.input_ref = Some(input_ref);
    }
    if let Some(subworkflow_id) = arg_str(args, "subworkflow_id") {
        node.subworkflow_id = Some(subworkflow_id);
    }
    if let Some(mapping) = args.get("input_mapping").and_then(Value::as_object) {
        node.input_mapping = Some(
            mapping
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        );
    }
    if let Some(output_variable) = arg_str(args, "output_variable") {
        node.output_variable = Some(output_variable);
    }
}

/// Delete a node and every incident edge.
pub struct DeleteNodeTool;

#[async_trait]
impl WorkflowTool for DeleteNodeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "delete_node",
            "Remove a node and all edges connected to it.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "node_id",
                ToolParameterType::String,
                "Node id or unique label of the node to delete",
            )
            .required(),
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let Some(reference) = arg_str(&args, "node_id") else {
            return Ok(failure("'node_id' is required", "NODE_NOT_FOUND"));
        };
        let node_id = match resolve_node_id(&reference, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };

        let mut staged = record;
        staged.nodes.retain(|n| n.id != node_id);
        staged
            .edges
            .retain(|e| e.from != node_id && e.to != node_id);

        if let Some(payload) = validate_staged(&staged) {
            return Ok(payload);
        }
        let committed = match commit(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "action": "delete_node",
                "node_id": node_id,
                "message": format!("Deleted node {}", node_id),
            }),
            &committed,
        ))
    }
}

/// Connect two nodes with an edge.
pub struct AddConnectionTool;

#[async_trait]
impl WorkflowTool for AddConnectionTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "add_connection",
            "Create an edge connecting two nodes. Edges leaving a decision node are labelled \
             'true'/'false'; omit the label to auto-assign the next free branch.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("from_node_id", ToolParameterType::String, "Source node id or label")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("to_node_id", ToolParameterType::String, "Target node id or label")
                .required(),
        )
        .with_parameter(ToolParameter::new(
            "label",
            ToolParameterType::String,
            "Edge label (e.g. 'true', 'false', or empty)",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let from_ref = arg_str(&args, "from_node_id").or_else(|| arg_str(&args, "from"));
        let to_ref = arg_str(&args, "to_node_id").or_else(|| arg_str(&args, "to"));
        let (Some(from_ref), Some(to_ref)) = (from_ref, to_ref) else {
            return Ok(failure(
                "'from_node_id' and 'to_node_id' are required",
                "NODE_NOT_FOUND",
            ));
        };
        let from_id = match resolve_node_id(&from_ref, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };
        let to_id = match resolve_node_id(&to_ref, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };

        let requested = args.get("label").and_then(Value::as_str);
        let label = match decision_edge_label(&from_id, requested, &record.nodes, &record.edges) {
            Ok(label) => label,
            Err(payload) => return Ok(payload),
        };

        let edge = Edge::new(from_id.clone(), to_id.clone(), label);
        let mut staged = record;
        staged.edges.push(edge.clone());

        if let Some(payload) = validate_staged(&staged) {
            return Ok(payload);
        }
        let committed = match commit(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "action": "add_connection",
                "edge": edge,
                "message": format!("Connected {} to {}", from_id, to_id),
            }),
            &committed,
        ))
    }
}

/// Remove the edge between two nodes.
pub struct DeleteConnectionTool;

#[async_trait]
impl WorkflowTool for DeleteConnectionTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("delete_connection", "Remove the edge between two nodes.")
            .with_parameter(
                ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                    .required(),
            )
            .with_parameter(
                ToolParameter::new(
                    "from_node_id",
                    ToolParameterType::String,
                    "Source node id or label",
                )
                .required(),
            )
            .with_parameter(
                ToolParameter::new(
                    "to_node_id",
                    ToolParameterType::String,
                    "Target node id or label",
                )
                .required(),
            )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let from_ref = arg_str(&args, "from_node_id").or_else(|| arg_str(&args, "from"));
        let to_ref = arg_str(&args, "to_node_id").or_else(|| arg_str(&args, "to"));
        let (Some(from_ref), Some(to_ref)) = (from_ref, to_ref) else {
            return Ok(failure(
                "'from_node_id' and 'to_node_id' are required",
                "NODE_NOT_FOUND",
            ));
        };
        let from_id = match resolve_node_id(&from_ref, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };
        let to_id = match resolve_node_id(&to_ref, &record.nodes) {
            Ok(id) => id,
            Err(message) => return Ok(failure(message, "NODE_NOT_FOUND")),
        };

        let mut staged = record;
        staged.edges.retain(|e| !(e.from == from_id && e.to == to_id));
        let committed = match commit(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "action": "delete_connection",
                "from_node_id": from_id,
                "to_node_id": to_id,
                "edge_id": format!("{}->{}", from_id, to_id),
                "message": format!("Removed connection {} -> {}", from_id, to_id),
            }),
            &committed,
        ))
    }
}

/// Read back the normalized workflow plus a human-readable summary.
pub struct GetCurrentWorkflowTool;

#[async_trait]
impl WorkflowTool for GetCurrentWorkflowTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "get_current_workflow",
            "Return the workflow's nodes, edges, variables, and outputs with a summary.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to read")
                .required(),
        )
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (_, _, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };

        let mut summary = vec![format!(
            "Workflow '{}' ({}): {} nodes, {} edges, {} variables, {} outputs.",
            record.name,
            if record.is_draft { "draft" } else { "published" },
            record.nodes.len(),
            record.edges.len(),
            record.variables.len(),
            record.outputs.len(),
        )];
        if !record.variables.is_empty() {
            summary.push("Variables:".to_string());
            for variable in &record.variables {
                summary.push(format!("- {} ({})", variable.name, variable.var_type));
            }
        }
        if !record.outputs.is_empty() {
            summary.push("Outputs:".to_string());
            for output in &record.outputs {
                summary.push(format!("- {} ({})", output.name, output.output_type));
            }
        }

        Ok(with_state(
            json!({
                "success": true,
                "action": "get_current_workflow",
                "workflow": {
                    "workflow_id": record.workflow_id,
                    "name": record.name,
                    "description": record.description,
                    "output_type": record.output_type,
                    "is_draft": record.is_draft,
                    "nodes": record.nodes,
                    "edges": record.edges,
                    "variables": record.variables,
                    "outputs": record.outputs,
                },
                "summary": summary.join("\n"),
            }),
            &record,
        ))
    }
}
