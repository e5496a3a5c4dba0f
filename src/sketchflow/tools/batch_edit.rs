//! Atomic multi-operation editing.
//!
//! `batch_edit_workflow` stages every operation on a single candidate
//! state, resolving temp ids introduced earlier in the same batch, then
//! validates the final state and commits all-or-nothing. Lenient validation
//! lets the batch build a workflow incrementally (a decision can gain its
//! branches later in the same batch or in a later call), while
//! no-self-loop, no-cycle, and condition invariants always hold.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;

use super::helpers::{
    arg_f64, arg_str, decision_edge_label, failure, load_workflow, resolve_node_id, sync_session,
    validate_subprocess_node, with_state,
};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::workflow::store::{WorkflowRecord, WorkflowStore};
use crate::sketchflow::workflow::validator::{
    CandidateWorkflow, ValidationMode, WorkflowValidator,
};
use crate::sketchflow::workflow::{
    generate_node_id, generate_variable_id, validate_condition, Condition, Edge, Node, NodeType,
    Variable, VariableSource,
};

/// Apply multiple workflow changes in one atomic operation.
pub struct BatchEditWorkflowTool;

#[async_trait]
impl WorkflowTool for BatchEditWorkflowTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "batch_edit_workflow",
            "Apply multiple workflow changes in a single atomic operation. Each operation has \
             an 'op' (add_node, modify_node, delete_node, add_connection, delete_connection) \
             plus its parameters. New nodes may carry a temporary 'id' (e.g. 'temp_1') that \
             later operations in the same batch can reference. Decision nodes require a \
             'condition' object; decision branches are labelled 'true'/'false' and auto-assign \
             when the label is omitted. Validation is lenient, so branches can be added later.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "operations",
                ToolParameterType::Array,
                "List of operations to perform. Each operation has 'op' and parameters.",
            )
            .required(),
        )
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let Some(operations) = args.get("operations").and_then(Value::as_array) else {
            return Ok(failure("operations must be an array", "INVALID_PARAMETERS"));
        };

        let mut staged = record;
        let mut temp_id_map: HashMap<String, String> = HashMap::new();
        let mut applied: Vec<Value> = Vec::new();

        for op in operations {
            let op_type = op.get("op").and_then(Value::as_str).unwrap_or("");
            let outcome = match op_type {
                "add_node" => {
                    stage_add_node(op, &mut staged, &mut temp_id_map, &store, &user_id).await
                }
                "modify_node" => stage_modify_node(op, &mut staged, &temp_id_map),
                "delete_node" => stage_delete_node(op, &mut staged, &temp_id_map),
                "add_connection" => stage_add_connection(op, &mut staged, &temp_id_map),
                "delete_connection" => stage_delete_connection(op, &mut staged, &temp_id_map),
                other => Err(format!("Unknown operation type: {}", other)),
            };
            match outcome {
                Ok(entry) => applied.push(entry),
                Err(message) => {
                    return Ok(failure(
                        format!("Failed to apply operations: {}", message),
                        "VALIDATION_FAILED",
                    ))
                }
            }
        }

        let validator = WorkflowValidator::new();
        let candidate = CandidateWorkflow {
            nodes: staged.nodes.clone(),
            edges: staged.edges.clone(),
            variables: staged.variables.clone(),
        };
        let (ok, errors) = validator.validate(&candidate, ValidationMode::Lenient);
        if !ok {
            return Ok(failure(validator.format_errors(&errors), "VALIDATION_FAILED"));
        }

        let nodes = staged.nodes.clone();
        let edges = staged.edges.clone();
        let variables = staged.variables.clone();
        let committed = match store
            .update(
                &staged.workflow_id,
                &user_id,
                Box::new(move |r| {
                    r.nodes = nodes;
                    r.edges = edges;
                    r.variables = variables;
                }),
            )
            .await
        {
            Ok(record) => record,
            Err(err) => return Ok(super::helpers::store_error_payload(err)),
        };
        sync_session(ctx, &committed).await;

        let count = applied.len();
        Ok(with_state(
            json!({
                "success": true,
                "action": "batch_edit",
                "workflow": {
                    "nodes": committed.nodes,
                    "edges": committed.edges,
                    "variables": committed.variables,
                },
                "operations": applied,
                "operation_count": count,
                "message": format!("Applied {} operations successfully", count),
            }),
            &committed,
        ))
    }
}

fn resolve_batch_id(
    reference: &str,
    temp_id_map: &HashMap<String, String>,
    nodes: &[Node],
) -> Result<String, String> {
    // A temp id minted earlier in this batch takes priority.
    if let Some(real) = temp_id_map.get(reference) {
        return Ok(real.clone());
    }
    resolve_node_id(reference, nodes)
}

async fn stage_add_node(
    op: &Value,
    staged: &mut WorkflowRecord,
    temp_id_map: &mut HashMap<String, String>,
    store: &std::sync::Arc<dyn WorkflowStore>,
    user_id: &str,
) -> Result<Value, String> {
    let raw_type = op
        .get("type")
        .and_then(Value::as_str)
        .ok_or("add_node requires 'type'")?;
    let node_type = NodeType::parse(raw_type)
        .ok_or_else(|| format!("Invalid node type '{}'", raw_type))?;
    let label = op
        .get("label")
        .and_then(Value::as_str)
        .ok_or("add_node requires 'label'")?
        .to_string();

    let real_id = generate_node_id();
    if let Some(temp_id) = op.get("id").and_then(Value::as_str) {
        temp_id_map.insert(temp_id.to_string(), real_id.clone());
    }

    let mut node = Node::new(real_id, node_type, label.clone());
    node.x = arg_f64(op, "x").unwrap_or(0.0);
    node.y = arg_f64(op, "y").unwrap_or(0.0);

    match op.get("condition") {
        Some(raw) if !raw.is_null() => {
            let condition: Condition = serde_json::from_value(raw.clone()).map_err(|_| {
                format!(
                    "Invalid condition for node '{}': provide {{input_id, comparator, value}}",
                    label
                )
            })?;
            if node_type == NodeType::Decision {
                if let Some(message) = validate_condition(&condition, &staged.variables) {
                    return Err(format!(
                        "Invalid condition for decision node '{}': {}",
                        label, message
                    ));
                }
            }
            node.condition = Some(condition);
        }
        _ if node_type == NodeType::Decision => {
            return Err(format!(
                "Decision node '{}' requires a 'condition' object. Provide: {{input_id: '<variable_id>', comparator: '<comparator>', value: <value>}}",
                label
            ));
        }
        _ => {}
    }

    if node_type == NodeType::End {
        node.output_type = Some(
            op.get("output_type")
                .and_then(Value::as_str)
                .unwrap_or("string")
                .to_string(),
        );
        node.output_template = Some(
            op.get("output_template")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
        );
        node.output_value = op.get("output_value").cloned().filter(|v| !v.is_null());
    }

    if let Some(subworkflow_id) = arg_str(op, "subworkflow_id") {
        node.subworkflow_id = Some(subworkflow_id);
    }
    if let Some(mapping) = op.get("input_mapping").and_then(Value::as_object) {
        node.input_mapping = Some(
            mapping
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
        );
    }
    if let Some(output_variable) = arg_str(op, "output_variable") {
        node.output_variable = Some(output_variable.clone());
        if node_type == NodeType::Subprocess {
            let wanted = output_variable.trim().to_lowercase();
            let exists = staged
                .variables
                .iter()
                .any(|v| v.name.trim().to_lowercase() == wanted);
            if !exists {
                staged.variables.push(Variable {
                    id: generate_variable_id(&output_variable, "string", VariableSource::Subprocess),
                    name: output_variable,
                    var_type: "string".to_string(),
                    source: VariableSource::Subprocess,
                    description: Some(format!("Output from subprocess '{}'", label)),
                    range: None,
                    enum_values: None,
                });
            }
        }
    }

    if node_type == NodeType::Subprocess {
        let names: Vec<String> = staged.variables.iter().map(|v| v.name.clone()).collect();
        let errors = validate_subprocess_node(&node, store, user_id, &names).await;
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
    }

    staged.nodes.push(node.clone());
    Ok(json!({"op": "add_node", "node": node}))
}

fn stage_modify_node(
    op: &Value,
    staged: &mut WorkflowRecord,
    temp_id_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let reference = op
        .get("node_id")
        .and_then(Value::as_str)
        .ok_or("modify_node requires 'node_id'")?;
    let node_id = resolve_batch_id(reference, temp_id_map, &staged.nodes)?;
    let index = staged
        .nodes
        .iter()
        .position(|n| n.id == node_id)
        .ok_or_else(|| format!("Node not found: {}", node_id))?;

    let mut updates = serde_json::Map::new();
    {
        let node = &mut staged.nodes[index];
        if let Some(label) = op.get("label").and_then(Value::as_str) {
            node.label = label.to_string();
            updates.insert("label".into(), json!(label));
        }
        if let Some(raw_type) = op.get("type").and_then(Value::as_str) {
            let node_type = NodeType::parse(raw_type)
                .ok_or_else(|| format!("Invalid node type '{}'", raw_type))?;
            node.node_type = node_type;
            node.color = crate::sketchflow::workflow::node_color(node_type).to_string();
            updates.insert("type".into(), json!(raw_type));
        }
        if let Some(x) = arg_f64(op, "x") {
            node.x = x;
            updates.insert("x".into(), json!(x));
        }
        if let Some(y) = arg_f64(op, "y") {
            node.y = y;
            updates.insert("y".into(), json!(y));
        }
        if let Some(raw) = op.get("condition") {
            if raw.is_null() {
                node.condition = None;
            } else {
                let condition: Condition = serde_json::from_value(raw.clone())
                    .map_err(|_| "Invalid condition object".to_string())?;
                node.condition = Some(condition);
            }
            updates.insert("condition".into(), raw.clone());
        }
        if let Some(template) = op.get("output_template").and_then(Value::as_str) {
            node.output_template = Some(template.to_string());
            updates.insert("output_template".into(), json!(template));
        }
        if let Some(output_type) = op.get("output_type").and_then(Value::as_str) {
            node.output_type = Some(output_type.to_string());
            updates.insert("output_type".into(), json!(output_type));
        }
    }

    let node = staged.nodes[index].clone();
    if node.node_type == NodeType::Decision {
        if let Some(condition) = &node.condition {
            if let Some(message) = validate_condition(condition, &staged.variables) {
                return Err(format!("Invalid condition for decision node: {}", message));
            }
        }
    }

    Ok(json!({"op": "modify_node", "node_id": node_id, "updates": updates}))
}

fn stage_delete_node(
    op: &Value,
    staged: &mut WorkflowRecord,
    temp_id_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let reference = op
        .get("node_id")
        .and_then(Value::as_str)
        .ok_or("delete_node requires 'node_id'")?;
    let node_id = resolve_batch_id(reference, temp_id_map, &staged.nodes)?;
    staged.nodes.retain(|n| n.id != node_id);
    staged.edges.retain(|e| e.from != node_id && e.to != node_id);
    Ok(json!({"op": "delete_node", "node_id": node_id}))
}

fn stage_add_connection(
    op: &Value,
    staged: &mut WorkflowRecord,
    temp_id_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let from_ref = op
        .get("from")
        .and_then(Value::as_str)
        .ok_or("add_connection requires 'from'")?;
    let to_ref = op
        .get("to")
        .and_then(Value::as_str)
        .ok_or("add_connection requires 'to'")?;
    let from_id = resolve_batch_id(from_ref, temp_id_map, &staged.nodes)?;
    let to_id = resolve_batch_id(to_ref, temp_id_map, &staged.nodes)?;

    let requested = op.get("label").and_then(Value::as_str);
    let label = decision_edge_label(&from_id, requested, &staged.nodes, &staged.edges)
        .map_err(|payload| {
            payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("invalid edge label")
                .to_string()
        })?;

    let edge = Edge::new(from_id, to_id, label);
    staged.edges.push(edge.clone());
    Ok(json!({"op": "add_connection", "edge": edge}))
}

fn stage_delete_connection(
    op: &Value,
    staged: &mut WorkflowRecord,
    temp_id_map: &HashMap<String, String>,
) -> Result<Value, String> {
    let from_ref = op
        .get("from")
        .and_then(Value::as_str)
        .ok_or("delete_connection requires 'from'")?;
    let to_ref = op
        .get("to")
        .and_then(Value::as_str)
        .ok_or("delete_connection requires 'to'")?;
    let from_id = resolve_batch_id(from_ref, temp_id_map, &staged.nodes)?;
    let to_id = resolve_batch_id(to_ref, temp_id_map, &staged.nodes)?;
    staged
        .edges
        .retain(|e| !(e.from == from_id && e.to == to_id));
    Ok(json!({
        "op": "delete_connection",
        "edge_id": format!("{}->{}", from_id, to_id),
    }))
}
