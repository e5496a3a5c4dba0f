//! Shared helpers for the editing tools.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::sketchflow::tool_protocol::ToolContext;
use crate::sketchflow::workflow::store::{StoreError, WorkflowRecord, WorkflowStore};
use crate::sketchflow::workflow::{Edge, Node, NodeType};

/// Build a structured failure payload.
pub fn failure(error: impl Into<String>, error_code: &str) -> Value {
    json!({
        "success": false,
        "error": error.into(),
        "error_code": error_code,
    })
}

/// Extract a string argument, trimmed; `None` when absent or blank.
pub fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn arg_f64(args: &Value, key: &str) -> Option<f64> {
    args.get(key).and_then(Value::as_f64)
}

pub fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

/// Resolve the acting store and user or produce a structured failure.
pub fn require_store(ctx: &ToolContext) -> Result<(Arc<dyn WorkflowStore>, String), Value> {
    let store = match &ctx.store {
        Some(store) => store.clone(),
        None => {
            return Err(json!({
                "success": false,
                "error": "No workflow_store in session",
                "error_code": "NO_STORE",
                "message": "Unable to edit workflow - storage not available.",
            }))
        }
    };
    let user_id = match &ctx.user_id {
        Some(user_id) => user_id.clone(),
        None => {
            return Err(json!({
                "success": false,
                "error": "No user_id in session",
                "error_code": "NO_USER",
                "message": "Unable to edit workflow - user not authenticated.",
            }))
        }
    };
    Ok((store, user_id))
}

/// Read the required `workflow_id` argument and fetch the owned record.
pub async fn load_workflow(
    args: &Value,
    ctx: &ToolContext,
) -> Result<(Arc<dyn WorkflowStore>, String, WorkflowRecord), Value> {
    let (store, user_id) = require_store(ctx)?;
    let workflow_id = arg_str(args, "workflow_id").ok_or_else(|| {
        failure(
            "'workflow_id' is required. Call create_workflow first and pass its id.",
            "MISSING_WORKFLOW_ID",
        )
    })?;
    let record = store
        .get(&workflow_id, &user_id)
        .await
        .map_err(store_error_payload)?;
    Ok((store, user_id, record))
}

/// Map a store failure to its structured error payload.
pub fn store_error_payload(error: StoreError) -> Value {
    match error {
        StoreError::NotFound(id) => failure(format!("Workflow not found: {}", id), "NOT_FOUND"),
        StoreError::NotOwned { workflow_id, .. } => failure(
            format!("Workflow {} is not owned by the current user", workflow_id),
            "NOT_FOUND",
        ),
        StoreError::Backend(message) => failure(message, "STORE_ERROR"),
    }
}

/// Resolve a node reference: an exact id, or a unique label match
/// (case-insensitive).
pub fn resolve_node_id(reference: &str, nodes: &[Node]) -> Result<String, String> {
    if nodes.iter().any(|n| n.id == reference) {
        return Ok(reference.to_string());
    }
    let wanted = reference.trim().to_lowercase();
    let matches: Vec<&Node> = nodes
        .iter()
        .filter(|n| n.label.trim().to_lowercase() == wanted)
        .collect();
    match matches.len() {
        1 => Ok(matches[0].id.clone()),
        0 => Err(format!("Node not found: {}", reference)),
        _ => {
            let ids: Vec<&str> = matches.iter().map(|n| n.id.as_str()).collect();
            Err(format!(
                "Label '{}' matches multiple nodes: [{}]. Use a node id instead.",
                reference,
                ids.join(", ")
            ))
        }
    }
}

/// Determine the label for a new edge leaving `from_id`.
///
/// For decision sources an omitted label auto-assigns `true` then `false`;
/// labels are normalized to lowercase, restricted to `true`/`false`, and
/// each may be used once. Non-decision sources keep the label as given.
pub fn decision_edge_label(
    from_id: &str,
    requested: Option<&str>,
    nodes: &[Node],
    edges: &[Edge],
) -> Result<String, Value> {
    let from_node = nodes.iter().find(|n| n.id == from_id);
    let is_decision = from_node.map(|n| n.node_type == NodeType::Decision).unwrap_or(false);
    if !is_decision {
        return Ok(requested.unwrap_or("").to_string());
    }

    let taken: Vec<String> = edges
        .iter()
        .filter(|e| e.from == from_id)
        .map(|e| e.label.to_lowercase())
        .collect();

    match requested.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty()) {
        None => {
            if !taken.iter().any(|l| l == "true") {
                Ok("true".to_string())
            } else if !taken.iter().any(|l| l == "false") {
                Ok("false".to_string())
            } else {
                Err(failure(
                    format!(
                        "Decision node '{}' already has both branches; a decision has at most two outgoing edges",
                        from_id
                    ),
                    "MAX_BRANCHES_REACHED",
                ))
            }
        }
        Some(label) if label == "true" || label == "false" => {
            if taken.iter().any(|l| *l == label) {
                Err(failure(
                    format!("Decision node '{}' already has a '{}' branch", from_id, label),
                    "DUPLICATE_EDGE_LABEL",
                ))
            } else {
                Ok(label)
            }
        }
        Some(label) => Err(failure(
            format!(
                "Invalid label '{}' for a decision branch; use 'true' or 'false'",
                label
            ),
            "INVALID_EDGE_LABEL",
        )),
    }
}

/// Validate a subprocess node configuration against the store.
pub async fn validate_subprocess_node(
    node: &Node,
    store: &Arc<dyn WorkflowStore>,
    user_id: &str,
    variable_names: &[String],
) -> Vec<String> {
    let mut errors = Vec::new();
    match &node.subworkflow_id {
        None => errors.push(format!(
            "Subprocess node '{}' requires 'subworkflow_id'",
            node.label
        )),
        Some(subworkflow_id) => {
            if let Err(err) = store.get(subworkflow_id, user_id).await {
                errors.push(format!(
                    "Subprocess node '{}' references an invalid workflow: {}",
                    node.label, err
                ));
            }
        }
    }
    if node.output_variable.is_none() {
        errors.push(format!(
            "Subprocess node '{}' requires 'output_variable'",
            node.label
        ));
    }
    if let Some(mapping) = &node.input_mapping {
        for parent_name in mapping.keys() {
            let known = variable_names
                .iter()
                .any(|name| name.trim().to_lowercase() == parent_name.trim().to_lowercase());
            if !known {
                errors.push(format!(
                    "input_mapping references unknown parent variable '{}'",
                    parent_name
                ));
            }
        }
    }
    errors
}

/// The `current_workflow` / `workflow_analysis` slices for a record,
/// attached to every successful mutating tool result.
pub fn state_slices(record: &WorkflowRecord) -> (Value, Value) {
    let current_workflow = json!({
        "nodes": record.nodes,
        "edges": record.edges,
    });
    let workflow_analysis = json!({
        "variables": record.variables,
        "outputs": record.outputs,
    });
    (current_workflow, workflow_analysis)
}

/// Mirror the committed record into the live session state so direct-mode
/// callers observe the change immediately.
pub async fn sync_session(ctx: &ToolContext, record: &WorkflowRecord) {
    let mut data = ctx.session.lock().await;
    data.workflow.nodes = record.nodes.clone();
    data.workflow.edges = record.edges.clone();
    data.variables = record.variables.clone();
    data.outputs = record.outputs.clone();
}

/// Attach the state slices to a successful result payload.
pub fn with_state(mut payload: Value, record: &WorkflowRecord) -> Value {
    let (current_workflow, workflow_analysis) = state_slices(record);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("current_workflow".into(), current_workflow);
        obj.insert("workflow_analysis".into(), workflow_analysis);
    }
    payload
}
