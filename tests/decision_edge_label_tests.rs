//! Decision-edge label enforcement.
//!
//! Decision nodes end up with exactly two outgoing edges labelled "true"
//! and "false"; the interpreter routes on those labels, so add_connection
//! auto-assigns, normalizes, and polices them.

use serde_json::json;
use std::sync::Arc;

use sketchflow::cancellation::CancelToken;
use sketchflow::session::SessionState;
use sketchflow::tool_protocol::{ToolContext, WorkflowTool};
use sketchflow::tools::{
    AddConnectionTool, AddNodeTool, AddWorkflowVariableTool, CreateWorkflowTool,
};
use sketchflow::workflow::store::InMemoryWorkflowStore;

const USER: &str = "user_test";

/// Build a workflow with a conditioned decision node and two end nodes;
/// returns (ctx, workflow_id, decision_id, end_ids).
async fn decision_fixture() -> (ToolContext, String, String, Vec<String>) {
    let store = Arc::new(InMemoryWorkflowStore::new());
    let ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store),
        user_id: Some(USER.to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    let workflow_id = CreateWorkflowTool
        .execute(json!({"name": "Check", "output_type": "string"}), &ctx)
        .await
        .unwrap()["workflow_id"]
        .as_str()
        .unwrap()
        .to_string();
    AddWorkflowVariableTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "Value", "type": "number"}),
            &ctx,
        )
        .await
        .unwrap();
    let decision_id = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "Check Value",
                "condition": {"input_id": "var_value_float", "comparator": "gt", "value": 10},
            }),
            &ctx,
        )
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let mut end_ids = Vec::new();
    for label in ["Greater", "Not Greater", "Spare"] {
        let id = AddNodeTool
            .execute(
                json!({"workflow_id": workflow_id, "type": "end", "label": label}),
                &ctx,
            )
            .await
            .unwrap()["node"]["id"]
            .as_str()
            .unwrap()
            .to_string();
        end_ids.push(id);
    }
    (ctx, workflow_id, decision_id, end_ids)
}

async fn connect(
    ctx: &ToolContext,
    workflow_id: &str,
    from: &str,
    to: &str,
    label: Option<&str>,
) -> serde_json::Value {
    let mut args = json!({"workflow_id": workflow_id, "from_node_id": from, "to_node_id": to});
    if let Some(label) = label {
        args["label"] = json!(label);
    }
    AddConnectionTool.execute(args, ctx).await.unwrap()
}

#[tokio::test]
async fn first_unlabelled_edge_gets_true() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[0], None).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["edge"]["label"], "true");
}

#[tokio::test]
async fn second_unlabelled_edge_gets_false() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    connect(&ctx, &workflow_id, &decision_id, &ends[0], Some("true")).await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[1], None).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["edge"]["label"], "false");
}

#[tokio::test]
async fn labels_normalize_to_lowercase() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[0], Some("TRUE")).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["edge"]["label"], "true");
}

#[tokio::test]
async fn invalid_label_is_rejected() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[0], Some("maybe")).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "INVALID_EDGE_LABEL");
    let error = result["error"].as_str().unwrap().to_lowercase();
    assert!(error.contains("true") || error.contains("false"));
}

#[tokio::test]
async fn duplicate_label_is_rejected() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    connect(&ctx, &workflow_id, &decision_id, &ends[0], Some("true")).await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[1], Some("true")).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "DUPLICATE_EDGE_LABEL");
}

#[tokio::test]
async fn third_edge_is_rejected_with_max_branches() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    connect(&ctx, &workflow_id, &decision_id, &ends[0], Some("true")).await;
    connect(&ctx, &workflow_id, &decision_id, &ends[1], Some("false")).await;
    let result = connect(&ctx, &workflow_id, &decision_id, &ends[2], None).await;
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "MAX_BRANCHES_REACHED");
}

#[tokio::test]
async fn completed_decision_has_true_false_label_multiset() {
    let (ctx, workflow_id, decision_id, ends) = decision_fixture().await;
    connect(&ctx, &workflow_id, &decision_id, &ends[0], None).await;
    connect(&ctx, &workflow_id, &decision_id, &ends[1], None).await;

    let data = ctx.session.lock().await;
    let mut labels: Vec<&str> = data
        .workflow
        .edges
        .iter()
        .filter(|e| e.from == decision_id)
        .map(|e| e.label.as_str())
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["false", "true"]);
}

#[tokio::test]
async fn non_decision_sources_are_not_policed() {
    let (ctx, workflow_id, _, ends) = decision_fixture().await;
    let start_id = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "start", "label": "Start"}),
            &ctx,
        )
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let result = connect(&ctx, &workflow_id, &start_id, &ends[0], Some("next")).await;
    assert_eq!(result["success"], true);
    assert_eq!(result["edge"]["label"], "next");
}
