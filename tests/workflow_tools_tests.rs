//! Integration tests for the workflow library, editing, and variable tools.
//!
//! Each test wires the tools to an in-memory workflow store and drives them
//! the way the orchestrator does: JSON arguments in, JSON payloads out,
//! with the mutated state slices checked against the store.

use serde_json::{json, Value};
use std::sync::Arc;

use sketchflow::cancellation::CancelToken;
use sketchflow::session::SessionState;
use sketchflow::tool_protocol::{ToolContext, WorkflowTool};
use sketchflow::tools::{
    AddConnectionTool, AddNodeTool, AddWorkflowVariableTool, CreateWorkflowTool,
    DeleteConnectionTool, DeleteNodeTool, GetCurrentWorkflowTool, ListWorkflowsInLibraryTool,
    ModifyWorkflowVariableTool, RemoveWorkflowVariableTool, SaveWorkflowToLibraryTool,
    SetWorkflowOutputTool,
};
use sketchflow::workflow::store::{InMemoryWorkflowStore, WorkflowStore};

const USER: &str = "user_test";

fn test_context() -> (ToolContext, Arc<InMemoryWorkflowStore>) {
    let store = Arc::new(InMemoryWorkflowStore::new());
    let ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store.clone()),
        user_id: Some(USER.to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    (ctx, store)
}

async fn create_workflow(ctx: &ToolContext, name: &str, output_type: &str) -> String {
    let result = CreateWorkflowTool
        .execute(json!({"name": name, "output_type": output_type}), ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], true, "create failed: {}", result);
    result["workflow_id"].as_str().unwrap().to_string()
}

async fn add_variable(ctx: &ToolContext, workflow_id: &str, name: &str, var_type: &str) -> Value {
    AddWorkflowVariableTool
        .execute(
            json!({"workflow_id": workflow_id, "name": name, "type": var_type}),
            ctx,
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn create_workflow_requires_valid_output_type() {
    let (ctx, _) = test_context();
    let result = CreateWorkflowTool
        .execute(json!({"name": "X", "output_type": "complex"}), &ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "INVALID_OUTPUT_TYPE");
}

#[tokio::test]
async fn created_workflow_is_an_empty_draft() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "BMI", "string").await;
    assert!(workflow_id.starts_with("wf_"));
    let record = store.get(&workflow_id, USER).await.unwrap();
    assert!(record.is_draft);
    assert!(record.nodes.is_empty());
    assert!(record.edges.is_empty());
}

#[tokio::test]
async fn build_then_persist_scenario() {
    // Scenario: create, register a variable, build a four-node decision
    // workflow, and read it back.
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "BMI", "string").await;

    let variable = add_variable(&ctx, &workflow_id, "BMI", "number").await;
    assert_eq!(variable["success"], true);
    assert_eq!(variable["variable"]["id"], "var_bmi_float");

    let start = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "start", "label": "Start"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(start["success"], true);
    let start_id = start["node"]["id"].as_str().unwrap().to_string();
    assert!(start_id.starts_with("node_"));
    assert_eq!(start["node"]["color"], "teal");

    let decision = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "BMI >= 30?",
                "condition": {"input_id": "var_bmi_float", "comparator": "gte", "value": 30},
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(decision["success"], true, "{}", decision);
    let decision_id = decision["node"]["id"].as_str().unwrap().to_string();

    let obese = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "end",
                "label": "Obese",
                "output_template": "Obese",
            }),
            &ctx,
        )
        .await
        .unwrap();
    let obese_id = obese["node"]["id"].as_str().unwrap().to_string();
    assert_eq!(obese["node"]["output_type"], "string");

    let healthy = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "end", "label": "Healthy"}),
            &ctx,
        )
        .await
        .unwrap();
    let healthy_id = healthy["node"]["id"].as_str().unwrap().to_string();

    for (from, to, label) in [
        (start_id.as_str(), decision_id.as_str(), Value::Null),
        (decision_id.as_str(), obese_id.as_str(), json!("true")),
        (decision_id.as_str(), healthy_id.as_str(), json!("false")),
    ] {
        let mut args = json!({"workflow_id": workflow_id, "from_node_id": from, "to_node_id": to});
        if !label.is_null() {
            args["label"] = label;
        }
        let result = AddConnectionTool.execute(args, &ctx).await.unwrap();
        assert_eq!(result["success"], true, "{}", result);
    }

    let current = GetCurrentWorkflowTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(current["workflow"]["nodes"].as_array().unwrap().len(), 4);
    assert_eq!(current["workflow"]["edges"].as_array().unwrap().len(), 3);
    assert_eq!(current["workflow"]["variables"].as_array().unwrap().len(), 1);
    assert!(current["summary"].as_str().unwrap().contains("4 nodes"));

    // Store agrees with the tool view.
    let record = store.get(&workflow_id, USER).await.unwrap();
    assert_eq!(record.nodes.len(), 4);
    assert_eq!(record.edges.len(), 3);

    // The finished workflow passes strict validation.
    use sketchflow::workflow::validator::{CandidateWorkflow, ValidationMode, WorkflowValidator};
    let candidate = CandidateWorkflow {
        nodes: record.nodes.clone(),
        edges: record.edges.clone(),
        variables: record.variables.clone(),
    };
    let (ok, errors) = WorkflowValidator::new().validate(&candidate, ValidationMode::Strict);
    assert!(ok, "strict validation failed: {:?}", errors);

    // Session state was reconciled by reference.
    let data = ctx.session.lock().await;
    assert_eq!(data.workflow.nodes.len(), 4);
    assert_eq!(data.variables.len(), 1);
}

#[tokio::test]
async fn decision_node_requires_a_condition() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Gate", "bool").await;
    let result = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "decision", "label": "Check?"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "INVALID_CONDITION");
}

#[tokio::test]
async fn condition_comparator_must_match_variable_type() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Gate", "bool").await;
    add_variable(&ctx, &workflow_id, "Name", "string").await;
    let result = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "Check?",
                "condition": {"input_id": "var_name_string", "comparator": "gte", "value": 3},
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("not valid"));
}

#[tokio::test]
async fn input_ref_must_name_a_registered_variable() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Gate", "bool").await;
    let result = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "process",
                "label": "Check age",
                "input_ref": "Age",
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "INPUT_NOT_FOUND");
}

#[tokio::test]
async fn editing_unknown_workflow_fails_with_not_found() {
    let (ctx, _) = test_context();
    let result = AddNodeTool
        .execute(
            json!({"workflow_id": "wf_missing", "type": "start", "label": "Start"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn workflows_are_owned_per_user() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Private", "string").await;

    let other_ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store),
        user_id: Some("someone_else".to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    let result = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "start", "label": "Start"}),
            &other_ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "NOT_FOUND");
}

#[tokio::test]
async fn delete_node_removes_incident_edges() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Chain", "string").await;
    let mut ids = Vec::new();
    for label in ["One", "Two", "Three"] {
        let node_type = if label == "One" { "start" } else { "process" };
        let result = AddNodeTool
            .execute(
                json!({"workflow_id": workflow_id, "type": node_type, "label": label}),
                &ctx,
            )
            .await
            .unwrap();
        ids.push(result["node"]["id"].as_str().unwrap().to_string());
    }
    for pair in ids.windows(2) {
        AddConnectionTool
            .execute(
                json!({"workflow_id": workflow_id, "from_node_id": pair[0], "to_node_id": pair[1]}),
                &ctx,
            )
            .await
            .unwrap();
    }

    // Deleting the middle node by label removes both its edges.
    let result = DeleteNodeTool
        .execute(json!({"workflow_id": workflow_id, "node_id": "Two"}), &ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    let record = store.get(&workflow_id, USER).await.unwrap();
    assert_eq!(record.nodes.len(), 2);
    assert!(record.edges.is_empty());
}

#[tokio::test]
async fn delete_connection_removes_only_the_named_edge() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Chain", "string").await;
    let a = AddNodeTool
        .execute(json!({"workflow_id": workflow_id, "type": "start", "label": "A"}), &ctx)
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let b = AddNodeTool
        .execute(json!({"workflow_id": workflow_id, "type": "process", "label": "B"}), &ctx)
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    AddConnectionTool
        .execute(
            json!({"workflow_id": workflow_id, "from_node_id": a, "to_node_id": b}),
            &ctx,
        )
        .await
        .unwrap();

    let result = DeleteConnectionTool
        .execute(
            json!({"workflow_id": workflow_id, "from_node_id": "A", "to_node_id": "B"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["edge_id"], format!("{}->{}", a, b));
    assert!(store.get(&workflow_id, USER).await.unwrap().edges.is_empty());
}

#[tokio::test]
async fn cycle_creating_connection_is_rejected() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Loop", "string").await;
    let mut ids = Vec::new();
    for (node_type, label) in [("start", "S"), ("process", "P1"), ("process", "P2")] {
        let result = AddNodeTool
            .execute(
                json!({"workflow_id": workflow_id, "type": node_type, "label": label}),
                &ctx,
            )
            .await
            .unwrap();
        ids.push(result["node"]["id"].as_str().unwrap().to_string());
    }
    for pair in ids.windows(2) {
        AddConnectionTool
            .execute(
                json!({"workflow_id": workflow_id, "from_node_id": pair[0], "to_node_id": pair[1]}),
                &ctx,
            )
            .await
            .unwrap();
    }

    // P2 -> P1 closes a cycle.
    let result = AddConnectionTool
        .execute(
            json!({"workflow_id": workflow_id, "from_node_id": ids[2], "to_node_id": ids[1]}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "VALIDATION_FAILED");
    assert!(result["error"].as_str().unwrap().contains("CYCLE_DETECTED"));
    // The store is untouched by the failed edit.
    assert_eq!(store.get(&workflow_id, USER).await.unwrap().edges.len(), 2);
}

#[tokio::test]
async fn self_loop_connection_is_rejected() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Loop", "string").await;
    let node = AddNodeTool
        .execute(json!({"workflow_id": workflow_id, "type": "process", "label": "P"}), &ctx)
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let result = AddConnectionTool
        .execute(
            json!({"workflow_id": workflow_id, "from_node_id": node, "to_node_id": node}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("SELF_LOOP"));
}

// --- variable management ---

#[tokio::test]
async fn variable_ids_are_deterministic_slugs() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    let result = add_variable(&ctx, &workflow_id, "Patient Age", "number").await;
    assert_eq!(result["variable"]["id"], "var_patient_age_float");
    assert_eq!(result["variable"]["source"], "input");

    // Integral range bounds narrow number to int.
    let bounded = AddWorkflowVariableTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "name": "Score",
                "type": "number",
                "range_min": 0,
                "range_max": 100,
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(bounded["variable"]["id"], "var_score_int");
    assert_eq!(bounded["variable"]["type"], "int");
}

#[tokio::test]
async fn duplicate_variable_names_are_rejected_case_insensitively() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    add_variable(&ctx, &workflow_id, "BMI", "number").await;
    let duplicate = add_variable(&ctx, &workflow_id, "bmi", "string").await;
    assert_eq!(duplicate["success"], false);
    assert!(duplicate["error"].as_str().unwrap().contains("already exists"));
}

#[tokio::test]
async fn enum_variables_require_values() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    let missing = AddWorkflowVariableTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "Gender", "type": "enum"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(missing["success"], false);

    let result = AddWorkflowVariableTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "name": "Gender",
                "type": "enum",
                "enum_values": ["Male", "Female", "Other"],
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["variable"]["id"], "var_gender_enum");
}

#[tokio::test]
async fn modify_variable_rewrites_id_and_warns_about_decisions() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    add_variable(&ctx, &workflow_id, "Credit Score", "number").await;
    let decision = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "Score high?",
                "condition": {"input_id": "var_credit_score_float", "comparator": "gte", "value": 700},
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(decision["success"], true, "{}", decision);

    let result = ModifyWorkflowVariableTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "name": "Credit Score",
                "new_type": "integer",
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], true);
    assert_eq!(result["old_id"], "var_credit_score_float");
    assert_eq!(result["new_id"], "var_credit_score_int");
    let warning = result["warning"].as_str().unwrap();
    assert!(warning.contains("Score high?"));
}

#[tokio::test]
async fn modify_variable_unknown_name_lists_available() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    add_variable(&ctx, &workflow_id, "Age", "number").await;
    let result = ModifyWorkflowVariableTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "Missing", "new_type": "string"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("Age"));
}

#[tokio::test]
async fn remove_variable_refuses_then_cascades_with_force() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    add_variable(&ctx, &workflow_id, "BMI", "number").await;
    AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "BMI >= 30?",
                "condition": {"input_id": "var_bmi_float", "comparator": "gte", "value": 30},
            }),
            &ctx,
        )
        .await
        .unwrap();

    let refused = RemoveWorkflowVariableTool
        .execute(json!({"workflow_id": workflow_id, "name": "BMI"}), &ctx)
        .await
        .unwrap();
    assert_eq!(refused["success"], false);
    assert_eq!(refused["error_code"], "VARIABLE_IN_USE");

    let forced = RemoveWorkflowVariableTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "BMI", "force": true}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(forced["success"], true);
    assert_eq!(forced["cleared_conditions"].as_array().unwrap().len(), 1);

    let record = store.get(&workflow_id, USER).await.unwrap();
    assert!(record.variables.is_empty());
    assert!(record.nodes[0].condition.is_none());
}

#[tokio::test]
async fn set_workflow_output_upserts_by_name() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Vars", "string").await;
    let declared = SetWorkflowOutputTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "verdict", "type": "string"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(declared["success"], true);

    let updated = SetWorkflowOutputTool
        .execute(
            json!({"workflow_id": workflow_id, "name": "Verdict", "type": "bool"}),
            &ctx,
        )
        .await
        .unwrap();
    assert!(updated["message"].as_str().unwrap().starts_with("Updated"));

    let record = store.get(&workflow_id, USER).await.unwrap();
    assert_eq!(record.outputs.len(), 1);
    assert_eq!(record.outputs[0].output_type, "bool");
}

// --- subprocess nodes ---

#[tokio::test]
async fn subprocess_auto_registers_its_output_variable() {
    // Scenario: a subflow returning a string; adding the subprocess node
    // registers a derived variable a later decision can reference.
    let (ctx, _) = test_context();
    let sub_id = create_workflow(&ctx, "BMI Subflow", "string").await;
    let workflow_id = create_workflow(&ctx, "Parent", "string").await;
    add_variable(&ctx, &workflow_id, "BMI", "number").await;

    let result = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "subprocess",
                "label": "Classify BMI",
                "subworkflow_id": sub_id,
                "input_mapping": {"BMI": "BMI"},
                "output_variable": "BMI Result",
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], true, "{}", result);

    let variables = result["workflow_analysis"]["variables"].as_array().unwrap();
    let derived = variables
        .iter()
        .find(|v| v["id"] == "var_sub_bmi_result_string")
        .expect("derived variable registered");
    assert_eq!(derived["source"], "subprocess");
    assert_eq!(derived["type"], "string");

    // A decision over the derived variable validates.
    let decision = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "decision",
                "label": "Obese?",
                "condition": {
                    "input_id": "var_sub_bmi_result_string",
                    "comparator": "str_eq",
                    "value": "Obese",
                },
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(decision["success"], true, "{}", decision);
}

#[tokio::test]
async fn subprocess_referencing_unknown_workflow_fails() {
    let (ctx, _) = test_context();
    let workflow_id = create_workflow(&ctx, "Parent", "string").await;
    let result = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "subprocess",
                "label": "Ghost",
                "subworkflow_id": "wf_ghost",
                "output_variable": "Ghost Result",
            }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert_eq!(result["error_code"], "SUBPROCESS_VALIDATION_FAILED");
}

// --- library tools ---

#[tokio::test]
async fn save_to_library_is_idempotent() {
    let (ctx, store) = test_context();
    let workflow_id = create_workflow(&ctx, "Publishable", "string").await;

    let first = SaveWorkflowToLibraryTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(first["success"], true);
    assert!(first.get("already_saved").is_none());
    assert!(!store.get(&workflow_id, USER).await.unwrap().is_draft);

    let second = SaveWorkflowToLibraryTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(second["already_saved"], true);
}

#[tokio::test]
async fn library_listing_hides_drafts_by_default() {
    let (ctx, _) = test_context();
    let draft_id = create_workflow(&ctx, "Draft Flow", "string").await;
    let published_id = create_workflow(&ctx, "Published Flow", "string").await;
    SaveWorkflowToLibraryTool
        .execute(json!({"workflow_id": published_id, "domain": "Finance"}), &ctx)
        .await
        .unwrap();

    let default_list = ListWorkflowsInLibraryTool
        .execute(json!({}), &ctx)
        .await
        .unwrap();
    assert_eq!(default_list["count"], 1);
    assert_eq!(default_list["workflows"][0]["status"], "published");

    let with_drafts = ListWorkflowsInLibraryTool
        .execute(json!({"include_drafts": true}), &ctx)
        .await
        .unwrap();
    assert_eq!(with_drafts["count"], 2);

    let drafts_only = ListWorkflowsInLibraryTool
        .execute(json!({"drafts_only": true}), &ctx)
        .await
        .unwrap();
    assert_eq!(drafts_only["count"], 1);
    assert_eq!(
        drafts_only["workflows"][0]["workflow_id"],
        json!(draft_id)
    );

    let by_domain = ListWorkflowsInLibraryTool
        .execute(json!({"domain": "finance"}), &ctx)
        .await
        .unwrap();
    assert_eq!(by_domain["count"], 1);

    let by_query = ListWorkflowsInLibraryTool
        .execute(json!({"search_query": "published", "include_drafts": true}), &ctx)
        .await
        .unwrap();
    assert_eq!(by_query["count"], 1);
}

#[tokio::test]
async fn alias_names_reach_the_same_tools() {
    use sketchflow::tool_protocol::ToolRegistry;

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(AddWorkflowVariableTool));
    let (ctx, _store) = test_context();
    let workflow_id = create_workflow(&ctx, "Alias", "string").await;

    let result = registry
        .execute(
            "add_workflow_input",
            json!({"workflow_id": workflow_id, "name": "Age", "type": "number"}),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(result["success"], true);
}
