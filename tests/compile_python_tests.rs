//! Python export: strict validation gate and the parameter round-trip.

use serde_json::json;
use std::sync::Arc;

use sketchflow::cancellation::CancelToken;
use sketchflow::session::SessionState;
use sketchflow::tool_protocol::{ToolContext, WorkflowTool};
use sketchflow::tools::{
    AddConnectionTool, AddNodeTool, AddWorkflowVariableTool, CompilePythonTool, CreateWorkflowTool,
};

const USER: &str = "user_test";

async fn build_bmi_workflow() -> (ToolContext, String) {
    let store = Arc::new(
        sketchflow::workflow::store::InMemoryWorkflowStore::new(),
    );
    let ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store),
        user_id: Some(USER.to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    let workflow_id = CreateWorkflowTool
        .execute(json!({"name": "BMI Category", "output_type": "string"}), &ctx)
        .await
        .unwrap()["workflow_id"]
        .as_str()
        .unwrap()
        .to_string();

    for (name, var_type) in [("BMI", "number"), ("Patient Name", "string")] {
        AddWorkflowVariableTool
            .execute(
                json!({"workflow_id": workflow_id, "name": name, "type": var_type}),
                &ctx,
            )
            .await
            .unwrap();
    }

    let start = AddNodeTool
        .execute(json!({"workflow_id": workflow_id, "type": "start", "label": "Start"}), &ctx)
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
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
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let obese = AddNodeTool
        .execute(
            json!({
                "workflow_id": workflow_id,
                "type": "end",
                "label": "Obese",
                "output_template": "{Patient Name} is obese",
            }),
            &ctx,
        )
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();
    let healthy = AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "end", "label": "Healthy"}),
            &ctx,
        )
        .await
        .unwrap()["node"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    for (from, to, label) in [
        (start.as_str(), decision.as_str(), None),
        (decision.as_str(), obese.as_str(), Some("true")),
        (decision.as_str(), healthy.as_str(), Some("false")),
    ] {
        let mut args = json!({"workflow_id": workflow_id, "from_node_id": from, "to_node_id": to});
        if let Some(label) = label {
            args["label"] = json!(label);
        }
        AddConnectionTool.execute(args, &ctx).await.unwrap();
    }

    (ctx, workflow_id)
}

/// Extract the parameter names from the generated `def` line.
fn signature_params(code: &str) -> Vec<String> {
    let def_line = code.lines().find(|l| l.starts_with("def ")).unwrap();
    let inner = def_line
        .split_once('(')
        .unwrap()
        .1
        .split_once(')')
        .unwrap()
        .0;
    inner
        .split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.split(':').next().unwrap().trim().to_string())
        .collect()
}

#[tokio::test]
async fn parameters_mirror_input_variables_element_wise() {
    let (ctx, workflow_id) = build_bmi_workflow().await;
    let result = CompilePythonTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], true, "{}", result);

    let code = result["code"].as_str().unwrap();
    // Parameter names are exactly the input-source variables, in order,
    // with element-wise type annotations.
    assert_eq!(signature_params(code), vec!["bmi", "patient_name"]);
    assert!(code.contains("def bmi_category(bmi: float, patient_name: str) -> str:"));
    assert!(code.contains("if bmi >= 30:"));
    assert!(code.contains("return f\"{patient_name} is obese\""));
    assert!(code.contains("return \"Healthy\""));
}

#[tokio::test]
async fn incomplete_workflow_fails_strict_validation_before_codegen() {
    let store = Arc::new(
        sketchflow::workflow::store::InMemoryWorkflowStore::new(),
    );
    let ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store),
        user_id: Some(USER.to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    let workflow_id = CreateWorkflowTool
        .execute(json!({"name": "Incomplete", "output_type": "string"}), &ctx)
        .await
        .unwrap()["workflow_id"]
        .as_str()
        .unwrap()
        .to_string();
    // A lone process node: no start node, so strict validation fails.
    AddNodeTool
        .execute(
            json!({"workflow_id": workflow_id, "type": "process", "label": "Floating"}),
            &ctx,
        )
        .await
        .unwrap();

    let result = CompilePythonTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("MISSING_START_NODE"));
}

#[tokio::test]
async fn empty_workflow_is_rejected() {
    let store = Arc::new(
        sketchflow::workflow::store::InMemoryWorkflowStore::new(),
    );
    let ctx = ToolContext {
        session: SessionState::new(),
        store: Some(store),
        user_id: Some(USER.to_string()),
        stream: None,
        cancel: CancelToken::new(),
    };
    let workflow_id = CreateWorkflowTool
        .execute(json!({"name": "Empty", "output_type": "string"}), &ctx)
        .await
        .unwrap()["workflow_id"]
        .as_str()
        .unwrap()
        .to_string();

    let result = CompilePythonTool
        .execute(json!({"workflow_id": workflow_id}), &ctx)
        .await
        .unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn include_main_flag_adds_example_invocation() {
    let (ctx, workflow_id) = build_bmi_workflow().await;
    let result = CompilePythonTool
        .execute(
            json!({"workflow_id": workflow_id, "include_main": true, "include_docstring": false}),
            &ctx,
        )
        .await
        .unwrap();
    let code = result["code"].as_str().unwrap();
    assert!(code.contains("if __name__ == \"__main__\":"));
    assert!(!code.contains("\"\"\""));
}
