//! Per-conversation session state shared between the orchestrator and its
//! tools.
//!
//! Direct-mode tools receive the live [`SessionState`] and mutate it by
//! reference; MCP-mode tools receive a serialized [`SessionSnapshot`]
//! instead. Either way, every tool also returns the mutated
//! `workflow_analysis` / `current_workflow` slices in its result so the
//! orchestrator can reconcile state without caring which transport ran the
//! tool.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::sketchflow::analysis::GuidanceNote;
use crate::sketchflow::workflow::{CanvasWorkflow, OutputSpec, Variable};

/// Kind of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Pdf,
}

/// Classification of an uploaded file's purpose within an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilePurpose {
    #[default]
    Unclassified,
    Flowchart,
    Guidance,
    Mixed,
}

impl FilePurpose {
    /// Parse the wire spelling, defaulting unknown values to `Flowchart`
    /// (an unknown classification should not silently drop a file).
    pub fn parse(raw: &str) -> Self {
        match raw {
            "unclassified" => Self::Unclassified,
            "guidance" => Self::Guidance,
            "mixed" => Self::Mixed,
            _ => Self::Flowchart,
        }
    }
}

/// A file attached to the next user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
    /// Path relative to the data dir (or absolute).
    pub path: String,
    pub file_type: FileType,
    #[serde(default)]
    pub purpose: FilePurpose,
}

/// The orchestrator's unified in-memory workflow view.
#[derive(Debug, Clone, Default)]
pub struct SessionData {
    pub workflow: CanvasWorkflow,
    pub variables: Vec<Variable>,
    pub outputs: Vec<OutputSpec>,
    pub tree: Value,
    pub doubts: Vec<String>,
    pub reasoning: String,
    pub guidance: Vec<GuidanceNote>,
    pub uploaded_files: Vec<UploadedFile>,
    pub user_id: Option<String>,
}

/// Shared handle to session state. Cloning shares the underlying data, so
/// direct-mode tool mutations are observed by the orchestrator immediately.
#[derive(Clone, Default)]
pub struct SessionState {
    inner: Arc<Mutex<SessionData>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session data for reading or mutation.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, SessionData> {
        self.inner.lock().await
    }

    /// Serialize the session into the wire shape tools expect under the
    /// `session_state` argument (MCP mode) and that direct-mode tools read.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let data = self.inner.lock().await;
        SessionSnapshot {
            current_workflow: data.workflow.clone(),
            workflow_analysis: analysis_value(&data),
            uploaded_files: data.uploaded_files.clone(),
            user_id: data.user_id.clone(),
        }
    }

    /// Replace the canvas slice.
    pub async fn set_workflow(&self, workflow: CanvasWorkflow) {
        self.inner.lock().await.workflow = workflow;
    }

    /// Merge a returned `workflow_analysis` slice back into the session.
    /// Only the keys present in the payload are applied.
    pub async fn merge_analysis_value(&self, payload: &Value) {
        let mut data = self.inner.lock().await;
        merge_analysis_into(&mut data, payload);
    }

    /// Merge a returned `current_workflow` slice back into the session.
    pub async fn merge_workflow_value(&self, payload: &Value) {
        let mut data = self.inner.lock().await;
        if let Some(nodes) = payload.get("nodes") {
            if let Ok(nodes) = serde_json::from_value(nodes.clone()) {
                data.workflow.nodes = nodes;
            }
        }
        if let Some(edges) = payload.get("edges") {
            if let Ok(edges) = serde_json::from_value(edges.clone()) {
                data.workflow.edges = edges;
            }
        }
    }
}

/// Apply the keys of an analysis payload onto session data.
pub fn merge_analysis_into(data: &mut SessionData, payload: &Value) {
    if let Some(variables) = payload.get("variables").and_then(Value::as_array) {
        data.variables = variables
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
    }
    if let Some(outputs) = payload.get("outputs").and_then(Value::as_array) {
        data.outputs = outputs
            .iter()
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect();
    }
    if let Some(tree) = payload.get("tree") {
        if tree.is_object() {
            data.tree = tree.clone();
        }
    }
    if let Some(doubts) = payload.get("doubts").and_then(Value::as_array) {
        data.doubts = doubts
            .iter()
            .filter_map(|d| d.as_str().map(str::to_string))
            .collect();
    }
    if let Some(reasoning) = payload.get("reasoning").and_then(Value::as_str) {
        if !reasoning.is_empty() {
            data.reasoning = reasoning.to_string();
        }
    }
    if let Some(guidance) = payload.get("guidance").and_then(Value::as_array) {
        data.guidance = guidance
            .iter()
            .filter_map(|g| serde_json::from_value(g.clone()).ok())
            .collect();
    }
}

/// Build the `workflow_analysis` wire value from session data.
pub fn analysis_value(data: &SessionData) -> Value {
    json!({
        "variables": data.variables,
        "outputs": data.outputs,
        "tree": data.tree,
        "doubts": data.doubts,
        "reasoning": data.reasoning,
        "guidance": data.guidance,
    })
}

/// Serialized session state, passed to remote tools as an argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub current_workflow: CanvasWorkflow,
    pub workflow_analysis: Value,
    #[serde(default)]
    pub uploaded_files: Vec<UploadedFile>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl SessionSnapshot {
    /// Rehydrate a session from a snapshot (used by the MCP server side).
    pub fn into_session(self) -> SessionState {
        let mut data = SessionData {
            workflow: self.current_workflow,
            uploaded_files: self.uploaded_files,
            user_id: self.user_id,
            ..SessionData::default()
        };
        merge_analysis_into(&mut data, &self.workflow_analysis);
        SessionState {
            inner: Arc::new(Mutex::new(data)),
        }
    }
}
