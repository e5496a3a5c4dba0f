//! Built-in tool implementations.
//!
//! Every operation the LLM can invoke lives here, grouped the way the
//! catalogue presents them:
//!
//! - `workflow_library`: create / save / list workflows
//! - `workflow_edit`: node and connection editing, current-state readback
//! - `batch_edit`: atomic multi-operation editing with temp ids
//! - `workflow_input`: variable registration and mutation, output shapes
//! - `compile_python`: Python code generation
//! - `analysis`: image analysis, publishing, image question annotations
//!
//! Editing tools share the stage → validate → commit pattern: the candidate
//! post-state is computed on a deep copy of the stored record, checked by
//! the validator in lenient mode, and only then committed through the
//! workflow store. Each successful call returns the mutated
//! `current_workflow` / `workflow_analysis` slices for transport-agnostic
//! state reconciliation.

pub mod analysis;
pub mod batch_edit;
pub mod compile_python;
mod helpers;
pub mod workflow_edit;
pub mod workflow_input;
pub mod workflow_library;

use std::path::PathBuf;
use std::sync::Arc;

use crate::sketchflow::client_wrapper::ClientWrapper;
use crate::sketchflow::history::HistoryStore;
use crate::sketchflow::subagent::Subagent;
use crate::sketchflow::tool_protocol::ToolRegistry;

pub use analysis::{AddImageQuestionTool, AnalyzeWorkflowTool, PublishLatestAnalysisTool};
pub use batch_edit::BatchEditWorkflowTool;
pub use compile_python::CompilePythonTool;
pub use workflow_edit::{
    AddConnectionTool, AddNodeTool, DeleteConnectionTool, DeleteNodeTool, GetCurrentWorkflowTool,
    ModifyNodeTool,
};
pub use workflow_input::{
    AddWorkflowVariableTool, ModifyWorkflowVariableTool, RemoveWorkflowVariableTool,
    SetWorkflowOutputTool,
};
pub use workflow_library::{CreateWorkflowTool, ListWorkflowsInLibraryTool, SaveWorkflowToLibraryTool};

/// Build the default registry with the full tool catalogue.
pub fn default_registry(
    data_dir: PathBuf,
    client: Arc<dyn ClientWrapper>,
    history: Arc<dyn HistoryStore>,
) -> ToolRegistry {
    let subagent = Arc::new(Subagent::new(client, history.clone()));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CreateWorkflowTool));
    registry.register(Arc::new(SaveWorkflowToLibraryTool));
    registry.register(Arc::new(ListWorkflowsInLibraryTool));
    registry.register(Arc::new(GetCurrentWorkflowTool));
    registry.register(Arc::new(AddNodeTool));
    registry.register(Arc::new(ModifyNodeTool));
    registry.register(Arc::new(DeleteNodeTool));
    registry.register(Arc::new(AddConnectionTool));
    registry.register(Arc::new(DeleteConnectionTool));
    registry.register(Arc::new(BatchEditWorkflowTool));
    registry.register(Arc::new(AddWorkflowVariableTool));
    registry.register(Arc::new(ModifyWorkflowVariableTool));
    registry.register(Arc::new(RemoveWorkflowVariableTool));
    registry.register(Arc::new(SetWorkflowOutputTool));
    registry.register(Arc::new(CompilePythonTool));
    registry.register(Arc::new(AnalyzeWorkflowTool::new(
        data_dir.clone(),
        history.clone(),
        subagent,
    )));
    registry.register(Arc::new(PublishLatestAnalysisTool::new(history)));
    registry.register(Arc::new(AddImageQuestionTool::new(data_dir)));
    registry
}
