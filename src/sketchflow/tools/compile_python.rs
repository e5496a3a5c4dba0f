//! Python export tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

use super::helpers::{arg_bool, failure, load_workflow};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::workflow::compile::{compile_workflow_to_python, CompileOptions};
use crate::sketchflow::workflow::validator::{
    CandidateWorkflow, ValidationMode, WorkflowValidator,
};

/// Generate Python code from the workflow.
pub struct CompilePythonTool;

#[async_trait]
impl WorkflowTool for CompilePythonTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "compile_python",
            "Generate executable Python code from the workflow: typed function parameters for \
             inputs, if/else statements for decisions, and return statements for outputs. Use \
             when the user asks to export, generate, or compile the workflow to Python.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to compile")
                .required(),
        )
        .with_parameter(ToolParameter::new(
            "include_main",
            ToolParameterType::Boolean,
            "Include an if __name__ == '__main__' block with example usage. Default: false",
        ))
        .with_parameter(ToolParameter::new(
            "include_docstring",
            ToolParameterType::Boolean,
            "Include a docstring with parameter descriptions. Default: true",
        ))
    }

    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let (_, _, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        if record.nodes.is_empty() {
            return Ok(failure(
                "Workflow is empty. Build a workflow first.",
                "VALIDATION_FAILED",
            ));
        }

        let validator = WorkflowValidator::new();
        let candidate = CandidateWorkflow {
            nodes: record.nodes.clone(),
            edges: record.edges.clone(),
            variables: record.variables.clone(),
        };
        let (ok, errors) = validator.validate(&candidate, ValidationMode::Strict);
        if !ok {
            return Ok(failure(
                format!(
                    "Workflow validation failed, fix these before compiling:\n{}",
                    validator.format_errors(&errors)
                ),
                "VALIDATION_FAILED",
            ));
        }

        let options = CompileOptions {
            include_main: arg_bool(&args, "include_main").unwrap_or(false),
            include_docstring: arg_bool(&args, "include_docstring").unwrap_or(true),
        };
        match compile_workflow_to_python(
            &record.nodes,
            &record.edges,
            &record.variables,
            &record.outputs,
            &record.name,
            &record.output_type,
            &options,
        ) {
            Ok(result) => Ok(json!({
                "success": true,
                "code": result.code,
                "warnings": result.warnings,
                "message": format!("Generated Python code for workflow '{}'", record.name),
            })),
            Err(error) => Ok(failure(error, "COMPILE_FAILED")),
        }
    }
}
