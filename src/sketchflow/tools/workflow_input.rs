//! Variable and output management tools.
//!
//! Variables registered here carry `source = input` (users provide values
//! at execution time); derived variables are created automatically when
//! subprocess nodes are added. Variable ids are content-derived, so renames
//! and retypes rewrite the id and the tools surface the cascade the caller
//! must perform on referencing decisions.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

use super::helpers::{arg_bool, arg_f64, arg_str, failure, load_workflow, sync_session, with_state};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::workflow::store::WorkflowRecord;
use crate::sketchflow::workflow::{
    generate_variable_id, normalize_variable_name, NodeType, OutputSpec, Variable, VariableRange,
    VariableSource,
};

type ToolOutput = Result<Value, Box<dyn Error + Send + Sync>>;

/// Map user-facing type spellings to internal types. `number` maps to
/// `float` (more general); integral range bounds narrow it to `int`.
fn internal_type(user_type: &str) -> Option<&'static str> {
    match user_type {
        "string" => Some("string"),
        "number" => Some("float"),
        "integer" | "int" => Some("int"),
        "boolean" | "bool" => Some("bool"),
        "float" => Some("float"),
        "enum" => Some("enum"),
        "date" => Some("date"),
        _ => None,
    }
}

fn is_integral(value: f64) -> bool {
    value.fract() == 0.0
}

async fn commit_variables(
    ctx: &ToolContext,
    store: &std::sync::Arc<dyn crate::sketchflow::workflow::store::WorkflowStore>,
    user_id: &str,
    staged: WorkflowRecord,
) -> Result<WorkflowRecord, Value> {
    let nodes = staged.nodes.clone();
    let variables = staged.variables.clone();
    let outputs = staged.outputs.clone();
    let committed = store
        .update(
            &staged.workflow_id,
            user_id,
            Box::new(move |record| {
                record.nodes = nodes;
                record.variables = variables;
                record.outputs = outputs;
            }),
        )
        .await
        .map_err(super::helpers::store_error_payload)?;
    sync_session(ctx, &committed).await;
    Ok(committed)
}

/// Register an input variable for the workflow.
pub struct AddWorkflowVariableTool;

#[async_trait]
impl WorkflowTool for AddWorkflowVariableTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "add_workflow_variable",
            "Register an input variable for the workflow. Users provide values for input \
             variables at execution time (e.g. 'Patient Age', 'Order Amount'). For subprocess \
             outputs, use the output_variable parameter when adding a subprocess node instead.",
        )
        .with_alias("add_workflow_input")
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "name",
                ToolParameterType::String,
                "Human-readable variable name (e.g. 'Patient Age')",
            )
            .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "type",
                ToolParameterType::String,
                "Variable type: 'string', 'number', 'boolean', or 'enum'",
            )
            .required()
            .with_enum(&["string", "number", "boolean", "enum"]),
        )
        .with_parameter(ToolParameter::new(
            "description",
            ToolParameterType::String,
            "Optional description of what this variable represents",
        ))
        .with_parameter(ToolParameter::new(
            "enum_values",
            ToolParameterType::Array,
            "For enum type: array of allowed values",
        ))
        .with_parameter(ToolParameter::new(
            "range_min",
            ToolParameterType::Number,
            "For number type: minimum allowed value",
        ))
        .with_parameter(ToolParameter::new(
            "range_max",
            ToolParameterType::Number,
            "For number type: maximum allowed value",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };

        let Some(name) = arg_str(&args, "name") else {
            return Ok(failure(
                "Variable 'name' is required and must be a non-empty string",
                "INVALID_PARAMETERS",
            ));
        };
        let user_type = arg_str(&args, "type").unwrap_or_default();
        if !matches!(user_type.as_str(), "string" | "number" | "boolean" | "enum") {
            return Ok(failure(
                "Variable 'type' must be one of: string, number, boolean, enum",
                "INVALID_PARAMETERS",
            ));
        }

        let enum_values = args.get("enum_values").and_then(Value::as_array).cloned();
        if user_type == "enum" && enum_values.as_ref().map(Vec::is_empty).unwrap_or(true) {
            return Ok(failure(
                "enum_values is required for type 'enum' and must be a non-empty array",
                "INVALID_PARAMETERS",
            ));
        }

        let normalized = normalize_variable_name(&name);
        if record
            .variables
            .iter()
            .any(|v| normalize_variable_name(&v.name) == normalized)
        {
            return Ok(failure(
                format!("Variable '{}' already exists (case-insensitive check)", name),
                "DUPLICATE_VARIABLE",
            ));
        }

        let range_min = arg_f64(&args, "range_min");
        let range_max = arg_f64(&args, "range_max");
        let mut var_type = internal_type(&user_type).unwrap_or("string");
        if user_type == "number" {
            if let (Some(min), Some(max)) = (range_min, range_max) {
                if is_integral(min) && is_integral(max) {
                    var_type = "int";
                }
            }
        }

        let variable = Variable {
            id: generate_variable_id(&name, var_type, VariableSource::Input),
            name: name.clone(),
            var_type: var_type.to_string(),
            source: VariableSource::Input,
            description: arg_str(&args, "description"),
            range: if range_min.is_some() || range_max.is_some() {
                Some(VariableRange {
                    min: range_min,
                    max: range_max,
                })
            } else {
                None
            },
            enum_values: if user_type == "enum" { enum_values } else { None },
        };

        let mut staged = record;
        staged.variables.push(variable.clone());
        let committed = match commit_variables(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "message": format!("Added input variable '{}' ({})", name, user_type),
                "variable": variable,
            }),
            &committed,
        ))
    }
}

/// Modify an existing workflow variable's properties.
pub struct ModifyWorkflowVariableTool;

#[async_trait]
impl WorkflowTool for ModifyWorkflowVariableTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "modify_workflow_variable",
            "Modify an existing workflow variable (type, name, description, range, enum values). \
             Use this to correct auto-inferred types for subprocess outputs. Changing the name \
             or type also changes the variable id; decision conditions referencing the old id \
             must be updated afterwards.",
        )
        .with_alias("modify_workflow_input")
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "name",
                ToolParameterType::String,
                "Name of the variable to modify (case-insensitive match)",
            )
            .required(),
        )
        .with_parameter(ToolParameter::new(
            "new_name",
            ToolParameterType::String,
            "New name for the variable",
        ))
        .with_parameter(ToolParameter::new(
            "new_type",
            ToolParameterType::String,
            "New type: 'string', 'number', 'integer', 'boolean', 'enum', or 'date'",
        ))
        .with_parameter(ToolParameter::new(
            "description",
            ToolParameterType::String,
            "New description",
        ))
        .with_parameter(ToolParameter::new(
            "enum_values",
            ToolParameterType::Array,
            "For enum type: array of allowed values",
        ))
        .with_parameter(ToolParameter::new(
            "range_min",
            ToolParameterType::Number,
            "For number types: minimum allowed value",
        ))
        .with_parameter(ToolParameter::new(
            "range_max",
            ToolParameterType::Number,
            "For number types: maximum allowed value",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };

        let Some(name) = arg_str(&args, "name") else {
            return Ok(failure(
                "Variable 'name' is required to identify which variable to modify",
                "INVALID_PARAMETERS",
            ));
        };

        let new_type = match arg_str(&args, "new_type") {
            Some(raw) => match internal_type(&raw) {
                Some(t) => Some(t.to_string()),
                None => {
                    return Ok(failure(
                        format!(
                            "Invalid type '{}'. Valid types: string, number, integer, boolean, enum, date",
                            raw
                        ),
                        "INVALID_PARAMETERS",
                    ))
                }
            },
            None => None,
        };
        let enum_values = args.get("enum_values").and_then(Value::as_array).cloned();
        if new_type.as_deref() == Some("enum") && enum_values.as_ref().map(Vec::is_empty).unwrap_or(true)
        {
            return Ok(failure(
                "enum_values is required when changing type to 'enum'",
                "INVALID_PARAMETERS",
            ));
        }

        let normalized = normalize_variable_name(&name);
        let mut staged = record;
        let Some(index) = staged
            .variables
            .iter()
            .position(|v| normalize_variable_name(&v.name) == normalized)
        else {
            let available: Vec<&str> = staged.variables.iter().map(|v| v.name.as_str()).collect();
            return Ok(failure(
                format!(
                    "Variable '{}' not found. Available variables: [{}]",
                    name,
                    available.join(", ")
                ),
                "NOT_FOUND",
            ));
        };

        let old_id = staged.variables[index].id.clone();
        let old_type = staged.variables[index].var_type.clone();
        let source = staged.variables[index].source;
        let mut changes: Vec<String> = Vec::new();

        if let Some(new_name) = arg_str(&args, "new_name") {
            let new_normalized = normalize_variable_name(&new_name);
            let conflict = staged
                .variables
                .iter()
                .enumerate()
                .any(|(i, v)| i != index && normalize_variable_name(&v.name) == new_normalized);
            if conflict {
                return Ok(failure(
                    format!("Variable name '{}' already exists", new_name),
                    "DUPLICATE_VARIABLE",
                ));
            }
            if new_name != staged.variables[index].name {
                changes.push(format!(
                    "name: '{}' -> '{}'",
                    staged.variables[index].name, new_name
                ));
                staged.variables[index].name = new_name;
            }
        }

        if let Some(new_type) = &new_type {
            if *new_type != old_type {
                changes.push(format!("type: '{}' -> '{}'", old_type, new_type));
                staged.variables[index].var_type = new_type.clone();
            }
        }

        let final_name = staged.variables[index].name.clone();
        let final_type = staged.variables[index].var_type.clone();
        let new_id = generate_variable_id(&final_name, &final_type, source);
        if new_id != old_id {
            changes.push(format!("id: '{}' -> '{}'", old_id, new_id));
            staged.variables[index].id = new_id.clone();
        }

        if let Some(description) = args.get("description").and_then(Value::as_str) {
            if staged.variables[index].description.as_deref() != Some(description) {
                changes.push("description updated".to_string());
            }
            staged.variables[index].description = Some(description.to_string());
        }

        if let Some(values) = enum_values {
            if final_type == "enum" && values.is_empty() {
                return Ok(failure(
                    "enum_values cannot be empty for enum type",
                    "INVALID_PARAMETERS",
                ));
            }
            changes.push(format!("enum_values: {}", json!(values)));
            staged.variables[index].enum_values = Some(values);
        }

        let range_min = arg_f64(&args, "range_min");
        let range_max = arg_f64(&args, "range_max");
        if range_min.is_some() || range_max.is_some() {
            if !matches!(final_type.as_str(), "int" | "float") {
                return Ok(failure(
                    format!(
                        "range_min/range_max only valid for number types, not '{}'",
                        final_type
                    ),
                    "INVALID_PARAMETERS",
                ));
            }
            let range = staged.variables[index].range.get_or_insert_with(VariableRange::default);
            if range_min.is_some() {
                range.min = range_min;
            }
            if range_max.is_some() {
                range.max = range_max;
            }
            changes.push(format!("range: [{:?}, {:?}]", range_min, range_max));
        }

        let variable = staged.variables[index].clone();
        if changes.is_empty() {
            return Ok(with_state(
                json!({
                    "success": true,
                    "message": format!("No changes made to variable '{}'", name),
                    "variable": variable,
                }),
                &staged,
            ));
        }

        // Enumerate the decisions that still point at the old id; the
        // caller performs the cascade as follow-up edits.
        let mut warning = None;
        if new_id != old_id {
            let affected: Vec<String> = staged
                .nodes
                .iter()
                .filter(|n| {
                    n.node_type == NodeType::Decision
                        && n.condition
                            .as_ref()
                            .map(|c| c.input_id == old_id)
                            .unwrap_or(false)
                })
                .map(|n| format!("'{}' ({})", n.label, n.id))
                .collect();
            if !affected.is_empty() {
                warning = Some(format!(
                    "Variable id changed from '{}' to '{}'. Update condition.input_id on these decision nodes: {}",
                    old_id,
                    new_id,
                    affected.join(", ")
                ));
            } else {
                warning = Some(format!(
                    "Variable id changed from '{}' to '{}'. Any decision conditions using the old id must be updated.",
                    old_id, new_id
                ));
            }
        }

        let committed = match commit_variables(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        let mut payload = json!({
            "success": true,
            "message": format!("Modified variable '{}': {}", final_name, changes.join(", ")),
            "variable": variable,
            "old_id": old_id,
            "new_id": new_id,
        });
        if let Some(warning) = warning {
            payload["warning"] = json!(warning);
        }
        Ok(with_state(payload, &committed))
    }
}

/// Remove a workflow variable, optionally cascading over decisions.
pub struct RemoveWorkflowVariableTool;

#[async_trait]
impl WorkflowTool for RemoveWorkflowVariableTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "remove_workflow_variable",
            "Remove a workflow variable. Refused while decision nodes reference it unless \
             force=true, which clears the referencing conditions.",
        )
        .with_alias("remove_workflow_input")
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "name",
                ToolParameterType::String,
                "Name of the variable to remove (case-insensitive match)",
            )
            .required(),
        )
        .with_parameter(ToolParameter::new(
            "force",
            ToolParameterType::Boolean,
            "Clear conditions on referencing decision nodes instead of refusing",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let Some(name) = arg_str(&args, "name") else {
            return Ok(failure("Variable 'name' is required", "INVALID_PARAMETERS"));
        };
        let force = arg_bool(&args, "force").unwrap_or(false);

        let normalized = normalize_variable_name(&name);
        let mut staged = record;
        let Some(index) = staged
            .variables
            .iter()
            .position(|v| normalize_variable_name(&v.name) == normalized)
        else {
            return Ok(failure(
                format!("Variable '{}' not found", name),
                "NOT_FOUND",
            ));
        };
        let variable = staged.variables[index].clone();

        let referencing: Vec<(String, String)> = staged
            .nodes
            .iter()
            .filter(|n| {
                n.node_type == NodeType::Decision
                    && n.condition
                        .as_ref()
                        .map(|c| c.input_id == variable.id)
                        .unwrap_or(false)
            })
            .map(|n| (n.id.clone(), n.label.clone()))
            .collect();

        if !referencing.is_empty() && !force {
            let labels: Vec<String> = referencing
                .iter()
                .map(|(id, label)| format!("'{}' ({})", label, id))
                .collect();
            return Ok(failure(
                format!(
                    "Variable '{}' is referenced by decision nodes: {}. Pass force=true to clear those conditions.",
                    name,
                    labels.join(", ")
                ),
                "VARIABLE_IN_USE",
            ));
        }

        staged.variables.remove(index);
        let mut cleared: Vec<String> = Vec::new();
        if force {
            for node in &mut staged.nodes {
                let references = node
                    .condition
                    .as_ref()
                    .map(|c| c.input_id == variable.id)
                    .unwrap_or(false);
                if references {
                    node.condition = None;
                    cleared.push(node.id.clone());
                }
                if node
                    .input_ref
                    .as_deref()
                    .map(|r| normalize_variable_name(r) == normalized)
                    .unwrap_or(false)
                {
                    node.input_ref = None;
                }
            }
        }

        let committed = match commit_variables(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        let mut message = format!("Removed variable '{}'", name);
        if !cleared.is_empty() {
            message.push_str(&format!(
                ". Cleared conditions on: [{}]. These decisions need new conditions before the workflow validates strictly",
                cleared.join(", ")
            ));
        }
        Ok(with_state(
            json!({
                "success": true,
                "message": message,
                "removed": variable,
                "cleared_conditions": cleared,
            }),
            &committed,
        ))
    }
}

/// Declare or update a named workflow output.
pub struct SetWorkflowOutputTool;

#[async_trait]
impl WorkflowTool for SetWorkflowOutputTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "set_workflow_output",
            "Declare or update a named output of the workflow.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to edit")
                .required(),
        )
        .with_parameter(
            ToolParameter::new("name", ToolParameterType::String, "Output name").required(),
        )
        .with_parameter(
            ToolParameter::new("type", ToolParameterType::String, "Output type").required(),
        )
        .with_parameter(ToolParameter::new(
            "description",
            ToolParameterType::String,
            "Optional description",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };
        let Some(name) = arg_str(&args, "name") else {
            return Ok(failure("Output 'name' is required", "INVALID_PARAMETERS"));
        };
        let Some(output_type) = arg_str(&args, "type") else {
            return Ok(failure("Output 'type' is required", "INVALID_PARAMETERS"));
        };

        let output = OutputSpec {
            name: name.clone(),
            output_type,
            description: arg_str(&args, "description"),
        };

        let mut staged = record;
        let normalized = normalize_variable_name(&name);
        let updated = match staged
            .outputs
            .iter()
            .position(|o| normalize_variable_name(&o.name) == normalized)
        {
            Some(index) => {
                staged.outputs[index] = output.clone();
                true
            }
            None => {
                staged.outputs.push(output.clone());
                false
            }
        };

        let committed = match commit_variables(ctx, &store, &user_id, staged).await {
            Ok(record) => record,
            Err(payload) => return Ok(payload),
        };

        Ok(with_state(
            json!({
                "success": true,
                "output": output,
                "message": if updated {
                    format!("Updated output '{}'", name)
                } else {
                    format!("Declared output '{}'", name)
                },
            }),
            &committed,
        ))
    }
}
