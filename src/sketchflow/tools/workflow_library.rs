//! Workflow library tools: create, publish, browse.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::error::Error;

use super::helpers::{arg_bool, arg_str, failure, load_workflow, require_store, sync_session};
use crate::sketchflow::tool_protocol::{
    ToolContext, ToolMetadata, ToolParameter, ToolParameterType, WorkflowTool,
};
use crate::sketchflow::workflow::store::WorkflowRecord;
use crate::sketchflow::workflow::generate_workflow_id;

type ToolOutput = Result<Value, Box<dyn Error + Send + Sync>>;

const VALID_OUTPUT_TYPES: [&str; 5] = ["string", "int", "float", "bool", "json"];

/// Create a new empty workflow in the user's library.
pub struct CreateWorkflowTool;

#[async_trait]
impl WorkflowTool for CreateWorkflowTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "create_workflow",
            "Create a new workflow in the user's library. Returns a workflow_id that must be \
             used in all subsequent tool calls to edit this workflow. The workflow starts empty \
             and must be built with add_node, add_connection, etc. Always call this FIRST \
             before adding nodes or variables.",
        )
        .with_parameter(
            ToolParameter::new(
                "name",
                ToolParameterType::String,
                "Name for the workflow (e.g. 'BMI Calculator', 'Loan Approval')",
            )
            .required(),
        )
        .with_parameter(
            ToolParameter::new(
                "output_type",
                ToolParameterType::String,
                "Type of value the workflow returns",
            )
            .required()
            .with_enum(&VALID_OUTPUT_TYPES),
        )
        .with_parameter(ToolParameter::new(
            "description",
            ToolParameterType::String,
            "Description of what the workflow does",
        ))
        .with_parameter(ToolParameter::new(
            "domain",
            ToolParameterType::String,
            "Domain/category for the workflow (e.g. 'Healthcare', 'Finance')",
        ))
        .with_parameter(ToolParameter::new(
            "tags",
            ToolParameterType::Array,
            "List of tags for categorization",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let Some(name) = arg_str(&args, "name") else {
            return Ok(failure(
                "Workflow 'name' is required and must be a non-empty string",
                "MISSING_NAME",
            ));
        };
        let output_type = arg_str(&args, "output_type").unwrap_or_default();
        if !VALID_OUTPUT_TYPES.contains(&output_type.as_str()) {
            return Ok(failure(
                format!(
                    "Workflow 'output_type' must be one of: {}",
                    VALID_OUTPUT_TYPES.join(", ")
                ),
                "INVALID_OUTPUT_TYPE",
            ));
        }
        let (store, user_id) = match require_store(ctx) {
            Ok(pair) => pair,
            Err(payload) => return Ok(payload),
        };

        let workflow_id = generate_workflow_id();
        let mut record = WorkflowRecord::new_draft(&workflow_id, &user_id, &name, &output_type);
        record.description = arg_str(&args, "description").unwrap_or_default();
        record.domain = arg_str(&args, "domain");
        record.tags = args
            .get("tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if let Err(err) = store.create(record.clone()).await {
            return Ok(failure(err.to_string(), "CREATE_FAILED"));
        }
        sync_session(ctx, &record).await;

        Ok(json!({
            "success": true,
            "workflow_id": workflow_id,
            "name": name,
            "output_type": output_type,
            "message": format!(
                "Created workflow '{}' with ID {}. Use this workflow_id in all subsequent tool calls.",
                name, workflow_id
            ),
        }))
    }
}

/// Publish a draft workflow to the library.
pub struct SaveWorkflowToLibraryTool;

#[async_trait]
impl WorkflowTool for SaveWorkflowToLibraryTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "save_workflow_to_library",
            "Publish a workflow so it appears in library browse lists. Optionally updates \
             name, description, domain, or tags at the same time. Idempotent.",
        )
        .with_parameter(
            ToolParameter::new("workflow_id", ToolParameterType::String, "Workflow to publish")
                .required(),
        )
        .with_parameter(ToolParameter::new("name", ToolParameterType::String, "New name"))
        .with_parameter(ToolParameter::new(
            "description",
            ToolParameterType::String,
            "New description",
        ))
        .with_parameter(ToolParameter::new("domain", ToolParameterType::String, "New domain"))
        .with_parameter(ToolParameter::new("tags", ToolParameterType::Array, "New tags"))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id, record) = match load_workflow(&args, ctx).await {
            Ok(loaded) => loaded,
            Err(payload) => return Ok(payload),
        };

        if !record.is_draft
            && arg_str(&args, "name").is_none()
            && arg_str(&args, "description").is_none()
            && arg_str(&args, "domain").is_none()
            && args.get("tags").is_none()
        {
            return Ok(json!({
                "success": true,
                "already_saved": true,
                "workflow_id": record.workflow_id,
                "message": format!("Workflow '{}' is already in the library", record.name),
            }));
        }

        let name = arg_str(&args, "name");
        let description = arg_str(&args, "description");
        let domain = arg_str(&args, "domain");
        let tags: Option<Vec<String>> = args.get("tags").and_then(Value::as_array).map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect()
        });

        let committed = match store
            .update(
                &record.workflow_id,
                &user_id,
                Box::new(move |r| {
                    r.is_draft = false;
                    if let Some(name) = name {
                        r.name = name;
                    }
                    if let Some(description) = description {
                        r.description = description;
                    }
                    if let Some(domain) = domain {
                        r.domain = Some(domain);
                    }
                    if let Some(tags) = tags {
                        r.tags = tags;
                    }
                }),
            )
            .await
        {
            Ok(record) => record,
            Err(err) => return Ok(super::helpers::store_error_payload(err)),
        };

        Ok(json!({
            "success": true,
            "workflow_id": committed.workflow_id,
            "name": committed.name,
            "message": format!("Saved workflow '{}' to the library", committed.name),
        }))
    }
}

/// Browse the user's workflow library.
pub struct ListWorkflowsInLibraryTool;

#[async_trait]
impl WorkflowTool for ListWorkflowsInLibraryTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new(
            "list_workflows_in_library",
            "List workflows in the user's library. Drafts are hidden unless include_drafts or \
             drafts_only is set.",
        )
        .with_parameter(ToolParameter::new(
            "search_query",
            ToolParameterType::String,
            "Substring match against name and description",
        ))
        .with_parameter(ToolParameter::new(
            "domain",
            ToolParameterType::String,
            "Filter by domain (case-insensitive)",
        ))
        .with_parameter(ToolParameter::new(
            "include_drafts",
            ToolParameterType::Boolean,
            "Include draft workflows in the results",
        ))
        .with_parameter(ToolParameter::new(
            "drafts_only",
            ToolParameterType::Boolean,
            "Return only draft workflows",
        ))
        .with_parameter(ToolParameter::new(
            "limit",
            ToolParameterType::Integer,
            "Maximum number of results (default 20)",
        ))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolOutput {
        let (store, user_id) = match require_store(ctx) {
            Ok(pair) => pair,
            Err(payload) => return Ok(payload),
        };
        let search_query = arg_str(&args, "search_query").map(|q| q.to_lowercase());
        let domain = arg_str(&args, "domain").map(|d| d.to_lowercase());
        let include_drafts = arg_bool(&args, "include_drafts").unwrap_or(false);
        let drafts_only = arg_bool(&args, "drafts_only").unwrap_or(false);
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(20)
            .max(1) as usize;

        let records = match store.list(&user_id).await {
            Ok(records) => records,
            Err(err) => return Ok(super::helpers::store_error_payload(err)),
        };

        let entries: Vec<Value> = records
            .into_iter()
            .filter(|r| {
                if drafts_only {
                    r.is_draft
                } else {
                    include_drafts || !r.is_draft
                }
            })
            .filter(|r| match &domain {
                Some(domain) => r
                    .domain
                    .as_deref()
                    .map(|d| d.to_lowercase() == *domain)
                    .unwrap_or(false),
                None => true,
            })
            .filter(|r| match &search_query {
                Some(query) => {
                    r.name.to_lowercase().contains(query)
                        || r.description.to_lowercase().contains(query)
                }
                None => true,
            })
            .take(limit)
            .map(|r| {
                json!({
                    "workflow_id": r.workflow_id,
                    "name": r.name,
                    "description": r.description,
                    "domain": r.domain,
                    "tags": r.tags,
                    "status": if r.is_draft { "draft" } else { "published" },
                    "output_type": r.output_type,
                    "node_count": r.nodes.len(),
                    "updated_at": r.updated_at,
                })
            })
            .collect();

        let count = entries.len();
        Ok(json!({
            "success": true,
            "workflows": entries,
            "count": count,
            "message": format!("Found {} workflow(s)", count),
        }))
    }
}
