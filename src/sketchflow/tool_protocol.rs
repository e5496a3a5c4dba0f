//! Tool protocol abstraction.
//!
//! The [`ToolRegistry`] is the namespaced catalogue of operations exposed to
//! the LLM. Each tool declares [`ToolMetadata`] (name, description, typed
//! parameters, aliases for backward compatibility) and implements
//! [`WorkflowTool::execute`], receiving the parsed JSON arguments plus a
//! [`ToolContext`] carrying the session state, the workflow store, and the
//! turn's stream/cancel capabilities.
//!
//! Tool results are plain JSON objects with a `success` flag and optional
//! `message`/`error`/`error_code` fields; the orchestrator normalizes them.
//! Mutating tools also return the mutated `current_workflow` /
//! `workflow_analysis` slices so state reconciles identically across the
//! direct and MCP transports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::sketchflow::cancellation::CancelToken;
use crate::sketchflow::client_wrapper::{DeltaCallback, ToolDefinition};
use crate::sketchflow::session::SessionState;
use crate::sketchflow::workflow::store::WorkflowStore;

/// JSON-schema parameter types accepted on the function-calling wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: ToolParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            enum_values: None,
        }
    }

    /// Mark the parameter as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Restrict a string parameter to an enumerated value set.
    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }
}

/// Metadata describing a tool's LLM-visible interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    /// Alternate names this tool also answers to.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Build the function-calling schema entry for this tool.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        let mut properties = Map::new();
        let mut required: Vec<Value> = Vec::new();
        for parameter in &self.parameters {
            let mut schema = Map::new();
            schema.insert("type".into(), json!(parameter.param_type.as_str()));
            schema.insert("description".into(), json!(parameter.description));
            if let Some(values) = &parameter.enum_values {
                schema.insert("enum".into(), json!(values));
            }
            properties.insert(parameter.name.clone(), Value::Object(schema));
            if parameter.required {
                required.push(json!(parameter.name));
            }
        }
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Error types for tool operations.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// Requested tool is not registered.
    NotFound(String),
    /// Tool execution completed with an application level failure.
    ExecutionFailed(String),
    /// The provided JSON parameters failed validation.
    InvalidParameters(String),
    /// A lower level transport error occurred.
    ProtocolError(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {}", name),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {}", msg),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {}", msg),
            ToolError::ProtocolError(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl Error for ToolError {}

/// Capabilities injected into every tool execution.
#[derive(Clone)]
pub struct ToolContext {
    /// Live per-conversation session state (mutable by reference in direct
    /// mode).
    pub session: SessionState,
    /// Workflow persistence authority, when the deployment provides one.
    pub store: Option<Arc<dyn WorkflowStore>>,
    /// Acting user; editing tools fail without one.
    pub user_id: Option<String>,
    /// Streaming callback for tools that emit incremental output.
    pub stream: Option<DeltaCallback>,
    /// Cooperative cancellation for long-running tools.
    pub cancel: CancelToken,
}

impl ToolContext {
    /// A context over the given session with no store, user, or stream.
    pub fn bare(session: SessionState) -> Self {
        Self {
            session,
            store: None,
            user_id: None,
            stream: None,
            cancel: CancelToken::new(),
        }
    }
}

/// A tool exposed to the LLM through the registry.
#[async_trait]
pub trait WorkflowTool: Send + Sync {
    /// Static interface description.
    fn metadata(&self) -> ToolMetadata;

    /// Run the tool. The returned object carries `success` plus
    /// tool-specific fields; errors are reserved for programmer mistakes
    /// and transport failures, not application-level refusals.
    async fn execute(
        &self,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, Box<dyn Error + Send + Sync>>;
}

/// Namespaced catalogue of tools with alias routing.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn WorkflowTool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool under its canonical name and every alias. Later
    /// registrations replace earlier routes with the same name.
    pub fn register(&mut self, tool: Arc<dyn WorkflowTool>) {
        let metadata = tool.metadata();
        let index = self.tools.len();
        self.tools.push(tool);
        self.by_name.insert(metadata.name.clone(), index);
        for alias in metadata.aliases {
            self.by_name.insert(alias, index);
        }
    }

    /// Look up a tool by canonical name or alias.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn WorkflowTool>> {
        self.by_name.get(name).map(|&index| &self.tools[index])
    }

    /// Metadata for every registered tool, in registration order.
    pub fn list(&self) -> Vec<ToolMetadata> {
        self.tools.iter().map(|t| t.metadata()).collect()
    }

    /// Function-calling schema for the whole catalogue (canonical names
    /// only; aliases are routing sugar, not LLM surface).
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.metadata().to_tool_definition()).collect()
    }

    /// Dispatch a named tool. Unknown names fail with
    /// [`ToolError::NotFound`].
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, Box<dyn Error + Send + Sync>> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl WorkflowTool for EchoTool {
        fn metadata(&self) -> ToolMetadata {
            ToolMetadata::new("echo", "Echoes its arguments")
                .with_alias("repeat")
                .with_parameter(
                    ToolParameter::new("text", ToolParameterType::String, "Text to echo")
                        .required(),
                )
                .with_parameter(ToolParameter::new(
                    "mode",
                    ToolParameterType::String,
                    "Echo mode",
                ).with_enum(&["plain", "loud"]))
        }

        async fn execute(
            &self,
            args: Value,
            _ctx: &ToolContext,
        ) -> Result<Value, Box<dyn Error + Send + Sync>> {
            Ok(json!({"success": true, "echo": args}))
        }
    }

    #[tokio::test]
    async fn aliases_route_to_the_same_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let ctx = ToolContext::bare(SessionState::new());

        let direct = registry
            .execute("echo", json!({"text": "hi"}), &ctx)
            .await
            .unwrap();
        let aliased = registry
            .execute("repeat", json!({"text": "hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(direct, aliased);
    }

    #[tokio::test]
    async fn unknown_tool_fails_with_not_found() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::bare(SessionState::new());
        let err = registry.execute("missing", json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("Tool not found"));
    }

    #[test]
    fn schema_generation_matches_function_calling_shape() {
        let definition = EchoTool.metadata().to_tool_definition();
        assert_eq!(definition.name, "echo");
        let schema = &definition.parameters_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["text"]["type"], "string");
        assert_eq!(schema["properties"]["mode"]["enum"][1], "loud");
        assert_eq!(schema["required"][0], "text");
    }
}
