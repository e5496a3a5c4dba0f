// src/lib.rs

// Import the top-level `sketchflow` module.
pub mod sketchflow;

// Re-export the module tree at the crate root so downstream code (and the
// integration tests) can write sketchflow::tool_protocol::... instead of
// navigating the whole hierarchy.
pub use sketchflow::{
    analysis, cancellation, client_wrapper, clients, config, conversation, history, logging_utils,
    mcp_client, orchestrator, orchestrator_config, session, subagent, token_usage, tool_protocol,
    tools, uploads, workflow,
};

#[cfg(feature = "mcp-server")]
pub use sketchflow::mcp_server;

// Re-exporting key items for easier external access.
pub use sketchflow::client_wrapper::{ChatMessage, ClientWrapper, MessageContent, Role};
pub use sketchflow::conversation::{Conversation, ConversationStore};
pub use sketchflow::orchestrator::{Orchestrator, RespondOptions, ToolResult};
pub use sketchflow::tool_protocol::{ToolContext, ToolRegistry};
