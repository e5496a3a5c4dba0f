// src/sketchflow/mod.rs

pub mod analysis;
pub mod cancellation;
pub mod client_wrapper;
pub mod clients;
pub mod config;
pub mod conversation;
pub mod history;
pub mod logging_utils;
pub mod mcp_client;
#[cfg(feature = "mcp-server")]
pub mod mcp_server;
pub mod orchestrator;
pub mod orchestrator_config;
pub mod session;
pub mod subagent;
pub mod token_usage;
pub mod tool_protocol;
pub mod tools;
pub mod uploads;
pub mod workflow;

// Export the orchestrator at the module root so callers reach it as
// sketchflow::Orchestrator instead of sketchflow::orchestrator::Orchestrator.
pub use conversation::{Conversation, ConversationStore};
pub use orchestrator::Orchestrator;
