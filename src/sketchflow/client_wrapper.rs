//! Shared primitives for provider-agnostic LLM clients.
//!
//! The [`ClientWrapper`] trait hides provider specifics behind three
//! operations: a plain completion, a streaming completion, and a
//! tool-enabled completion that reconstructs native tool calls from the
//! stream. The supporting types describe chat messages, content blocks
//! (text, images, PDF documents), tool schemas, and token accounting.
//!
//! The orchestrator and subagent only ever talk to this trait; the concrete
//! Anthropic implementation lives in [`crate::sketchflow::clients`], and
//! tests substitute scripted mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;

use crate::sketchflow::cancellation::CancelToken;

/// Boxed error type used at the adapter seam.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Callback invoked with each streamed text delta.
pub type DeltaCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Message author roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Primes or constrains assistant behaviour; extracted into the
    /// provider's system field by the adapter.
    System,
    User,
    Assistant,
    /// A tool-result message correlated with a prior assistant tool call.
    Tool,
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    /// Image carried as a data URL (`data:image/...;base64,...`).
    ImageUrl { url: String },
    /// PDF carried as a data URL; becomes a `document` block on the wire.
    DocumentUrl { url: String },
}

/// Message body: plain text or a sequence of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten to text (block messages join their text parts).
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// A native tool call requested by the assistant.
///
/// `arguments` is the raw JSON string exactly as reconstructed from the
/// stream; the orchestrator parses it tolerantly (malformed → `{}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry of the internal message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
    /// Non-empty only on assistant messages that requested tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<NativeToolCall>,
    /// Set only on `Role::Tool` messages; correlates with the call id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// A tool-result message carrying the serialized tool payload.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

/// Provider-agnostic tool schema passed alongside a chat request.
///
/// Serialized as a function-calling entry: `{name, description,
/// parameters: {type: "object", properties, required}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Tool selection directive forwarded to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Any,
    Tool(String),
}

/// Token accounting for one provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// Per-call options threaded through every adapter operation.
#[derive(Clone)]
pub struct CallOptions {
    /// Completion token budget.
    pub max_tokens: u32,
    /// Component issuing the call (`orchestrator`, `subagent`, …) for the
    /// usage log.
    pub caller: String,
    /// Request tag distinguishing call sites within a component.
    pub request_tag: String,
    /// Cooperative cancellation, checked on every streamed delta.
    pub cancel: CancelToken,
}

impl CallOptions {
    pub fn new(caller: impl Into<String>, request_tag: impl Into<String>) -> Self {
        Self {
            max_tokens: 60_000,
            caller: caller.into(),
            request_tag: request_tag.into(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a plain or streaming completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    /// Concatenated extended-thinking content, empty when the provider
    /// surfaced none.
    pub thinking: String,
}

/// Result of a tool-enabled completion.
#[derive(Debug, Clone, Default)]
pub struct ToolCompletion {
    pub text: String,
    pub tool_calls: Vec<NativeToolCall>,
    pub thinking: String,
}

/// Trait-driven abstraction over a concrete streaming LLM provider.
///
/// Implementations must be `Send + Sync` so sessions can be shared between
/// tasks, and must raise [`Cancelled`](crate::sketchflow::cancellation::Cancelled)
/// (as a boxed error) when the request's cancel token trips mid-stream.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Full request/response completion. No tool catalogue is sent.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, BoxError>;

    /// Streaming completion; `on_delta` receives incremental text.
    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
        on_delta: DeltaCallback,
    ) -> Result<Completion, BoxError>;

    /// Tool-enabled completion. Streams content when `on_delta` is given,
    /// reconstructing tool-use blocks from incremental JSON deltas either
    /// way.
    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        opts: &CallOptions,
        on_delta: Option<DeltaCallback>,
    ) -> Result<ToolCompletion, BoxError>;

    /// Identifier of the upstream model (e.g. `"claude-sonnet-4-5"`).
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_content_flattens_blocks_to_text() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ImageUrl { url: "data:image/png;base64,xyz".into() },
            ContentBlock::Text { text: "b".into() },
        ]);
        assert_eq!(content.as_text(), "ab");
    }

    #[test]
    fn tool_result_message_carries_call_id() {
        let message = ChatMessage::tool_result("call_1", "{\"success\":true}");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
    }
}
