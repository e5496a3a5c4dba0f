//! Anthropic Messages API client.
//!
//! Implements [`ClientWrapper`] directly over the streaming Messages
//! endpoint. The interesting part is tool-call reconstruction: tool-use
//! blocks arrive as a `content_block_start` (carrying id and name, and
//! sometimes a complete input) followed by `input_json_delta` events whose
//! `partial_json` fragments are buffered per block index and parsed at
//! `content_block_stop`. Blocks recovered from buffers are merged with
//! blocks whose input arrived whole, deduplicating by id first and by
//! `name + arguments` signature otherwise.
//!
//! Extended-thinking deltas are concatenated and surfaced through
//! [`Completion::thinking`] / [`ToolCompletion::thinking`]; per-call usage
//! goes to the configured [`TokenUsageLog`].

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::Instant;

use crate::sketchflow::cancellation::Cancelled;
use crate::sketchflow::client_wrapper::{
    BoxError, CallOptions, ChatMessage, ClientWrapper, Completion, ContentBlock, DeltaCallback,
    MessageContent, NativeToolCall, Role, TokenUsage, ToolChoice, ToolCompletion, ToolDefinition,
};
use crate::sketchflow::token_usage::{TokenUsageEntry, TokenUsageLog};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Provider-level failure (HTTP error status, malformed stream, …).
#[derive(Debug)]
pub struct ProviderError(pub String);

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anthropic error: {}", self.0)
    }
}

impl Error for ProviderError {}

/// Streaming client for Anthropic's Messages API.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    usage_log: Option<TokenUsageLog>,
}

impl AnthropicClient {
    /// Create a client for the given API key and model id.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            usage_log: None,
        }
    }

    /// Point the client at a compatible base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach a token usage sink recording every call.
    pub fn with_usage_log(mut self, usage_log: TokenUsageLog) -> Self {
        self.usage_log = Some(usage_log);
        self
    }

    async fn run_stream(
        &self,
        payload: Value,
        opts: &CallOptions,
        on_delta: Option<&DeltaCallback>,
        function: &str,
        tool_choice: &str,
        tool_count: usize,
        tool_names: Vec<String>,
        message_count: usize,
    ) -> Result<StreamOutcome, BoxError> {
        let started = Instant::now();
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Box::new(ProviderError(format!("HTTP {}: {}", status, body))));
        }

        let mut outcome = StreamOutcome::default();
        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            opts.cancel.check("llm stream").map_err(box_cancel)?;
            let event = event.map_err(|e| ProviderError(format!("stream error: {}", e)))?;
            if event.data.trim().is_empty() {
                continue;
            }
            let data: Value = match serde_json::from_str(&event.data) {
                Ok(value) => value,
                Err(_) => continue,
            };
            outcome.handle_event(&data, on_delta);
        }
        outcome.finish();

        if let Some(usage_log) = &self.usage_log {
            let mut entry = TokenUsageEntry::new(self.model.clone(), opts.caller.clone(), opts.request_tag.clone());
            entry.provider_message_id = outcome.message_id.clone();
            entry.function = function.to_string();
            entry.tool_choice = tool_choice.to_string();
            entry.tool_count = tool_count;
            entry.tools = tool_names;
            entry.message_count = message_count;
            entry.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            entry.usage = outcome.usage.clone();
            usage_log.record(&entry);
        }
        log::info!(
            "Anthropic streaming completed ms={:.1} messages={}",
            started.elapsed().as_secs_f64() * 1000.0,
            message_count
        );

        Ok(outcome)
    }

    fn base_payload(&self, messages: &[ChatMessage], max_tokens: u32) -> (Value, usize) {
        let (system, converted) = to_anthropic_messages(messages);
        let payload = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "system": system,
            "messages": converted,
            "stream": true,
        });
        (payload, messages.len())
    }
}

#[async_trait]
impl ClientWrapper for AnthropicClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
    ) -> Result<Completion, BoxError> {
        let (payload, count) = self.base_payload(messages, opts.max_tokens);
        let outcome = self
            .run_stream(payload, opts, None, "complete", "", 0, Vec::new(), count)
            .await?;
        if outcome.text.is_empty() {
            return Err(Box::new(ProviderError("empty completion".to_string())));
        }
        Ok(outcome.into_completion())
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        opts: &CallOptions,
        on_delta: DeltaCallback,
    ) -> Result<Completion, BoxError> {
        let (payload, count) = self.base_payload(messages, opts.max_tokens);
        let outcome = self
            .run_stream(
                payload,
                opts,
                Some(&on_delta),
                "complete_stream",
                "",
                0,
                Vec::new(),
                count,
            )
            .await?;
        Ok(outcome.into_completion())
    }

    async fn complete_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tool_choice: Option<ToolChoice>,
        opts: &CallOptions,
        on_delta: Option<DeltaCallback>,
    ) -> Result<ToolCompletion, BoxError> {
        let choice = tool_choice.unwrap_or(ToolChoice::Auto);
        let (mut payload, count) = self.base_payload(messages, opts.max_tokens);
        let tool_payload: Vec<Value> = if choice == ToolChoice::None {
            Vec::new()
        } else {
            tools.iter().map(tool_to_wire).collect()
        };
        let choice_str = match &choice {
            ToolChoice::Auto => "auto".to_string(),
            ToolChoice::None => "none".to_string(),
            ToolChoice::Any => "any".to_string(),
            ToolChoice::Tool(name) => name.clone(),
        };
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("tools".into(), Value::Array(tool_payload));
            obj.insert(
                "tool_choice".into(),
                match &choice {
                    ToolChoice::Auto => json!({"type": "auto"}),
                    ToolChoice::None => json!({"type": "none"}),
                    ToolChoice::Any => json!({"type": "any"}),
                    ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
                },
            );
        }
        let tool_names: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();
        let outcome = self
            .run_stream(
                payload,
                opts,
                on_delta.as_ref(),
                "complete_with_tools",
                &choice_str,
                tools.len(),
                tool_names,
                count,
            )
            .await?;
        Ok(outcome.into_tool_completion())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn box_cancel(err: Cancelled) -> BoxError {
    Box::new(err)
}

/// One tool-use block under reconstruction.
#[derive(Debug, Default, Clone)]
struct ToolBlock {
    id: String,
    name: String,
    /// Input as reported whole by `content_block_start`, if any.
    initial_input: Option<Value>,
    /// Input parsed from the accumulated `partial_json` buffer.
    parsed_input: Option<Value>,
    buffer: String,
}

/// Accumulated stream state.
#[derive(Debug, Default)]
struct StreamOutcome {
    message_id: Option<String>,
    text: String,
    thinking: String,
    usage: TokenUsage,
    /// Tool blocks keyed by content block index (ordered).
    tool_blocks: BTreeMap<u64, ToolBlock>,
    tool_calls: Vec<NativeToolCall>,
}

impl StreamOutcome {
    fn handle_event(&mut self, data: &Value, on_delta: Option<&DeltaCallback>) {
        match data.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                let message = &data["message"];
                self.message_id = message
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                self.merge_usage(message.get("usage"));
            }
            Some("content_block_start") => {
                let block = &data["content_block"];
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    let index = data.get("index").and_then(Value::as_u64).unwrap_or_else(|| {
                        self.tool_blocks.keys().next_back().map(|i| i + 1).unwrap_or(0)
                    });
                    let initial_input = block.get("input").cloned().filter(|input| {
                        input.as_object().map(|o| !o.is_empty()).unwrap_or(false)
                    });
                    self.tool_blocks.entry(index).or_insert_with(|| ToolBlock {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        initial_input,
                        parsed_input: None,
                        buffer: String::new(),
                    });
                }
            }
            Some("content_block_delta") => {
                let delta = &data["delta"];
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.get("text").and_then(Value::as_str) {
                            self.text.push_str(text);
                            if let Some(cb) = on_delta {
                                cb(text);
                            }
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(thinking) = delta.get("thinking").and_then(Value::as_str) {
                            self.thinking.push_str(thinking);
                        }
                    }
                    Some("input_json_delta") => {
                        if let (Some(index), Some(partial)) = (
                            data.get("index").and_then(Value::as_u64),
                            delta.get("partial_json").and_then(Value::as_str),
                        ) {
                            if let Some(block) = self.tool_blocks.get_mut(&index) {
                                block.buffer.push_str(partial);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some(index) = data.get("index").and_then(Value::as_u64) {
                    if let Some(block) = self.tool_blocks.get_mut(&index) {
                        if !block.buffer.is_empty() {
                            block.parsed_input = serde_json::from_str(&block.buffer).ok();
                        }
                    }
                }
            }
            Some("message_delta") => {
                self.merge_usage(data.get("usage"));
            }
            _ => {}
        }
    }

    fn merge_usage(&mut self, usage: Option<&Value>) {
        let Some(usage) = usage else { return };
        if let Some(v) = usage.get("input_tokens").and_then(Value::as_u64) {
            self.usage.input_tokens = v;
        }
        if let Some(v) = usage.get("output_tokens").and_then(Value::as_u64) {
            self.usage.output_tokens = v;
        }
        if let Some(v) = usage.get("cache_creation_input_tokens").and_then(Value::as_u64) {
            self.usage.cache_creation_input_tokens = v;
        }
        if let Some(v) = usage.get("cache_read_input_tokens").and_then(Value::as_u64) {
            self.usage.cache_read_input_tokens = v;
        }
        self.usage.total_tokens = self.usage.input_tokens + self.usage.output_tokens;
    }

    /// Materialize tool calls: buffer-parsed blocks first (stream order),
    /// then blocks whose input arrived whole, deduplicated by id else by
    /// `name + arguments`.
    fn finish(&mut self) {
        let mut merged: Vec<NativeToolCall> = Vec::new();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        let recovered: Vec<NativeToolCall> = self
            .tool_blocks
            .values()
            .filter(|b| !b.name.is_empty())
            .map(|b| NativeToolCall {
                id: b.id.clone(),
                name: b.name.clone(),
                arguments: serde_json::to_string(
                    b.parsed_input
                        .as_ref()
                        .or(b.initial_input.as_ref())
                        .unwrap_or(&json!({})),
                )
                .unwrap_or_else(|_| "{}".to_string()),
            })
            .collect();
        let finalized: Vec<NativeToolCall> = self
            .tool_blocks
            .values()
            .filter(|b| !b.name.is_empty())
            .filter_map(|b| {
                let input = b.initial_input.as_ref()?;
                Some(NativeToolCall {
                    id: b.id.clone(),
                    name: b.name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                })
            })
            .collect();
        for call in recovered.into_iter().chain(finalized) {
            let key = if call.id.is_empty() {
                format!("sig:{}:{}", call.name, call.arguments)
            } else {
                format!("id:{}", call.id)
            };
            if seen.insert(key) {
                merged.push(call);
            }
        }
        self.tool_calls = merged;
    }

    fn into_completion(self) -> Completion {
        Completion {
            text: self.text,
            thinking: self.thinking,
        }
    }

    fn into_tool_completion(self) -> ToolCompletion {
        ToolCompletion {
            text: self.text,
            tool_calls: self.tool_calls,
            thinking: self.thinking,
        }
    }
}

/// Convert a [`ToolDefinition`] into the wire tool entry.
fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters_schema,
    })
}

/// Split a data URL into `(media_type, base64 payload)`.
fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (header, b64) = rest.split_once(";base64,")?;
    let media_type = if header.is_empty() { "image/jpeg" } else { header };
    Some((media_type.to_string(), b64.to_string()))
}

fn content_to_blocks(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![json!({"type": "text", "text": text})]
            }
        }
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => {
                    if text.is_empty() {
                        None
                    } else {
                        Some(json!({"type": "text", "text": text}))
                    }
                }
                ContentBlock::ImageUrl { url } => match split_data_url(url) {
                    Some((media_type, data)) => Some(json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": media_type, "data": data},
                    })),
                    None => {
                        log::warn!("Unsupported image url: {}", &url[..url.len().min(80)]);
                        None
                    }
                },
                ContentBlock::DocumentUrl { url } => match split_data_url(url) {
                    Some((_, data)) => Some(json!({
                        "type": "document",
                        "source": {"type": "base64", "media_type": "application/pdf", "data": data},
                    })),
                    None => {
                        log::warn!("Unsupported document url: {}", &url[..url.len().min(80)]);
                        None
                    }
                },
            })
            .collect(),
    }
}

/// Translate the internal message log into `(system, messages)` for the
/// wire: system messages are concatenated out-of-band, tool results become
/// `tool_result` user blocks, and assistant tool calls become `tool_use`
/// blocks.
pub fn to_anthropic_messages(messages: &[ChatMessage]) -> (String, Vec<Value>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut converted: Vec<Value> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.content.as_text();
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            Role::Tool => {
                let call_id = message.tool_call_id.clone().unwrap_or_default();
                converted.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": message.content.as_text(),
                    }],
                }));
            }
            Role::Assistant if !message.tool_calls.is_empty() => {
                let mut blocks = content_to_blocks(&message.content);
                for call in &message.tool_calls {
                    let input: Value =
                        serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                    let input = if input.is_object() { input } else { json!({}) };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": input,
                    }));
                }
                if !blocks.is_empty() {
                    converted.push(json!({"role": "assistant", "content": blocks}));
                }
            }
            Role::User | Role::Assistant => {
                let blocks = content_to_blocks(&message.content);
                if !blocks.is_empty() {
                    let role = if message.role == Role::User { "user" } else { "assistant" };
                    converted.push(json!({"role": role, "content": blocks}));
                }
            }
        }
    }

    (system_parts.join("\n\n"), converted)
}

/// Build a `Map` event for tests: not exposed publicly.
#[cfg(test)]
fn obj(entries: &[(&str, Value)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in entries {
        map.insert(key.to_string(), value.clone());
    }
    Value::Object(map)
}
