//! The orchestrator: drives a single user turn to completion.
//!
//! One `respond` call composes the system prompt, issues a streaming LLM
//! request with the tool catalogue, and loops while the response contains
//! tool calls: each call is dispatched sequentially through the registry
//! (or the MCP bridge), results are appended as tool messages, and the LLM
//! is re-invoked with a synthetic framing message. The loop ends when the
//! model answers in plain text, a tool fails terminally, the iteration
//! budget is exhausted, or the caller cancels; on cancellation the partial
//! streamed text is committed to history so the user sees exactly what was
//! streamed.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::sketchflow::cancellation::{is_cancelled_error, CancelToken};
use crate::sketchflow::client_wrapper::{
    BoxError, CallOptions, ChatMessage, ClientWrapper, DeltaCallback, NativeToolCall, ToolChoice,
};
use crate::sketchflow::mcp_client::McpClient;
use crate::sketchflow::orchestrator_config::{build_system_prompt, SystemPromptInputs};
use crate::sketchflow::session::SessionState;
use crate::sketchflow::tool_protocol::{ToolContext, ToolRegistry};
use crate::sketchflow::workflow::store::WorkflowStore;

/// Hard cap on tool iterations within one turn.
const MAX_TOOL_ITERATIONS: usize = 50;

/// History window dispatched to the LLM.
const HISTORY_WINDOW: usize = 20;

/// Chunk size used when emitting a non-streamed final text.
const STREAM_CHUNK_SIZE: usize = 800;

/// Normalized result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool: String,
    pub data: Value,
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
}

/// Tool lifecycle events surfaced to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEventKind {
    ToolStart,
    ToolComplete,
    ToolBatchComplete,
}

/// One tool lifecycle event.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub kind: ToolEventKind,
    pub tool_name: String,
    pub args: Value,
    pub result: Option<Value>,
}

/// Callback receiving tool lifecycle events.
pub type ToolEventCallback = Arc<dyn Fn(&ToolEvent) + Send + Sync>;

/// Per-turn options for [`Orchestrator::respond`].
#[derive(Clone, Default)]
pub struct RespondOptions {
    /// Whether files were attached to this turn (shapes the prompt).
    pub has_files: bool,
    /// Assistant text deltas stream here.
    pub stream: Option<DeltaCallback>,
    /// When false the model is instructed not to call tools and the tool
    /// loop is skipped entirely.
    pub allow_tools: bool,
    pub cancel: CancelToken,
    pub on_tool_event: Option<ToolEventCallback>,
}

impl RespondOptions {
    pub fn with_tools() -> Self {
        Self {
            allow_tools: true,
            ..Self::default()
        }
    }
}

/// Transport used for tool dispatch.
enum Transport {
    Direct,
    Mcp(Arc<McpClient>),
}

/// Orchestrates LLM tool-calling turns over a per-conversation session.
pub struct Orchestrator {
    client: Arc<dyn ClientWrapper>,
    tools: Arc<ToolRegistry>,
    session: SessionState,
    history: Vec<ChatMessage>,
    last_session_id: Option<String>,
    transport: Transport,
    store: Option<Arc<dyn WorkflowStore>>,
    user_id: Option<String>,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn ClientWrapper>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            client,
            tools,
            session: SessionState::new(),
            history: Vec::new(),
            last_session_id: None,
            transport: Transport::Direct,
            store: None,
            user_id: None,
        }
    }

    /// Route tool dispatch through a remote MCP endpoint.
    pub fn with_mcp(mut self, mcp: Arc<McpClient>) -> Self {
        self.transport = Transport::Mcp(mcp);
        self
    }

    /// Attach the workflow persistence authority.
    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the acting user for this conversation.
    pub fn set_user(&mut self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        self.user_id = Some(user_id);
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn last_session_id(&self) -> Option<&str> {
        self.last_session_id.as_deref()
    }

    /// Pull-based canvas sync: merge `{nodes, edges}` from an external
    /// provider. Provider failures are logged, never fatal.
    pub async fn sync_workflow(
        &self,
        provider: Option<&(dyn Fn() -> Result<Value, BoxError> + Send + Sync)>,
    ) {
        let Some(provider) = provider else { return };
        match provider() {
            Ok(payload) => {
                self.session.merge_workflow_value(&payload).await;
                let data = self.session.lock().await;
                log::info!(
                    "Synced workflow: {} nodes, {} edges",
                    data.workflow.nodes.len(),
                    data.workflow.edges.len()
                );
            }
            Err(err) => log::error!("Failed to sync workflow: {}", err),
        }
    }

    /// Pull-based analysis sync: merge variables/outputs/tree/doubts (and
    /// reasoning/guidance when present) from an external provider.
    pub async fn sync_workflow_analysis(
        &self,
        provider: Option<&(dyn Fn() -> Result<Value, BoxError> + Send + Sync)>,
    ) {
        let Some(provider) = provider else { return };
        match provider() {
            Ok(payload) => {
                self.session.merge_analysis_value(&payload).await;
                let data = self.session.lock().await;
                log::info!(
                    "Synced workflow analysis: {} variables, {} outputs",
                    data.variables.len(),
                    data.outputs.len()
                );
            }
            Err(err) => log::error!("Failed to sync workflow analysis: {}", err),
        }
    }

    /// Dispatch one tool by name, normalize its result, and reconcile any
    /// returned state slices into the session.
    pub async fn run_tool(
        &self,
        tool_name: &str,
        args: Value,
        stream: Option<DeltaCallback>,
        cancel: CancelToken,
    ) -> Result<ToolResult, BoxError> {
        log::info!("Running tool name={}", tool_name);
        log::info!(
            target: "sketchflow::tool_calls",
            "tool_request name={} args={}",
            tool_name,
            args
        );

        let data = match &self.transport {
            Transport::Direct => {
                let ctx = ToolContext {
                    session: self.session.clone(),
                    store: self.store.clone(),
                    user_id: self.user_id.clone(),
                    stream,
                    cancel,
                };
                self.tools.execute(tool_name, args, &ctx).await?
            }
            Transport::Mcp(mcp) => {
                // Session state travels as a regular argument; the remote
                // registry rehydrates it and returns the mutated slices.
                let mut snapshot = self.session.snapshot().await;
                if snapshot.user_id.is_none() {
                    snapshot.user_id = self.user_id.clone();
                }
                let mut mcp_args = if args.is_object() { args } else { json!({}) };
                mcp_args["session_state"] = serde_json::to_value(&snapshot)?;
                mcp.call_tool(tool_name, mcp_args).await?
            }
        };

        let result = normalize_tool_result(tool_name, data);
        log::info!(
            target: "sketchflow::tool_calls",
            "tool_response name={} success={}",
            tool_name,
            result.success
        );

        if result.success {
            if let Some(analysis) = result.data.get("workflow_analysis") {
                self.session.merge_analysis_value(analysis).await;
            }
            if let Some(workflow) = result.data.get("current_workflow") {
                self.session.merge_workflow_value(workflow).await;
            }
        }

        // publish_latest_analysis renders a stored flowchart onto the
        // canvas even though it is not an editing tool.
        if tool_name == "publish_latest_analysis" {
            if let Some(flowchart) = result.data.get("flowchart") {
                let has_nodes = flowchart
                    .get("nodes")
                    .and_then(Value::as_array)
                    .map(|n| !n.is_empty())
                    .unwrap_or(false);
                if has_nodes {
                    self.session.merge_workflow_value(flowchart).await;
                }
            }
        }

        Ok(result)
    }

    /// Respond to a user message, optionally calling tools.
    pub async fn respond(&mut self, user_message: &str, opts: RespondOptions) -> String {
        log::info!(
            "Received message bytes={} history_len={}",
            user_message.len(),
            self.history.len()
        );
        let cancel = opts.cancel.clone();
        let streamed: Arc<StdMutex<String>> = Arc::new(StdMutex::new(String::new()));
        let did_stream = Arc::new(AtomicBool::new(false));

        let on_delta: DeltaCallback = {
            let cancel = cancel.clone();
            let streamed = streamed.clone();
            let did_stream = did_stream.clone();
            let downstream = opts.stream.clone();
            Arc::new(move |delta: &str| {
                if cancel.is_cancelled() {
                    return;
                }
                did_stream.store(true, Ordering::SeqCst);
                if let Ok(mut buffer) = streamed.lock() {
                    buffer.push_str(delta);
                }
                if let Some(downstream) = &downstream {
                    downstream(delta);
                }
            })
        };

        if cancel.is_cancelled() {
            return self.finalize_cancel(user_message, &streamed);
        }

        let (system, tool_defs) = {
            let data = self.session.lock().await;
            let inputs = SystemPromptInputs {
                last_session_id: self.last_session_id.as_deref(),
                has_files: opts.has_files,
                uploaded_files: &data.uploaded_files,
                allow_tools: opts.allow_tools,
                reasoning: &data.reasoning,
                guidance: &data.guidance,
            };
            (build_system_prompt(&inputs), self.tools.tool_definitions())
        };

        // Keep only the trailing window to guard the context budget.
        let start = self.history.len().saturating_sub(HISTORY_WINDOW);
        if start > 0 {
            log::warn!(
                "History truncated from {} to {} messages to fit context window",
                self.history.len(),
                HISTORY_WINDOW
            );
        }
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(&self.history[start..]);
        messages.push(ChatMessage::user(user_message));

        let call_opts = CallOptions::new("orchestrator", "initial").with_cancel(cancel.clone());
        let streaming_delta = opts.stream.as_ref().map(|_| on_delta.clone());

        let initial = if opts.allow_tools {
            self.client
                .complete_with_tools(&messages, &tool_defs, None, &call_opts, streaming_delta)
                .await
                .map(|c| (c.text, c.tool_calls))
        } else if let Some(_stream) = &opts.stream {
            self.client
                .complete_stream(&messages, &call_opts, on_delta.clone())
                .await
                .map(|c| (c.text.trim().to_string(), Vec::new()))
        } else {
            self.client
                .complete_with_tools(&messages, &[], Some(ToolChoice::None), &call_opts, None)
                .await
                .map(|c| (c.text, c.tool_calls))
        };

        let (mut raw, mut tool_calls) = match initial {
            Ok(pair) => pair,
            Err(err) if is_cancelled_error(err.as_ref()) => {
                return self.finalize_cancel(user_message, &streamed)
            }
            Err(err) => {
                log::error!("LLM error while responding: {}", err);
                let error_msg = format!("LLM error: {}", err);
                self.history.push(ChatMessage::user(user_message));
                self.history.push(ChatMessage::assistant(error_msg.clone()));
                return error_msg;
            }
        };
        if cancel.is_cancelled() {
            return self.finalize_cancel(user_message, &streamed);
        }

        let mut tool_iterations = 0usize;
        let mut tool_results: Vec<ToolResult> = Vec::new();

        while opts.allow_tools && !tool_calls.is_empty() {
            if cancel.is_cancelled() {
                return self.finalize_cancel(user_message, &streamed);
            }
            tool_iterations += 1;
            if tool_iterations > MAX_TOOL_ITERATIONS {
                log::error!(
                    "Max tool iterations reached. Tools called: {:?}",
                    tool_results.iter().map(|r| r.tool.as_str()).collect::<Vec<_>>()
                );
                let error_msg = format!(
                    "Reached maximum tool iterations ({}). Executed {} tools successfully before stopping.",
                    MAX_TOOL_ITERATIONS,
                    tool_results.len()
                );
                self.history.push(ChatMessage::user(user_message));
                self.history.push(ChatMessage::assistant(error_msg.clone()));
                return error_msg;
            }
            log::info!(
                "Tool iteration {}, calling {} tools",
                tool_iterations,
                tool_calls.len()
            );

            let mut assistant = ChatMessage::assistant(raw.clone());
            assistant.tool_calls = tool_calls.clone();
            messages.push(assistant);

            let mut tool_failure: Option<ToolResult> = None;
            let mut skipped_calls: Vec<NativeToolCall> = Vec::new();

            for (idx, call) in tool_calls.iter().enumerate() {
                if cancel.is_cancelled() {
                    return self.finalize_cancel(user_message, &streamed);
                }
                let args: Value = serde_json::from_str(&call.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));

                emit_tool_event(
                    &opts.on_tool_event,
                    ToolEventKind::ToolStart,
                    &call.name,
                    args.clone(),
                    None,
                );
                let result = match self
                    .run_tool(&call.name, args.clone(), None, cancel.clone())
                    .await
                {
                    Ok(result) => result,
                    Err(err) if is_cancelled_error(err.as_ref()) => {
                        return self.finalize_cancel(user_message, &streamed)
                    }
                    Err(err) => {
                        log::error!(
                            target: "sketchflow::tool_calls",
                            "tool_error name={} error={}",
                            call.name,
                            err
                        );
                        let error_msg = format!("Tool error ({}): {}", call.name, err);
                        self.history.push(ChatMessage::user(user_message));
                        self.history.push(ChatMessage::assistant(error_msg.clone()));
                        return error_msg;
                    }
                };

                if let Some(session_id) = result.data.get("session_id").and_then(Value::as_str) {
                    if !session_id.is_empty() {
                        self.last_session_id = Some(session_id.to_string());
                    }
                }

                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    result.data.to_string(),
                ));
                emit_tool_event(
                    &opts.on_tool_event,
                    ToolEventKind::ToolComplete,
                    &call.name,
                    args,
                    Some(result.data.clone()),
                );
                let failed = !result.success;
                tool_results.push(result.clone());
                if failed {
                    tool_failure = Some(result);
                    skipped_calls = tool_calls[idx + 1..].to_vec();
                    break;
                }
            }

            // Mark everything after a failure as skipped so the model sees
            // one coherent batch outcome.
            for skipped in &skipped_calls {
                let args: Value = serde_json::from_str(&skipped.arguments)
                    .ok()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}));
                let payload = json!({
                    "success": false,
                    "skipped": true,
                    "error": format!("Skipped {} because a previous tool failed.", skipped.name),
                });
                messages.push(ChatMessage::tool_result(
                    skipped.id.clone(),
                    payload.to_string(),
                ));
                emit_tool_event(
                    &opts.on_tool_event,
                    ToolEventKind::ToolComplete,
                    &skipped.name,
                    args,
                    Some(payload),
                );
            }

            emit_tool_event(
                &opts.on_tool_event,
                ToolEventKind::ToolBatchComplete,
                "",
                json!({}),
                None,
            );

            if cancel.is_cancelled() {
                return self.finalize_cancel(user_message, &streamed);
            }

            messages.push(ChatMessage::system(if tool_failure.is_some() {
                "A tool call failed. The tool result and error details are provided above. \
                 Explain the failure clearly to the user and suggest next steps. If you can \
                 recover with additional tool calls, you may call them. Otherwise respond in \
                 plain text."
            } else {
                "Tool execution succeeded. The tool results are provided above. If additional \
                 tool calls are required to complete the user's request, you may call them \
                 (including multiple tool calls). Otherwise respond in plain text only, \
                 summarizing variables, outputs, and doubts."
            }));

            let call_opts =
                CallOptions::new("orchestrator", "post_tool").with_cancel(cancel.clone());
            let next = self
                .client
                .complete_with_tools(
                    &messages,
                    &tool_defs,
                    None,
                    &call_opts,
                    opts.stream.as_ref().map(|_| on_delta.clone()),
                )
                .await;
            match next {
                Ok(completion) => {
                    raw = completion.text;
                    tool_calls = completion.tool_calls;
                }
                Err(err) if is_cancelled_error(err.as_ref()) => {
                    return self.finalize_cancel(user_message, &streamed)
                }
                Err(err) => {
                    log::error!("LLM error while responding: {}", err);
                    let error_msg = format!("LLM error: {}", err);
                    self.history.push(ChatMessage::user(user_message));
                    self.history.push(ChatMessage::assistant(error_msg.clone()));
                    return error_msg;
                }
            }
            if cancel.is_cancelled() {
                return self.finalize_cancel(user_message, &streamed);
            }
        }

        let mut final_text = if raw.is_empty() && !tool_results.is_empty() {
            summarize_tool_results(&tool_results)
        } else {
            raw
        };
        if !tool_results.is_empty() && final_text.trim().is_empty() {
            final_text = format!("Completed {} tool operation(s).", tool_results.len());
            log::warn!(
                "Empty final response after {} tool calls - using fallback",
                tool_results.len()
            );
        }

        if let Some(stream) = &opts.stream {
            if !final_text.is_empty() && !did_stream.load(Ordering::SeqCst) {
                emit_stream(stream, &final_text);
            }
        }

        self.history.push(ChatMessage::user(user_message));
        self.history.push(ChatMessage::assistant(final_text.clone()));
        log::debug!("History now has {} messages", self.history.len());
        final_text
    }

    /// Commit the partial streamed chunk and the user message to history,
    /// returning the partial text.
    fn finalize_cancel(&mut self, user_message: &str, streamed: &Arc<StdMutex<String>>) -> String {
        let partial = streamed
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default();
        self.history.push(ChatMessage::user(user_message));
        if !partial.is_empty() {
            self.history.push(ChatMessage::assistant(partial.clone()));
        }
        partial
    }
}

fn emit_tool_event(
    callback: &Option<ToolEventCallback>,
    kind: ToolEventKind,
    tool_name: &str,
    args: Value,
    result: Option<Value>,
) {
    if let Some(callback) = callback {
        callback(&ToolEvent {
            kind,
            tool_name: tool_name.to_string(),
            args,
            result,
        });
    }
}

/// Normalize an arbitrary tool payload into a [`ToolResult`].
pub fn normalize_tool_result(tool_name: &str, data: Value) -> ToolResult {
    let mut data = if data.is_object() {
        data
    } else {
        json!({"result": data})
    };
    let success = match data.get("success").and_then(Value::as_bool) {
        Some(success) => success,
        None => {
            let success = data.get("error").is_none();
            data["success"] = json!(success);
            success
        }
    };
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let mut error = data
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !success && error.is_empty() {
        error = if message.is_empty() {
            format!("Tool {} failed.", tool_name)
        } else {
            message.clone()
        };
    }
    ToolResult {
        tool: tool_name.to_string(),
        data,
        success,
        message,
        error: if success { None } else { Some(error) },
    }
}

/// Emit text to a stream callback in fixed-size chunks.
fn emit_stream(stream: &DeltaCallback, text: &str) {
    let bytes = text.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        let mut end = (start + STREAM_CHUNK_SIZE).min(bytes.len());
        // Snap back to a char boundary.
        while end < bytes.len() && !text.is_char_boundary(end) {
            end -= 1;
        }
        stream(&text[start..end]);
        start = end;
    }
}

/// Plain-text fallback summary when the model returns no final text after
/// tool execution.
fn summarize_tool_results(results: &[ToolResult]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for result in results {
        if result
            .data
            .get("skipped")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }
        if !result.success {
            let error_text = result
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| {
                    if result.message.is_empty() {
                        "Tool failed.".to_string()
                    } else {
                        result.message.clone()
                    }
                });
            parts.push(format!("Tool failed ({}).\n\n{}", result.tool, error_text));
            continue;
        }
        if !result.message.is_empty() {
            let header = if results.len() > 1 {
                format!("Discussion ({}).", result.tool)
            } else {
                "Discussion.".to_string()
            };
            parts.push(format!("{}\n\n{}", header, result.message));
            continue;
        }

        let analysis = result.data.get("analysis").cloned().unwrap_or(json!({}));
        let format_items = |items: Option<&Value>| -> String {
            let lines: Vec<String> = items
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let name = item.get("name").and_then(Value::as_str)?;
                            Some(match item.get("type").and_then(Value::as_str) {
                                Some(item_type) => format!("- {} ({})", name, item_type),
                                None => format!("- {}", name),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            if lines.is_empty() {
                "- None".to_string()
            } else {
                lines.join("\n")
            }
        };
        let doubts: Vec<String> = analysis
            .get("doubts")
            .and_then(Value::as_array)
            .map(|doubts| {
                doubts
                    .iter()
                    .filter_map(|d| d.as_str().map(|d| format!("- {}", d)))
                    .collect()
            })
            .unwrap_or_default();
        let header = if results.len() > 1 {
            format!("Analysis complete ({}).", result.tool)
        } else {
            "Analysis complete.".to_string()
        };
        parts.push(format!(
            "{}\n\nVariables:\n{}\n\nOutputs:\n{}\n\nDoubts:\n{}",
            header,
            format_items(analysis.get("variables")),
            format_items(analysis.get("outputs")),
            if doubts.is_empty() {
                "- None".to_string()
            } else {
                doubts.join("\n")
            }
        ));
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_infers_success_from_error_presence() {
        let ok = normalize_tool_result("t", json!({"value": 1}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = normalize_tool_result("t", json!({"error": "boom"}));
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let failed_no_error = normalize_tool_result("t", json!({"success": false}));
        assert_eq!(failed_no_error.error.as_deref(), Some("Tool t failed."));
    }

    #[test]
    fn normalize_wraps_non_object_payloads() {
        let wrapped = normalize_tool_result("t", json!("plain"));
        assert_eq!(wrapped.data["result"], "plain");
        assert!(wrapped.success);
    }

    #[test]
    fn emit_stream_chunks_at_800() {
        let text = "x".repeat(2000);
        let chunks: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = chunks.clone();
        let callback: DeltaCallback = Arc::new(move |delta| {
            sink.lock().unwrap().push(delta.len());
        });
        emit_stream(&callback, &text);
        assert_eq!(*chunks.lock().unwrap(), vec![800, 800, 400]);
    }

    #[test]
    fn summary_reports_failures_and_analysis() {
        let results = vec![
            normalize_tool_result(
                "analyze_workflow",
                json!({
                    "success": true,
                    "analysis": {
                        "variables": [{"name": "BMI", "type": "float"}],
                        "outputs": [{"name": "Category"}],
                        "doubts": ["is the third branch reachable?"],
                    },
                }),
            ),
            normalize_tool_result("add_node", json!({"success": false, "error": "bad node"})),
        ];
        let summary = summarize_tool_results(&results);
        assert!(summary.contains("- BMI (float)"));
        assert!(summary.contains("- Category"));
        assert!(summary.contains("is the third branch reachable?"));
        assert!(summary.contains("Tool failed (add_node)."));
    }
}
