//! MCP (Model-Context-Protocol) client over streamable HTTP.
//!
//! The remote transport mode serializes tool arguments plus the session
//! snapshot and calls the mirrored registry on an MCP server. Each call
//! performs `initialize`, `tools/list`, and `tools/call` as JSON-RPC
//! requests with a per-operation deadline; responses may arrive as plain
//! JSON or as an SSE body (streamable HTTP), both of which are unwrapped to
//! the JSON-RPC result.

use serde_json::{json, Value};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::sketchflow::client_wrapper::BoxError;

/// Transport or protocol failure talking to the MCP server.
#[derive(Debug, Clone)]
pub struct McpError(pub String);

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MCP tool call failed: {}", self.0)
    }
}

impl Error for McpError {}

/// Flatten an error and its source chain into one diagnostic string.
pub fn flatten_error_chain(err: &(dyn Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join("; ")
}

/// Streamable-HTTP MCP client.
pub struct McpClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl McpClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Call a named tool: initialize, list tools, then invoke, unwrapping
    /// structured content (or text blocks parsed as JSON) from the result.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, BoxError> {
        log::info!("Calling MCP tool name={} url={}", name, self.url);
        self.request_with_deadline(
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "sketchflow", "version": env!("CARGO_PKG_VERSION")},
            }),
            "initialize",
        )
        .await?;
        self.request_with_deadline("tools/list", json!({}), "list_tools")
            .await?;
        let result = self
            .request_with_deadline(
                "tools/call",
                json!({"name": name, "arguments": args}),
                "tool call",
            )
            .await?;

        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            let error_text = joined_text_blocks(&result);
            return Err(Box::new(McpError(format!(
                "MCP tool error: {}",
                if error_text.is_empty() {
                    "unknown error".to_string()
                } else {
                    error_text
                }
            ))));
        }

        if let Some(structured) = result.get("structuredContent") {
            if !structured.is_null() {
                return Ok(structured.clone());
            }
        }
        // Fallback: attempt to parse text content as JSON.
        let joined = joined_text_blocks(&result);
        if !joined.is_empty() {
            return Ok(serde_json::from_str(&joined).unwrap_or_else(|_| json!({"text": joined})));
        }
        Ok(json!({}))
    }

    async fn request_with_deadline(
        &self,
        method: &str,
        params: Value,
        operation: &str,
    ) -> Result<Value, BoxError> {
        log::info!("MCP {} start", operation);
        let outcome = tokio::time::timeout(self.timeout, self.request(method, params)).await;
        match outcome {
            Ok(result) => {
                log::info!("MCP {} complete", operation);
                result
            }
            Err(_) => Err(Box::new(McpError(format!(
                "MCP {} timed out after {:.1}s",
                operation,
                self.timeout.as_secs_f64()
            )))),
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| McpError(flatten_error_chain(&e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Box::new(McpError(format!("HTTP {}: {}", status, body))));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let raw = response
            .text()
            .await
            .map_err(|e| McpError(flatten_error_chain(&e)))?;

        let message: Value = if content_type.starts_with("text/event-stream") {
            parse_sse_response(&raw, id)
                .ok_or_else(|| McpError("no JSON-RPC response in SSE body".to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|e| McpError(format!("invalid JSON: {}", e)))?
        };

        if let Some(error) = message.get("error") {
            return Err(Box::new(McpError(format!(
                "{} (code {})",
                error.get("message").and_then(Value::as_str).unwrap_or("unknown"),
                error.get("code").and_then(Value::as_i64).unwrap_or(0)
            ))));
        }
        Ok(message.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// Extract the JSON-RPC response with the given id from an SSE body.
fn parse_sse_response(raw: &str, id: u64) -> Option<Value> {
    for line in raw.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(data.trim()) else {
            continue;
        };
        if value.get("id").and_then(Value::as_u64) == Some(id) {
            return Some(value);
        }
    }
    None
}

fn joined_text_blocks(result: &Value) -> String {
    result
        .get("content")
        .and_then(Value::as_array)
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_body_yields_matching_response() {
        let raw = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"ok\":true}}\n\n";
        let message = parse_sse_response(raw, 7).unwrap();
        assert_eq!(message["result"]["ok"], true);
        assert!(parse_sse_response(raw, 8).is_none());
    }

    #[test]
    fn text_blocks_join_in_order() {
        let result = json!({
            "content": [
                {"type": "text", "text": "{\"a\":"},
                {"type": "image", "data": "zzz"},
                {"type": "text", "text": "1}"},
            ]
        });
        assert_eq!(joined_text_blocks(&result), "{\"a\":1}");
    }

    #[test]
    fn error_chains_flatten_to_one_line() {
        #[derive(Debug)]
        struct Outer(std::io::Error);
        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "outer failure")
            }
        }
        impl Error for Outer {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(&self.0)
            }
        }
        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "inner"));
        let flattened = flatten_error_chain(&err);
        assert!(flattened.contains("outer failure"));
        assert!(flattened.contains("inner"));
    }
}
