//! MCP server: remote tool dispatch over streamable HTTP.
//!
//! Hosts a mirrored [`ToolRegistry`] behind a single `/mcp` endpoint
//! speaking the JSON-RPC subset the client uses (`initialize`,
//! `tools/list`, `tools/call`). Session state arrives inside the tool
//! arguments as a `session_state` snapshot and is rehydrated per call; the
//! tool's returned slices carry the mutation back.
//!
//! Optional bearer-token auth compares SHA-256 digests through
//! `subtle::ConstantTimeEq` so the comparison does not leak timing.
//!
//! Only compiled with the `mcp-server` feature.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::sketchflow::cancellation::CancelToken;
use crate::sketchflow::session::SessionSnapshot;
use crate::sketchflow::tool_protocol::{ToolContext, ToolRegistry};
use crate::sketchflow::workflow::store::WorkflowStore;

/// Server configuration.
pub struct McpServerConfig {
    pub addr: SocketAddr,
    /// Optional bearer token required on every request.
    pub bearer_token: Option<String>,
}

struct ServerState {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn WorkflowStore>,
    bearer_token: Option<String>,
}

/// A running MCP server.
pub struct McpServer {
    pub addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl McpServer {
    /// Bind and serve the mirrored registry.
    pub async fn start(
        config: McpServerConfig,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn WorkflowStore>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let state = Arc::new(ServerState {
            registry,
            store,
            bearer_token: config.bearer_token,
        });
        let app = Router::new()
            .route("/mcp", post(handle_rpc))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind(config.addr).await?;
        let addr = listener.local_addr()?;
        log::info!("MCP server listening on {}", addr);
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                log::error!("MCP server stopped: {}", err);
            }
        });
        Ok(Self { addr, handle })
    }

    /// Stop serving.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Constant-time bearer check over SHA-256 digests.
fn token_matches(expected: &str, provided: &str) -> bool {
    let expected_hash = Sha256::digest(expected.as_bytes());
    let provided_hash = Sha256::digest(provided.as_bytes());
    expected_hash.ct_eq(&provided_hash).into()
}

fn authorized(state: &ServerState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.bearer_token else {
        return true;
    };
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|provided| token_matches(expected, provided))
        .unwrap_or(false)
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message.into()},
    })
}

fn rpc_result(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

async fn handle_rpc(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(rpc_error(id, -32000, "Unauthorized")),
        );
    }

    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let response = match method {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "sketchflow-mcp", "version": env!("CARGO_PKG_VERSION")},
            }),
        ),
        "tools/list" => {
            let tools: Vec<Value> = state
                .registry
                .tool_definitions()
                .into_iter()
                .map(|def| {
                    json!({
                        "name": def.name,
                        "description": def.description,
                        "inputSchema": def.parameters_schema,
                    })
                })
                .collect();
            rpc_result(id, json!({"tools": tools}))
        }
        "tools/call" => {
            let name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let mut args = params.get("arguments").cloned().unwrap_or(json!({}));

            // Rehydrate the caller's session from the snapshot argument.
            let snapshot = args
                .as_object_mut()
                .and_then(|o| o.remove("session_state"))
                .and_then(|raw| serde_json::from_value::<SessionSnapshot>(raw).ok());
            let session = snapshot
                .map(SessionSnapshot::into_session)
                .unwrap_or_default();
            let user_id = session.lock().await.user_id.clone();

            let ctx = ToolContext {
                session,
                store: Some(state.store.clone()),
                user_id,
                stream: None,
                cancel: CancelToken::new(),
            };
            match state.registry.execute(name, args, &ctx).await {
                Ok(data) => rpc_result(
                    id,
                    json!({
                        "content": [{"type": "text", "text": data.to_string()}],
                        "structuredContent": data,
                        "isError": false,
                    }),
                ),
                Err(err) => rpc_result(
                    id,
                    json!({
                        "content": [{"type": "text", "text": err.to_string()}],
                        "isError": true,
                    }),
                ),
            }
        }
        other => rpc_error(id, -32601, format!("Method not found: {}", other)),
    };
    (StatusCode::OK, Json(response))
}
