//! The tool-invocation protocol endpoint.
//!
//! `POST /mcp` accepts JSON-RPC 2.0 messages: `initialize`, `tools/list`
//! over the composed surface, and `tools/call` routed to the owning
//! mount's interceptor. Notifications are acknowledged with `202` and no
//! body. The response `id` echoes the request's, whatever its JSON type.

use axum::extract::{Json, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};

use mg_upstream::protocol::PROTOCOL_VERSION;

use crate::server::{ServerContext, ServerState};

fn rpc_result(id: Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": id, "result": result })).into_response()
}

fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Response {
    Json(json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message.into() }
    }))
    .into_response()
}

pub async fn rpc(State(ctx): State<ServerContext>, Json(message): Json<Value>) -> Response {
    let method = message
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    // No id means notification: acknowledge, nothing to answer.
    let Some(id) = message.get("id").cloned() else {
        tracing::debug!(method = %method, "notification received");
        return StatusCode::ACCEPTED.into_response();
    };

    if ctx.front_end.state() == ServerState::Draining {
        return rpc_error(id, -32000, "server is draining, not accepting new calls");
    }

    match method.as_str() {
        "initialize" => rpc_result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "mcpguard",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => rpc_result(id, json!({})),
        "tools/list" => rpc_result(id, json!({ "tools": ctx.front_end.tools() })),
        "tools/call" => {
            let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return rpc_error(id, -32602, "missing tool name");
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match ctx.front_end.resolve(name) {
                Some(entry) => {
                    let result = entry.mount.handle_call(&entry.tool.name, arguments).await;
                    match serde_json::to_value(&result) {
                        Ok(value) => rpc_result(id, value),
                        Err(e) => rpc_error(id, -32603, format!("result serialization: {e}")),
                    }
                }
                None => rpc_error(id, -32602, format!("Unknown tool: {name}")),
            }
        }
        other => rpc_error(id, -32601, format!("Method not found: {other}")),
    }
}
