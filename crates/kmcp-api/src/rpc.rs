//! JSON-RPC 2.0 envelope for `POST /mcp`
//!
//! Supports `initialize`, `ping`, `tools/list` and `tools/call`. Requests
//! without an id are notifications and get an empty 202.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::context::CallContext;
use crate::reload::SnapshotCell;
use crate::server::AppState;
use crate::tools::call_tool;

/// Invalid JSON
pub const PARSE_ERROR: i64 = -32700;
/// Not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// Unknown method
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Bad parameters, including unknown tools
pub const INVALID_PARAMS: i64 = -32602;

const PROTOCOL_VERSION: &str = "2025-03-26";

/// Inbound request or notification
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, must be `2.0`
    pub jsonrpc: String,
    /// Request id; absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

/// Error member of a response
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
}

/// Outbound response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// Always `2.0`
    pub jsonrpc: &'static str,
    /// Id of the request answered
    pub id: Value,
    /// Success payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Answer one request
///
/// `tools/call` reads the snapshot once and uses it for the whole call, so
/// a reload during the call does not change the tool or the clients it runs
/// against.
pub async fn dispatch(snapshots: &SnapshotCell, ctx: &CallContext, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.unwrap_or(Value::Null);
    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::failure(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
    }

    match request.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": { "listChanged": true } },
                "serverInfo": { "name": "kmcp", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, snapshots.load().await.surface.to_json()),
        "tools/call" => {
            let params: CallParams = match serde_json::from_value(request.params) {
                Ok(p) => p,
                Err(e) => return JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
            };
            let snapshot = snapshots.load().await;
            let Some(tool) = snapshot.surface.get(&params.name) else {
                return JsonRpcResponse::failure(id, INVALID_PARAMS, format!("unknown tool {:?}", params.name));
            };
            let client = snapshot.resources(ctx);
            let result = call_tool(tool, params.arguments, &client).await;
            JsonRpcResponse::success(id, result.to_json())
        }
        other => JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("method not found: {}", other)),
    }
}

/// Handle POST /mcp
pub async fn mcp_handler(State(state): State<AppState>, ctx: CallContext, body: Bytes) -> Response {
    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return Json(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, e.to_string())).into_response()
        }
    };

    if request.id.is_none() {
        debug!(method = %request.method, "Notification received");
        return StatusCode::ACCEPTED.into_response();
    }

    Json(dispatch(&state.snapshots, &ctx, request).await).into_response()
}
