//! JSON-RPC 2.0 dispatch for the control plane.

use std::sync::Arc;

use log::warn;
use serde_json::{json, Value};

use crate::nexus3::registry::{CreateParams, RegistryError};
use crate::nexus3::rpc::ServerState;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const SERVER_ERROR: i64 = -32000;
pub const UNAUTHORIZED: i64 = -32001;

fn success(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn failure(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message.into()},
    })
}

fn registry_error(id: Value, error: RegistryError) -> Value {
    failure(id, SERVER_ERROR, error.to_string())
}

/// Dispatch one JSON-RPC request.
///
/// `authorized` reflects the bearer check done by the HTTP layer; only the
/// `detect` probe is exempt from it.
pub async fn handle(state: &Arc<ServerState>, request: Value, authorized: bool) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    if request.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return failure(id, INVALID_REQUEST, "expected jsonrpc 2.0");
    }
    let method = match request.get("method").and_then(Value::as_str) {
        Some(method) => method,
        None => return failure(id, INVALID_REQUEST, "missing method"),
    };
    let params = request.get("params").cloned().unwrap_or(json!({}));

    if method != "detect" && !authorized {
        warn!("rejected unauthorized '{}' call", method);
        return failure(id, UNAUTHORIZED, "unauthorized");
    }

    let registry = &state.registry;
    match method {
        "detect" => success(id, json!({"ok": true, "port": state.port})),

        "create" => {
            let params: CreateParams = match serde_json::from_value(params) {
                Ok(params) => params,
                Err(e) => return failure(id, INVALID_PARAMS, e.to_string()),
            };
            match registry.create(params).await {
                Ok(summary) => success(id, summary),
                Err(e) => registry_error(id, e),
            }
        }

        "destroy" => {
            let agent_id = match params.get("agent_id").and_then(Value::as_str) {
                Some(agent_id) => agent_id,
                None => return failure(id, INVALID_PARAMS, "agent_id required"),
            };
            match registry.destroy(agent_id).await {
                Ok(()) => success(id, json!({"ok": true})),
                Err(e) => registry_error(id, e),
            }
        }

        "list" => success(id, json!(registry.list().await)),

        "send" => {
            let agent_id = match params.get("agent_id").and_then(Value::as_str) {
                Some(agent_id) => agent_id,
                None => return failure(id, INVALID_PARAMS, "agent_id required"),
            };
            let content = match params.get("content").and_then(Value::as_str) {
                Some(content) => content,
                None => return failure(id, INVALID_PARAMS, "content required"),
            };
            let timeout = params.get("timeout").and_then(Value::as_u64);
            match registry.send(agent_id, content, timeout).await {
                Ok(message) => success(id, json!({"message": message})),
                Err(e) => registry_error(id, e),
            }
        }

        "cancel" => {
            let agent_id = match params.get("agent_id").and_then(Value::as_str) {
                Some(agent_id) => agent_id,
                None => return failure(id, INVALID_PARAMS, "agent_id required"),
            };
            let request_id = match params.get("request_id").and_then(Value::as_str) {
                Some(request_id) => request_id,
                None => return failure(id, INVALID_PARAMS, "request_id required"),
            };
            match registry.cancel(agent_id, request_id).await {
                // A mismatched request id is a silent no-op by design.
                Ok(_) => success(id, json!({"ok": true})),
                Err(e) => registry_error(id, e),
            }
        }

        "status" => {
            let agent_id = match params.get("agent_id").and_then(Value::as_str) {
                Some(agent_id) => agent_id,
                None => return failure(id, INVALID_PARAMS, "agent_id required"),
            };
            match registry.status(agent_id).await {
                Ok(status) => success(id, status),
                Err(e) => registry_error(id, e),
            }
        }

        "compact" => {
            let agent_id = match params.get("agent_id").and_then(Value::as_str) {
                Some(agent_id) => agent_id,
                None => return failure(id, INVALID_PARAMS, "agent_id required"),
            };
            match registry.compact(agent_id).await {
                Ok(counts) => success(id, counts),
                Err(e) => registry_error(id, e),
            }
        }

        "shutdown" => {
            // Reply first; the listener winds down right after.
            state.request_shutdown();
            success(id, json!({"ok": true}))
        }

        other => failure(id, METHOD_NOT_FOUND, format!("unknown method: {}", other)),
    }
}
