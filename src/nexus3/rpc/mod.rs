//! HTTP control and event planes.
//!
//! One axum router serves both surfaces:
//!
//! - `POST /rpc`: JSON-RPC 2.0 control plane (create/destroy/send/...)
//! - `GET /events/{agent_id}?since=N`: Server-Sent Events with replay
//!
//! A bearer credential is required everywhere except the `detect` probe.

pub mod jsonrpc;
pub mod sse;

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use log::info;
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::nexus3::registry::AgentRegistry;

pub const DEFAULT_PORT: u16 = 8765;

/// Bearer-token authentication for both planes.
///
/// Comparison happens on SHA-256 digests through `subtle::ConstantTimeEq`
/// so the check cannot become a timing oracle.
#[derive(Clone)]
pub enum AuthConfig {
    /// No credential required (loopback development).
    None,
    Bearer(String),
}

impl AuthConfig {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }

    /// Validate an `Authorization` header value.
    pub fn validate(&self, header: Option<&str>) -> bool {
        match self {
            AuthConfig::None => true,
            AuthConfig::Bearer(token) => match header.and_then(|h| h.strip_prefix("Bearer ")) {
                Some(provided) => {
                    let expected = Sha256::digest(token.as_bytes());
                    let provided = Sha256::digest(provided.as_bytes());
                    expected.ct_eq(&provided).into()
                }
                None => false,
            },
        }
    }
}

/// Shared state behind every handler.
pub struct ServerState {
    pub registry: Arc<AgentRegistry>,
    pub auth: AuthConfig,
    pub port: u16,
    shutdown: Notify,
}

impl ServerState {
    pub fn new(registry: Arc<AgentRegistry>, auth: AuthConfig, port: u16) -> Self {
        Self {
            registry,
            auth,
            port,
            shutdown: Notify::new(),
        }
    }

    /// Trigger graceful shutdown (the `shutdown` method calls this after
    /// replying). A stored permit covers the case where the listener has
    /// not reached its wait yet.
    pub fn request_shutdown(&self) {
        self.shutdown.notify_one();
    }
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

async fn rpc_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> Json<Value> {
    let authorized = state.auth.validate(auth_header(&headers));
    Json(jsonrpc::handle(&state, request, authorized).await)
}

/// Build the router with both planes.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/events/{agent_id}", get(sse::events_handler))
        .with_state(state)
}

/// Serve until the `shutdown` method fires, then cancel live turns.
pub async fn serve(state: Arc<ServerState>, listener: TcpListener) -> std::io::Result<()> {
    let app = router(Arc::clone(&state));
    info!("listening on {}", listener.local_addr()?);
    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_state.shutdown.notified().await;
        })
        .await?;
    state.registry.cancel_all().await;
    info!("server stopped");
    Ok(())
}
