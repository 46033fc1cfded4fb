//! End-to-end tests for the JSON-RPC control plane and the SSE event plane.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus3::nexus3::client_wrapper::{
    ClientWrapper, LlmError, LlmResponse, Message, TokenUsage,
};
use nexus3::nexus3::registry::{AgentRegistry, ClientFactory};
use nexus3::nexus3::rpc::{router, AuthConfig, ServerState};
use nexus3::EventHub;
use serde_json::{json, Value};

struct FinalClient;

#[async_trait]
impl ClientWrapper for FinalClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: &[Value],
    ) -> Result<LlmResponse, LlmError> {
        Ok(LlmResponse {
            content: "final answer".to_string(),
            tool_calls: Vec::new(),
            usage: Some(TokenUsage {
                input_tokens: 8,
                output_tokens: 3,
                total_tokens: 11,
            }),
        })
    }

    fn model(&self) -> &str {
        "final"
    }
}

async fn spawn_server(api_key: Option<&str>) -> (String, Arc<ServerState>) {
    let factory: ClientFactory = Arc::new(|_| Arc::new(FinalClient) as Arc<dyn ClientWrapper>);
    let hub = Arc::new(EventHub::default());
    let registry = Arc::new(AgentRegistry::new(hub, factory));
    let auth = match api_key {
        Some(key) => AuthConfig::bearer(key),
        None => AuthConfig::None,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(ServerState::new(registry, auth, port));
    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{}", port), state)
}

async fn rpc(url: &str, key: Option<&str>, method: &str, params: Value) -> Value {
    let client = reqwest::Client::new();
    let mut request = client.post(format!("{}/rpc", url)).json(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }));
    if let Some(key) = key {
        request = request.bearer_auth(key);
    }
    request.send().await.unwrap().json().await.unwrap()
}

fn create_params(agent_id: &str) -> Value {
    json!({"agent_id": agent_id, "preset": "SANDBOXED", "cwd": "/tmp"})
}

#[tokio::test]
async fn test_detect_needs_no_auth() {
    let (url, _state) = spawn_server(Some("k3y")).await;
    let response = rpc(&url, None, "detect", json!({})).await;
    assert_eq!(response["result"]["ok"], true);
    assert!(response["result"]["port"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_other_methods_require_bearer() {
    let (url, _state) = spawn_server(Some("k3y")).await;

    let denied = rpc(&url, None, "list", json!({})).await;
    assert_eq!(denied["error"]["code"], -32001);

    let wrong = rpc(&url, Some("wrong"), "list", json!({})).await;
    assert_eq!(wrong["error"]["code"], -32001);

    let allowed = rpc(&url, Some("k3y"), "list", json!({})).await;
    assert_eq!(allowed["result"], json!([]));
}

#[tokio::test]
async fn test_create_send_status_destroy_cycle() {
    let (url, _state) = spawn_server(None).await;

    let created = rpc(&url, None, "create", create_params("w1")).await;
    assert_eq!(created["result"]["agent_id"], "w1");

    let duplicate = rpc(&url, None, "create", create_params("w1")).await;
    assert_eq!(duplicate["error"]["code"], -32000);
    assert!(duplicate["error"]["message"]
        .as_str()
        .unwrap()
        .contains("already exists"));

    let sent = rpc(&url, None, "send", json!({"agent_id": "w1", "content": "hi"})).await;
    assert_eq!(sent["result"]["message"], "final answer");

    let status = rpc(&url, None, "status", json!({"agent_id": "w1"})).await;
    assert_eq!(status["result"]["total_tokens"], 11);
    assert_eq!(status["result"]["busy"], false);

    let compacted = rpc(&url, None, "compact", json!({"agent_id": "w1"})).await;
    assert_eq!(compacted["result"]["agent_id"], "w1");

    let destroyed = rpc(&url, None, "destroy", json!({"agent_id": "w1"})).await;
    assert_eq!(destroyed["result"]["ok"], true);

    let missing = rpc(&url, None, "status", json!({"agent_id": "w1"})).await;
    assert!(missing["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not found"));
}

#[tokio::test]
async fn test_unknown_method_and_bad_params() {
    let (url, _state) = spawn_server(None).await;

    let unknown = rpc(&url, None, "frobnicate", json!({})).await;
    assert_eq!(unknown["error"]["code"], -32601);

    let bad = rpc(&url, None, "send", json!({"agent_id": "x"})).await;
    assert_eq!(bad["error"]["code"], -32602);
}

#[tokio::test]
async fn test_sse_replays_buffered_events_then_streams() {
    let (url, _state) = spawn_server(None).await;
    rpc(&url, None, "create", create_params("w2")).await;
    rpc(&url, None, "send", json!({"agent_id": "w2", "content": "hi"})).await;

    // Replay from seq 0: the finished turn is in the ring buffer.
    let client = reqwest::Client::new();
    let mut response = client
        .get(format!("{}/events/w2?since=0", url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap(),
        "text/event-stream"
    );

    let mut body = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(300), response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                body.push_str(&String::from_utf8_lossy(&chunk));
                if body.contains("turn_completed") {
                    break;
                }
            }
            _ => break,
        }
    }

    assert!(body.contains("turn_started"), "body: {}", body);
    assert!(body.contains("turn_completed"), "body: {}", body);
    // Replay preserves seq order.
    let first = body.find("\"seq\":1").unwrap();
    let second = body.find("\"seq\":2").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn test_sse_requires_auth_when_configured() {
    let (url, _state) = spawn_server(Some("k3y")).await;
    let client = reqwest::Client::new();
    let denied = client
        .get(format!("{}/events/w", url))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let allowed = client
        .get(format!("{}/events/w", url))
        .bearer_auth("k3y")
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), 200);
}

#[tokio::test]
async fn test_shutdown_replies_then_stops() {
    let factory: ClientFactory = Arc::new(|_| Arc::new(FinalClient) as Arc<dyn ClientWrapper>);
    let hub = Arc::new(EventHub::default());
    let registry = Arc::new(AgentRegistry::new(hub, factory));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let url = format!("http://127.0.0.1:{}", port);
    let state = Arc::new(ServerState::new(registry, AuthConfig::None, port));
    let server = tokio::spawn(nexus3::nexus3::rpc::serve(Arc::clone(&state), listener));

    let response = rpc(&url, None, "shutdown", json!({})).await;
    assert_eq!(response["result"]["ok"], true);

    tokio::time::timeout(Duration::from_secs(3), server)
        .await
        .expect("server should stop after shutdown")
        .unwrap()
        .unwrap();
}
