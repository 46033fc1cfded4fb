//! Agent turn lifecycle tests with a scripted provider client.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nexus3::nexus3::agent::{Agent, AgentError};
use nexus3::nexus3::client_wrapper::{
    ClientWrapper, LlmError, LlmResponse, Message, NativeToolCall, TokenUsage,
};
use nexus3::nexus3::permissions::PermissionLevel;
use nexus3::nexus3::registry::{AgentRegistry, ClientFactory, CreateParams};
use nexus3::nexus3::session::Session;
use nexus3::nexus3::skill::services::ServiceContainer;
use nexus3::nexus3::skill::{Skill, SkillRegistry};
use nexus3::nexus3::types::ToolResult;
use nexus3::EventHub;
use serde_json::{json, Value};

/// Replays a fixed sequence of responses, then keeps answering "done".
struct ScriptedClient {
    steps: Mutex<VecDeque<LlmResponse>>,
}

impl ScriptedClient {
    fn new(steps: Vec<LlmResponse>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
        }
    }
}

#[async_trait]
impl ClientWrapper for ScriptedClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: &[Value],
    ) -> Result<LlmResponse, LlmError> {
        Ok(self.steps.lock().unwrap().pop_front().unwrap_or(LlmResponse {
            content: "done".to_string(),
            tool_calls: Vec::new(),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 2,
                total_tokens: 12,
            }),
        }))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Never answers; used to hold a turn open for cancellation tests.
struct HangingClient;

#[async_trait]
impl ClientWrapper for HangingClient {
    async fn send_message(
        &self,
        _messages: &[Message],
        _tools: &[Value],
    ) -> Result<LlmResponse, LlmError> {
        std::future::pending().await
    }

    fn model(&self) -> &str {
        "hanging"
    }
}

struct EchoSkill;

#[async_trait]
impl Skill for EchoSkill {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the message back"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"message": {"type": "string"}},
            "required": ["message"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        ToolResult::success(format!("echo: {}", args["message"].as_str().unwrap_or("")))
    }
}

fn build_agent(client: Arc<dyn ClientWrapper>, hub: Arc<EventHub>) -> Agent {
    let services = Arc::new(ServiceContainer::for_level(
        PathBuf::from("/tmp"),
        PermissionLevel::Yolo,
    ));
    let mut skills = SkillRegistry::new();
    skills.register(Arc::new(EchoSkill));
    let session = Session::new(client, "test agent".to_string(), 1000);
    Agent::new("worker-1", services, session, skills, hub)
}

fn tool_call_response() -> LlmResponse {
    LlmResponse {
        content: String::new(),
        tool_calls: vec![NativeToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: json!({"message": "hi"}),
        }],
        usage: Some(TokenUsage {
            input_tokens: 20,
            output_tokens: 4,
            total_tokens: 24,
        }),
    }
}

#[tokio::test]
async fn test_turn_events_bracket_tool_events() {
    let hub = Arc::new(EventHub::default());
    let agent = build_agent(
        Arc::new(ScriptedClient::new(vec![tool_call_response()])),
        Arc::clone(&hub),
    );
    let mut sub = hub.subscribe("worker-1");

    let message = agent.send("please echo").await.unwrap();
    assert_eq!(message, "done");

    let mut types = Vec::new();
    while let Some(event) = sub.try_recv() {
        types.push(event["type"].as_str().unwrap().to_string());
    }
    assert_eq!(
        types,
        vec!["turn_started", "tool_called", "tool_result", "turn_completed"]
    );

    // Every event carries the same request id and a dense seq.
    let events = hub.get_events_since("worker-1", 0);
    let request_id = events[0]["request_id"].as_str().unwrap();
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event["request_id"].as_str().unwrap(), request_id);
        assert_eq!(event["seq"].as_u64().unwrap(), (i + 1) as u64);
    }
}

#[tokio::test]
async fn test_tool_result_feeds_back_into_conversation() {
    let hub = Arc::new(EventHub::default());
    let agent = build_agent(
        Arc::new(ScriptedClient::new(vec![tool_call_response()])),
        Arc::clone(&hub),
    );
    agent.send("run the tool").await.unwrap();

    let events = hub.get_events_since("worker-1", 0);
    let tool_result = events
        .iter()
        .find(|e| e["type"] == "tool_result")
        .expect("tool_result event");
    assert_eq!(tool_result["name"], "echo");
    assert_eq!(tool_result["ok"], true);
}

#[tokio::test]
async fn test_cancel_mid_turn_publishes_error_and_clears_token() {
    let hub = Arc::new(EventHub::default());
    let agent = Arc::new(build_agent(Arc::new(HangingClient), Arc::clone(&hub)));
    let mut sub = hub.subscribe("worker-1");

    let runner = Arc::clone(&agent);
    let handle = tokio::spawn(async move { runner.send("hang forever").await });

    // The turn_started event carries the request id to cancel.
    let started = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(started["type"], "turn_started");
    let request_id = started["request_id"].as_str().unwrap().to_string();

    // A mismatched id is a silent no-op.
    assert!(!agent.cancel("not-this-turn"));
    assert!(agent.is_busy());

    assert!(agent.cancel(&request_id));
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(AgentError::Cancelled)));
    assert!(!agent.is_busy());

    let error = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(error["type"], "error");
    assert!(error["message"].as_str().unwrap().contains("cancelled"));
}

#[tokio::test]
async fn test_second_send_while_busy_is_refused() {
    let hub = Arc::new(EventHub::default());
    let agent = Arc::new(build_agent(Arc::new(HangingClient), hub.clone()));

    let runner = Arc::clone(&agent);
    let handle = tokio::spawn(async move { runner.send("first").await });

    // Wait for the first turn to install itself.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !agent.is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let second = agent.send("second").await;
    assert!(matches!(second, Err(AgentError::Busy)));

    agent.cancel_current();
    let _ = handle.await.unwrap();
}

fn scripted_factory() -> ClientFactory {
    Arc::new(|_model| Arc::new(ScriptedClient::new(Vec::new())) as Arc<dyn ClientWrapper>)
}

#[tokio::test]
async fn test_registry_rejects_duplicate_ids() {
    let hub = Arc::new(EventHub::default());
    let registry = AgentRegistry::new(hub, scripted_factory());

    let params = CreateParams {
        agent_id: "a".to_string(),
        preset: PermissionLevel::Sandboxed,
        cwd: Some(PathBuf::from("/tmp")),
        allowed_write_paths: Vec::new(),
        model: None,
        initial_message: None,
        timeout: None,
    };
    registry.create(params.clone()).await.unwrap();
    let err = registry.create(params).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));

    assert_eq!(registry.list().await, vec!["a".to_string()]);
    registry.destroy("a").await.unwrap();
    assert!(registry.list().await.is_empty());
    assert!(registry.destroy("a").await.is_err());
}

#[tokio::test]
async fn test_sandboxed_agents_get_no_exec_skills() {
    let hub = Arc::new(EventHub::default());
    let registry = AgentRegistry::new(hub, scripted_factory());
    registry
        .create(CreateParams {
            agent_id: "boxed".to_string(),
            preset: PermissionLevel::Sandboxed,
            cwd: Some(PathBuf::from("/tmp")),
            allowed_write_paths: Vec::new(),
            model: None,
            initial_message: None,
            timeout: None,
        })
        .await
        .unwrap();

    // The exec skills are absent from the sandboxed snapshot; file access
    // remains (writes are still gated inside the skill).
    let status = registry.status("boxed").await.unwrap();
    assert_eq!(status["permission"], "SANDBOXED");
}

#[tokio::test]
async fn test_send_timeout_cancels_turn() {
    let hub = Arc::new(EventHub::default());
    let factory: ClientFactory =
        Arc::new(|_model| Arc::new(HangingClient) as Arc<dyn ClientWrapper>);
    let registry = AgentRegistry::new(hub, factory);
    registry
        .create(CreateParams {
            agent_id: "slow".to_string(),
            preset: PermissionLevel::Sandboxed,
            cwd: Some(PathBuf::from("/tmp")),
            allowed_write_paths: Vec::new(),
            model: None,
            initial_message: None,
            timeout: None,
        })
        .await
        .unwrap();

    let err = registry.send("slow", "hello", Some(1)).await.unwrap_err();
    assert!(err.to_string().contains("timed out after 1s"));

    // The timed-out turn was cancelled; the agent accepts new work.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = registry.status("slow").await.unwrap();
    assert_eq!(status["busy"], false);
}
