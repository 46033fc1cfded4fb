//! Agent: one conversation, one skill set, one turn at a time.
//!
//! The agent owns a [`Session`] and a [`SkillRegistry`] snapshot, publishes
//! its lifecycle to the shared [`EventHub`], and honors a per-turn
//! cancellation token. Exactly one turn may be in progress per agent; a
//! second `send` while a turn runs is refused.
//!
//! # Turn lifecycle
//!
//! ```text
//! turn_started { request_id }
//!   tool_called { name, ... }      (zero or more, via the dispatcher)
//!   tool_result { name, ok }
//! turn_completed { request_id }    (or error { message })
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use log::{info, warn};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::nexus3::client_wrapper::{Message, Role, TokenUsage};
use crate::nexus3::event_hub::EventHub;
use crate::nexus3::permissions::PermissionLevel;
use crate::nexus3::session::Session;
use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::SkillRegistry;

/// Cap on model/tool iterations within one turn.
const MAX_TOOL_ITERATIONS: usize = 25;

/// Errors surfaced by agent operations.
#[derive(Debug)]
pub enum AgentError {
    /// A turn is already in progress for this agent.
    Busy,
    /// The turn was cancelled via its token.
    Cancelled,
    /// The provider failed.
    Llm(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Busy => write!(f, "a turn is already in progress"),
            AgentError::Cancelled => write!(f, "turn cancelled"),
            AgentError::Llm(msg) => write!(f, "LLM error: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

struct TurnHandle {
    request_id: String,
    token: CancellationToken,
}

/// Clears the turn slot on every exit path, including the caller dropping
/// the `send` future (request timeout). An abandoned turn cancels its
/// token so in-flight skill work stops, and reports through the event
/// stream.
struct TurnGuard<'a> {
    agent: &'a Agent,
    request_id: String,
    token: CancellationToken,
    finished: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        *self.agent.current_turn.lock().unwrap() = None;
        if !self.finished {
            self.token.cancel();
            self.agent.publish(json!({
                "type": "error",
                "request_id": self.request_id,
                "message": "turn abandoned",
            }));
        }
    }
}

#[derive(Clone, Copy, Default)]
struct StatusSnapshot {
    usage: TokenUsage,
    context_usage: f64,
    history_len: usize,
}

pub struct Agent {
    agent_id: String,
    services: Arc<ServiceContainer>,
    session: tokio::sync::Mutex<Session>,
    skills: SkillRegistry,
    hub: Arc<EventHub>,
    current_turn: Mutex<Option<TurnHandle>>,
    status_cache: Mutex<StatusSnapshot>,
}

impl Agent {
    pub fn new(
        agent_id: impl Into<String>,
        services: Arc<ServiceContainer>,
        session: Session,
        skills: SkillRegistry,
        hub: Arc<EventHub>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            services,
            session: tokio::sync::Mutex::new(session),
            skills,
            hub,
            current_turn: Mutex::new(None),
            status_cache: Mutex::new(StatusSnapshot::default()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn permission_level(&self) -> PermissionLevel {
        self.services.permission_level()
    }

    pub fn skill_names(&self) -> Vec<String> {
        self.skills.names()
    }

    fn publish(&self, mut event: Value) {
        if let Some(obj) = event.as_object_mut() {
            obj.insert("ts".to_string(), Value::from(Utc::now().to_rfc3339()));
        }
        self.hub.publish(&self.agent_id, &event);
    }

    /// Run one turn: feed `content` to the model, dispatch tool calls until
    /// the model produces a final message, and return that message.
    pub async fn send(&self, content: &str) -> Result<String, AgentError> {
        let (request_id, token) = {
            let mut turn = self.current_turn.lock().unwrap();
            if turn.is_some() {
                return Err(AgentError::Busy);
            }
            let request_id = Uuid::new_v4().to_string();
            let token = CancellationToken::new();
            *turn = Some(TurnHandle {
                request_id: request_id.clone(),
                token: token.clone(),
            });
            (request_id, token)
        };
        self.services.set_turn_token(token.clone());
        let mut guard = TurnGuard {
            agent: self,
            request_id: request_id.clone(),
            token: token.clone(),
            finished: false,
        };

        self.publish(json!({"type": "turn_started", "request_id": request_id}));
        info!("[{}] turn {} started", self.agent_id, request_id);

        let result = self.run_turn(content, &request_id, &token).await;

        // The token slot is cleared on every path: completion, error,
        // cancel, and abandonment (guard drop).
        guard.finished = true;
        drop(guard);

        match &result {
            Ok(_) => {
                self.publish(json!({"type": "turn_completed", "request_id": request_id}));
                info!("[{}] turn {} completed", self.agent_id, request_id);
            }
            Err(e) => {
                self.publish(json!({
                    "type": "error",
                    "request_id": request_id,
                    "message": e.to_string(),
                }));
                warn!("[{}] turn {} failed: {}", self.agent_id, request_id, e);
            }
        }
        result
    }

    async fn run_turn(
        &self,
        content: &str,
        request_id: &str,
        token: &CancellationToken,
    ) -> Result<String, AgentError> {
        let mut session = self.session.lock().await;
        session.push(Message::text(Role::User, content));
        let tools = self.skills.tool_definitions();

        for _ in 0..MAX_TOOL_ITERATIONS {
            if token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let response = tokio::select! {
                result = session.step(&tools) => {
                    result.map_err(|e| AgentError::Llm(e.to_string()))?
                }
                _ = token.cancelled() => return Err(AgentError::Cancelled),
            };
            self.refresh_status(&session);

            if response.tool_calls.is_empty() {
                return Ok(response.content);
            }

            for call in response.tool_calls {
                // Checked between tool steps; skills also watch the token
                // at their own suspension points.
                if token.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }
                self.publish(json!({
                    "type": "tool_called",
                    "request_id": request_id,
                    "name": call.name,
                    "arguments": call.arguments,
                }));
                let result = self.skills.dispatch(&call.name, call.arguments).await;
                self.publish(json!({
                    "type": "tool_result",
                    "request_id": request_id,
                    "name": call.name,
                    "ok": !result.is_error(),
                }));
                session.push(Message::tool_result(call.id, result.text()));
            }
        }

        warn!(
            "[{}] turn {} hit the tool iteration cap",
            self.agent_id, request_id
        );
        Err(AgentError::Llm(format!(
            "tool iteration limit ({}) reached",
            MAX_TOOL_ITERATIONS
        )))
    }

    fn refresh_status(&self, session: &Session) {
        *self.status_cache.lock().unwrap() = StatusSnapshot {
            usage: session.usage(),
            context_usage: session.context_usage(),
            history_len: session.history_len(),
        };
    }

    /// Cancel the in-flight turn, but only when `request_id` matches.
    ///
    /// A mismatched id or an idle agent is a silent no-op; the return value
    /// reports whether a cancellation was actually triggered.
    pub fn cancel(&self, request_id: &str) -> bool {
        let turn = self.current_turn.lock().unwrap();
        match turn.as_ref() {
            Some(handle) if handle.request_id == request_id => {
                handle.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever turn is running. Used by destroy, which must not
    /// wait for the provider.
    pub fn cancel_current(&self) {
        if let Some(handle) = self.current_turn.lock().unwrap().as_ref() {
            handle.token.cancel();
        }
    }

    /// Whether a turn is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.current_turn.lock().unwrap().is_some()
    }

    /// Token counts and context occupancy.
    ///
    /// Reads live numbers when the session is idle and the latest snapshot
    /// while a turn holds the session.
    pub fn status(&self) -> Value {
        let snapshot = match self.session.try_lock() {
            Ok(session) => StatusSnapshot {
                usage: session.usage(),
                context_usage: session.context_usage(),
                history_len: session.history_len(),
            },
            Err(_) => *self.status_cache.lock().unwrap(),
        };
        json!({
            "agent_id": self.agent_id,
            "permission": self.permission_level().to_string(),
            "busy": self.is_busy(),
            "input_tokens": snapshot.usage.input_tokens,
            "output_tokens": snapshot.usage.output_tokens,
            "total_tokens": snapshot.usage.total_tokens,
            "context_usage": snapshot.context_usage,
            "history_len": snapshot.history_len,
        })
    }

    /// Compact the conversation history and report the new counts.
    pub async fn compact(&self) -> Value {
        let mut session = self.session.lock().await;
        let removed = session.compact();
        self.refresh_status(&session);
        json!({
            "agent_id": self.agent_id,
            "removed_messages": removed,
            "history_len": session.history_len(),
            "total_tokens": session.usage().total_tokens,
        })
    }
}
