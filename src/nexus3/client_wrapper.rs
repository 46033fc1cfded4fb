//! Shared primitives for provider-agnostic LLM clients.
//!
//! The runtime core deliberately depends on the thinnest possible provider
//! contract: a [`ClientWrapper`] receives the conversation plus the agent's
//! tool definitions and returns either a final message or a batch of native
//! tool calls. Everything provider-specific (wire format, streaming,
//! model catalogues) stays behind the trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Represents the possible roles for a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message.
    User,
    /// An assistant authored message.
    Assistant,
    /// A tool result message correlated to a prior tool call.
    Tool,
}

/// A single tool call returned by the LLM in a native function-calling
/// response.
///
/// Providers assign an opaque `id` to each call so the tool result can be
/// correlated back in a follow-up [`Role::Tool`] message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the definitions sent in the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: Value,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls attached to an assistant message, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<NativeToolCall>,
    /// For [`Role::Tool`] messages, the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// A tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Token accounting reported by the provider for one round-trip.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Uniform response shape returned by every provider client.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    /// Final text content (may be empty when the model only calls tools).
    pub content: String,
    /// Native tool calls requested by the model, in order.
    pub tool_calls: Vec<NativeToolCall>,
    /// Token usage for this round-trip, when the provider reports it.
    pub usage: Option<TokenUsage>,
}

/// Errors surfaced by provider clients.
#[derive(Debug)]
pub enum LlmError {
    /// Transport failure (connect, TLS, timeout).
    Request(String),
    /// The provider answered with a non-success status.
    Api { status: u16, message: String },
    /// The response body did not match the expected shape.
    Malformed(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Request(msg) => write!(f, "LLM request failed: {}", msg),
            LlmError::Api { status, message } => {
                write!(f, "LLM API error {}: {}", status, message)
            }
            LlmError::Malformed(msg) => write!(f, "Malformed LLM response: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

/// Trait-driven abstraction over a concrete LLM provider.
///
/// Implementations translate the uniform request into the provider wire
/// format and back. They must be thread-safe (`Send + Sync`) so one client
/// can be shared across agents. Conversation bookkeeping lives in
/// [`Session`](crate::nexus3::session::Session), never here.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send a full conversation and the available tool definitions, and
    /// return the model's next step.
    async fn send_message(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<LlmResponse, LlmError>;

    /// Model identifier for logging and the `status` RPC.
    fn model(&self) -> &str;
}
