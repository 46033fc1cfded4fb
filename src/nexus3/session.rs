//! Conversation session with rolling history and token tracking.
//!
//! Each agent wraps one [`Session`]: the system prompt, the accumulated
//! messages of all turns, and cumulative token usage. The session knows
//! nothing about tools or events; it only brokers between the agent's turn
//! loop and the provider client.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::nexus3::client_wrapper::{
    ClientWrapper, LlmError, LlmResponse, Message, Role, TokenUsage,
};

/// Default context budget (tokens) when the caller does not pass one.
pub const DEFAULT_MAX_TOKENS: u64 = 128_000;
/// Number of trailing messages kept by [`Session::compact`].
const COMPACT_KEEP_RECENT: usize = 6;

pub struct Session {
    client: Arc<dyn ClientWrapper>,
    system_prompt: String,
    history: Vec<Message>,
    max_tokens: u64,
    usage: TokenUsage,
    /// Last reported prompt size, the best available estimate of current
    /// context occupancy.
    last_prompt_tokens: u64,
}

impl Session {
    pub fn new(client: Arc<dyn ClientWrapper>, system_prompt: String, max_tokens: u64) -> Self {
        Self {
            client,
            system_prompt,
            history: Vec::new(),
            max_tokens,
            usage: TokenUsage::default(),
            last_prompt_tokens: 0,
        }
    }

    pub fn client(&self) -> &Arc<dyn ClientWrapper> {
        &self.client
    }

    /// Append a message without calling the model.
    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Full message array as sent to the provider: system prompt first,
    /// then the rolling history.
    fn messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.system_prompt.is_empty() {
            messages.push(Message::text(Role::System, self.system_prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// One provider round-trip over the current history.
    ///
    /// The assistant reply (text and tool calls) is appended to the history
    /// and usage counters are updated.
    pub async fn step(&mut self, tools: &[Value]) -> Result<LlmResponse, LlmError> {
        let response = self.client.send_message(&self.messages(), tools).await?;
        if let Some(usage) = &response.usage {
            self.usage.add(usage);
            self.last_prompt_tokens = usage.input_tokens;
        }
        self.history.push(Message {
            role: Role::Assistant,
            content: response.content.clone(),
            tool_calls: response.tool_calls.clone(),
            tool_call_id: None,
        });
        Ok(response)
    }

    /// Cumulative token usage across every call of this session.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Number of messages in the rolling history.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Context occupancy estimate in [0, 1].
    pub fn context_usage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        (self.last_prompt_tokens as f64 / self.max_tokens as f64).min(1.0)
    }

    pub fn max_tokens(&self) -> u64 {
        self.max_tokens
    }

    /// Drop everything but the most recent exchanges.
    ///
    /// Returns the number of messages removed. The system prompt is
    /// untouched; the context estimate is reset until the next call
    /// reports fresh numbers.
    pub fn compact(&mut self) -> usize {
        if self.history.len() <= COMPACT_KEEP_RECENT {
            return 0;
        }
        let removed = self.history.len() - COMPACT_KEEP_RECENT;
        self.history.drain(..removed);
        // Tool-result messages must not lead the history without their
        // originating call; drop leading orphans.
        while self
            .history
            .first()
            .map(|m| m.role == Role::Tool)
            .unwrap_or(false)
        {
            self.history.remove(0);
        }
        self.last_prompt_tokens = 0;
        debug!("compacted session, removed {} messages", removed);
        removed
    }
}
