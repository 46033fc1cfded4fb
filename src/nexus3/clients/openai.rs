//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/chat/completions` protocol
//! with function calling (OpenAI itself, or local servers exposing the same
//! surface). This is the only place the wire format appears; everything
//! above speaks [`ClientWrapper`].

use async_trait::async_trait;
use log::debug;
use serde_json::{json, Map, Value};

use crate::nexus3::client_wrapper::{
    ClientWrapper, LlmError, LlmResponse, Message, NativeToolCall, Role, TokenUsage,
};
use crate::nexus3::clients::http_pool::shared_client;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIClient {
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAIClient {
    /// Client against the default OpenAI endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, api_key, model)
    }

    /// Client against any compatible endpoint (local inference servers,
    /// gateways).
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn encode_message(message: &Message) -> Value {
        let mut obj = Map::new();
        obj.insert("role".to_string(), Value::from(Self::role_str(message.role)));
        obj.insert("content".to_string(), Value::from(message.content.clone()));
        if !message.tool_calls.is_empty() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect();
            obj.insert("tool_calls".to_string(), Value::from(calls));
        }
        if let Some(call_id) = &message.tool_call_id {
            obj.insert("tool_call_id".to_string(), Value::from(call_id.clone()));
        }
        Value::Object(obj)
    }

    fn decode_tool_calls(message: &Value) -> Vec<NativeToolCall> {
        message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let id = call["id"].as_str()?.to_string();
                        let name = call["function"]["name"].as_str()?.to_string();
                        let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments =
                            serde_json::from_str(raw_args).unwrap_or(Value::Object(Map::new()));
                        Some(NativeToolCall {
                            id,
                            name,
                            arguments,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: &[Value],
    ) -> Result<LlmResponse, LlmError> {
        let client = shared_client(&self.base_url);
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(self.model.clone()));
        body.insert(
            "messages".to_string(),
            Value::from(
                messages
                    .iter()
                    .map(Self::encode_message)
                    .collect::<Vec<Value>>(),
            ),
        );
        if !tools.is_empty() {
            body.insert("tools".to_string(), Value::from(tools.to_vec()));
        }

        debug!("chat completion request to {} ({} messages)", url, messages.len());
        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let choice_message = payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| LlmError::Malformed("missing choices[0].message".to_string()))?;

        let usage = payload.get("usage").map(|usage| TokenUsage {
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
            total_tokens: usage["total_tokens"].as_u64().unwrap_or(0),
        });

        Ok(LlmResponse {
            content: choice_message["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            tool_calls: Self::decode_tool_calls(choice_message),
            usage,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
