//! Engine backed by the Anthropic Messages API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{Engine, EngineRequest, EngineResponse, StopReason, Usage};
use crate::config::EngineConfig;
use crate::conversation::{Message, MessageContent, ToolCall};
use crate::errors::EngineError;

pub struct AnthropicEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicEngine {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8096,
        }
    }

    /// Build from config, reading the API key from `api_key_env`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                EngineError::NotConfigured(format!("{} is not set", config.api_key_env))
            })?;
        Ok(Self::new(api_key)
            .with_base_url(&config.base_url)
            .with_max_tokens(config.max_tokens))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn build_request_body(&self, request: &EngineRequest) -> Value {
        json!({
            "model": request.model,
            "max_tokens": self.max_tokens,
            "system": request.system,
            "tools": request.tools,
            "messages": merge_consecutive(&request.messages),
        })
    }
}

/// Merge runs of same-role messages into one message of content blocks.
///
/// Child results arrive as separate user messages; the API wants them in a
/// single user turn after the assistant turn that requested them.
pub fn merge_consecutive(messages: &[Message]) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role => {
                let taken = std::mem::replace(&mut last.content, MessageContent::Blocks(Vec::new()));
                let mut blocks = taken.into_blocks();
                blocks.extend(message.content.clone().into_blocks());
                last.content = MessageContent::Blocks(blocks);
            }
            _ => merged.push(message.clone()),
        }
    }
    merged
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ApiBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

impl From<ApiResponse> for EngineResponse {
    fn from(resp: ApiResponse) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                ApiBlock::Text { text: t } => text.push_str(&t),
                ApiBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall::new(id, name, input))
                }
                ApiBlock::Other => {}
            }
        }
        EngineResponse {
            text,
            tool_calls,
            stop_reason: StopReason::from_api(resp.stop_reason.as_deref().unwrap_or("unknown")),
            usage: resp.usage,
        }
    }
}

#[async_trait]
impl Engine for AnthropicEngine {
    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/messages", self.base_url);
        debug!(model = %request.model, messages = request.messages.len(), "engine request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("malformed response body: {}", e)))?;
        Ok(api_resp.into())
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::tools::ToolName;

    #[test]
    fn merges_consecutive_tool_results_into_one_user_turn() {
        let messages = vec![
            Message::user("task"),
            Message::assistant_turn(
                "",
                &[
                    ToolCall::new("a", "spawn_subagent", json!({})),
                    ToolCall::new("b", "spawn_subagent", json!({})),
                ],
            ),
            Message::tool_result("b", "B done"),
            Message::tool_result("a", "A done"),
        ];

        let merged = merge_consecutive(&messages);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[2].role, Role::User);
        let ids: Vec<_> = merged[2]
            .content
            .clone()
            .into_blocks()
            .iter()
            .filter_map(|b| b.tool_use_id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn merging_plain_text_wraps_in_blocks() {
        let merged = merge_consecutive(&[Message::user("one"), Message::user("two")]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content.clone().into_blocks().len(), 2);
    }

    #[test]
    fn request_body_carries_model_tools_and_limits() {
        let engine = AnthropicEngine::new("key").with_max_tokens(1000);
        let request = EngineRequest {
            system: "sys".into(),
            model: "claude-haiku-4-5".into(),
            tools: vec![ToolName::ReadFile.schema()],
            messages: vec![Message::user("hi")],
        };
        let body = engine.build_request_body(&request);
        assert_eq!(body["model"], "claude-haiku-4-5");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn parses_mixed_response_blocks() {
        let raw = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "a"}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let api: ApiResponse = serde_json::from_value(raw).unwrap();
        let resp: EngineResponse = api.into();
        assert_eq!(resp.text, "Let me look.");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(resp.usage.input_tokens, 12);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let engine = AnthropicEngine::new("k").with_base_url("http://localhost:9/");
        assert_eq!(engine.base_url, "http://localhost:9");
    }
}
