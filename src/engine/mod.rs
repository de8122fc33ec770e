//! Reasoning-engine boundary.
//!
//! The scheduler sends an [`EngineRequest`] and gets back either a direct
//! answer or a list of requested actions. Everything else is a protocol
//! violation. Implementations:
//! - [`anthropic::AnthropicEngine`] - the Messages API over HTTP
//! - [`scripted::ScriptedEngine`] - canned responses for tests and dry runs

pub mod anthropic;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{Message, ToolCall};
use crate::errors::EngineError;
use crate::tools::ToolSchema;

pub use anthropic::AnthropicEngine;
pub use scripted::ScriptedEngine;

#[derive(Debug, Clone, Serialize)]
pub struct EngineRequest {
    pub system: String,
    pub model: String,
    pub tools: Vec<ToolSchema>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    Other(String),
}

impl StopReason {
    pub fn from_api(reason: &str) -> Self {
        match reason {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            other => StopReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// The two interpretable outcomes of one engine turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Answer(String),
    Actions(Vec<ToolCall>),
}

impl EngineResponse {
    /// A direct answer (`end_turn`).
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    /// A turn requesting actions (`tool_use`).
    pub fn actions(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }

    pub fn with_stop_reason(mut self, stop_reason: StopReason) -> Self {
        self.stop_reason = stop_reason;
        self
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Usage {
            input_tokens,
            output_tokens,
        };
        self
    }

    /// Classify the turn, rejecting anything but `end_turn` or a non-empty `tool_use`.
    pub fn turn(&self) -> Result<Turn, EngineError> {
        match &self.stop_reason {
            StopReason::EndTurn => Ok(Turn::Answer(self.text.clone())),
            StopReason::ToolUse if self.tool_calls.is_empty() => Err(EngineError::Protocol(
                "stop reason tool_use without any tool calls".to_string(),
            )),
            StopReason::ToolUse => Ok(Turn::Actions(self.tool_calls.clone())),
            StopReason::Other(reason) => Err(EngineError::Protocol(format!(
                "unexpected stop reason '{}'",
                reason
            ))),
        }
    }
}

#[async_trait]
pub trait Engine: Send + Sync {
    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn end_turn_is_an_answer() {
        let resp = EngineResponse::answer("<MESSAGE>hi</MESSAGE>");
        assert_eq!(resp.turn().unwrap(), Turn::Answer("<MESSAGE>hi</MESSAGE>".into()));
    }

    #[test]
    fn tool_use_with_calls_is_actions() {
        let call = ToolCall::new("t1", "read_file", json!({"path": "a"}));
        let resp = EngineResponse::actions(vec![call.clone()]);
        assert_eq!(resp.turn().unwrap(), Turn::Actions(vec![call]));
    }

    #[test]
    fn tool_use_without_calls_is_protocol_violation() {
        let resp = EngineResponse::actions(vec![]);
        assert!(matches!(resp.turn(), Err(EngineError::Protocol(_))));
    }

    #[test]
    fn other_stop_reasons_are_protocol_violations() {
        let resp = EngineResponse::answer("partial")
            .with_stop_reason(StopReason::from_api("max_tokens"));
        let err = resp.turn().unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(Usage {
            input_tokens: 10,
            output_tokens: 2,
        });
        total.add(Usage {
            input_tokens: 5,
            output_tokens: 1,
        });
        assert_eq!(total.input_tokens, 15);
        assert_eq!(total.output_tokens, 3);
    }
}
