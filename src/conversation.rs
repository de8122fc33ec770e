//! Conversation model shared by nodes, the engine boundary and snapshots.
//!
//! Messages follow the Messages API shape: a role plus either plain text or a
//! list of typed content blocks (`text`, `tool_use`, `tool_result`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// An action the engine asked for in its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

impl ContentBlock {
    /// The call id a `tool_use` or `tool_result` block refers to.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            ContentBlock::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// View the content as blocks, wrapping plain text in a single text block.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        match self {
            MessageContent::Text(text) => vec![ContentBlock::Text { text }],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// The raw assistant turn: its text (if any) followed by every requested action.
    pub fn assistant_turn(text: &str, calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        blocks.extend(calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        }));
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }]),
        }
    }

    /// Result text if this message carries a tool result for `tool_use_id`.
    pub fn tool_result_for(&self, tool_use_id: &str) -> Option<&str> {
        let MessageContent::Blocks(blocks) = &self.content else {
            return None;
        };
        blocks.iter().find_map(|block| match block {
            ContentBlock::ToolResult {
                tool_use_id: id,
                content,
            } if id == tool_use_id => Some(content.as_str()),
            _ => None,
        })
    }
}

/// Full message history of one node plus its fixed system instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub system: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn add_user(&mut self, text: impl Into<String>) {
        self.push(Message::user(text));
    }

    pub fn add_tool_result(&mut self, tool_use_id: impl Into<String>, content: impl Into<String>) {
        self.push(Message::tool_result(tool_use_id, content));
    }

    /// Most recent tool result recorded for `tool_use_id`.
    pub fn find_tool_result(&self, tool_use_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find_map(|m| m.tool_result_for(tool_use_id))
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_turn_keeps_text_then_calls_in_order() {
        let calls = vec![
            ToolCall::new("t1", "read_file", json!({"path": "a.txt"})),
            ToolCall::new("t2", "run_shell", json!({"command": "ls"})),
        ];
        let msg = Message::assistant_turn("looking around", &calls);
        let MessageContent::Blocks(blocks) = msg.content else {
            panic!("expected blocks");
        };
        assert_eq!(blocks.len(), 3);
        assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "looking around"));
        assert!(matches!(&blocks[2], ContentBlock::ToolUse { id, .. } if id == "t2"));
    }

    #[test]
    fn assistant_turn_without_text_has_only_calls() {
        let calls = vec![ToolCall::new("t1", "read_file", json!({}))];
        let msg = Message::assistant_turn("", &calls);
        assert_eq!(msg.content.into_blocks().len(), 1);
    }

    #[test]
    fn serializes_in_messages_api_shape() {
        let msg = Message::tool_result("toolu_1", "done");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "done"}]
            })
        );

        let plain = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(plain, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn find_tool_result_returns_latest_match() {
        let mut conv = Conversation::new("system");
        conv.add_user("task");
        conv.add_tool_result("a", "first");
        conv.add_tool_result("b", "other");
        assert_eq!(conv.find_tool_result("a"), Some("first"));
        assert_eq!(conv.find_tool_result("b"), Some("other"));
        assert_eq!(conv.find_tool_result("missing"), None);
    }

    #[test]
    fn deserializes_both_content_forms() {
        let raw = json!([
            {"role": "user", "content": "plain"},
            {"role": "assistant", "content": [{"type": "text", "text": "hello"}]}
        ]);
        let messages: Vec<Message> = serde_json::from_value(raw).unwrap();
        assert_eq!(messages[0].content, MessageContent::Text("plain".into()));
        assert_eq!(messages[1].role, Role::Assistant);
    }
}
