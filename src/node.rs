//! A node is one agent working on one task: its conversation plus lifecycle state.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Conversation;
use crate::kind::NodeKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Ready,
    Running,
    Completed,
    /// Reserved for abnormal termination; normal flow never sets it.
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Ready => "ready",
            NodeState::Running => "running",
            NodeState::Completed => "completed",
            NodeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub conversation: Conversation,
    /// Tool-call slot in the parent's conversation this node's result fills.
    #[serde(default)]
    pub originating_call_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<NodeId>,
    #[serde(default)]
    pub children_ids: Vec<NodeId>,
    #[serde(default)]
    pub active_children: BTreeSet<NodeId>,
    #[serde(default)]
    pub state: NodeState,
    /// Path -> SHA-256 of the content this node last read or wrote.
    #[serde(default)]
    pub file_versions: BTreeMap<String, String>,
    /// Relative to the environment root.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub format_retries: u32,
}

impl Node {
    pub fn root(kind: NodeKind, task: &str, working_directory: impl Into<PathBuf>) -> Self {
        Self::new(kind, task, None, None, working_directory.into())
    }

    pub fn child(
        kind: NodeKind,
        task: &str,
        parent_id: NodeId,
        originating_call_id: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self::new(
            kind,
            task,
            Some(parent_id),
            Some(originating_call_id.into()),
            working_directory.into(),
        )
    }

    fn new(
        kind: NodeKind,
        task: &str,
        parent_id: Option<NodeId>,
        originating_call_id: Option<String>,
        working_directory: PathBuf,
    ) -> Self {
        let mut conversation = Conversation::new(kind.config().system_prompt);
        conversation.add_user(first_message(&working_directory, task));
        Self {
            id: NodeId::generate(),
            kind,
            conversation,
            originating_call_id,
            parent_id,
            children_ids: Vec::new(),
            active_children: BTreeSet::new(),
            state: NodeState::Ready,
            file_versions: BTreeMap::new(),
            working_directory,
            result: None,
            format_retries: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_completed(&self) -> bool {
        self.state == NodeState::Completed
    }

    /// Absolute directory this node's actions run in.
    pub fn resolved_dir(&self, env_root: &Path) -> PathBuf {
        if self.working_directory == Path::new(".") {
            env_root.to_path_buf()
        } else {
            env_root.join(&self.working_directory)
        }
    }
}

fn first_message(working_directory: &Path, task: &str) -> String {
    format!("[Working Directory: {}]\n\n{}", working_directory.display(), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::MessageContent;

    #[test]
    fn root_starts_ready_with_working_directory_header() {
        let node = Node::root(NodeKind::Thinking, "build a parser", ".");
        assert!(node.is_root());
        assert_eq!(node.state, NodeState::Ready);
        assert_eq!(node.conversation.len(), 1);
        assert_eq!(
            node.conversation.messages[0].content,
            MessageContent::Text("[Working Directory: .]\n\nbuild a parser".into())
        );
        assert_eq!(node.conversation.system, NodeKind::Thinking.config().system_prompt);
    }

    #[test]
    fn child_records_parent_and_call_slot() {
        let parent = NodeId::from("p");
        let node = Node::child(NodeKind::Code, "write it", parent.clone(), "toolu_9", "src");
        assert_eq!(node.parent_id, Some(parent));
        assert_eq!(node.originating_call_id.as_deref(), Some("toolu_9"));
        assert_eq!(node.working_directory, PathBuf::from("src"));
        assert!(!node.is_root());
    }

    #[test]
    fn ids_are_unique() {
        let a = Node::root(NodeKind::Test, "a", ".");
        let b = Node::root(NodeKind::Test, "a", ".");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn resolved_dir_joins_env_root() {
        let env = Path::new("/tmp/env");
        let root = Node::root(NodeKind::Thinking, "t", ".");
        assert_eq!(root.resolved_dir(env), PathBuf::from("/tmp/env"));
        let nested = Node::root(NodeKind::Thinking, "t", "a/b");
        assert_eq!(nested.resolved_dir(env), PathBuf::from("/tmp/env/a/b"));
    }

    #[test]
    fn deserializes_with_defaults_for_optional_fields() {
        let raw = serde_json::json!({
            "id": "n1",
            "kind": "code",
            "conversation": {"system": "s", "messages": []}
        });
        let node: Node = serde_json::from_value(raw).unwrap();
        assert_eq!(node.state, NodeState::Ready);
        assert_eq!(node.working_directory, PathBuf::from("."));
        assert!(node.active_children.is_empty());
        assert_eq!(node.format_retries, 0);
    }
}
