//! Progress events emitted while the scheduler drives a tree.

use serde::{Deserialize, Serialize};

use crate::kind::NodeKind;
use crate::node::NodeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A node was marked RUNNING and its execution launched.
    NodeStarted { node: NodeId, kind: NodeKind },
    /// Non-spawn actions ran during a node's turn.
    ToolsExecuted { node: NodeId, tools: Vec<String> },
    /// A node fanned out into children.
    ChildrenSpawned {
        parent: NodeId,
        children: Vec<(NodeId, NodeKind)>,
    },
    /// A spawn request was refused; the reason went back to the caller.
    SpawnRejected { node: NodeId, reason: String },
    /// A node answered and its result was delivered.
    NodeCompleted {
        node: NodeId,
        kind: NodeKind,
        result: String,
    },
    /// The last active child of a node completed; the node is READY again.
    NodeResumed { node: NodeId },
    /// An answer lacked its result marker and the node was asked again.
    FormatRetry { node: NodeId, attempt: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = SchedulerEvent::FormatRetry {
            node: NodeId::from("n1"),
            attempt: 1,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "format_retry");
        assert_eq!(value["node"], "n1");
    }
}
