//! Decomposition tree: an arena of nodes linked by id.
//!
//! Fan-out happens in [`DecompositionTree::add_children`]; fan-in is the pair
//! [`DecompositionTree::message_parent`] + [`DecompositionTree::sync_with_parent`],
//! which resumes a parent exactly once, when its last active child completes.
//! Nodes are never removed.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, info};

use crate::errors::TreeError;
use crate::node::{Node, NodeId, NodeState};

#[derive(Debug, Clone, Default)]
pub struct DecompositionTree {
    root: Option<NodeId>,
    nodes: HashMap<NodeId, Node>,
}

impl DecompositionTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tree seeded with `root`.
    pub fn with_root(root: Node) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        tree.set_root(root)?;
        Ok(tree)
    }

    /// Rebuild from persisted parts without checking invariants; see [`Self::validate`].
    pub(crate) fn from_parts(root: NodeId, nodes: HashMap<NodeId, Node>) -> Self {
        Self {
            root: Some(root),
            nodes,
        }
    }

    pub fn set_root(&mut self, node: Node) -> Result<NodeId, TreeError> {
        if let Some(existing) = &self.root {
            return Err(TreeError::RootAlreadySet(existing.clone()));
        }
        if node.parent_id.is_some() {
            return Err(TreeError::NotARoot(node.id));
        }
        let id = node.id.clone();
        self.nodes.insert(id.clone(), node);
        self.root = Some(id.clone());
        Ok(id)
    }

    pub fn root_id(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node, TreeError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::UnknownNode(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Ids of READY nodes, in id order.
    pub fn ready_nodes(&self) -> Vec<NodeId> {
        let mut ready: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.state == NodeState::Ready)
            .map(|n| n.id.clone())
            .collect();
        ready.sort();
        ready
    }

    /// Ids of nodes that are not COMPLETED, in id order.
    pub fn unresolved(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !n.is_completed())
            .map(|n| n.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Mark a node RUNNING and hand out a private copy for its execution.
    pub fn mark_running(&mut self, id: &NodeId) -> Result<Node, TreeError> {
        let node = self.node_mut(id)?;
        node.state = NodeState::Running;
        Ok(node.clone())
    }

    /// Write an execution's copy of a node back into the arena.
    pub fn put_back(&mut self, node: Node) -> Result<(), TreeError> {
        let slot = self.node_mut(&node.id)?;
        *slot = node;
        Ok(())
    }

    pub fn mark_ready(&mut self, id: &NodeId) -> Result<(), TreeError> {
        self.node_mut(id)?.state = NodeState::Ready;
        Ok(())
    }

    pub fn complete(&mut self, id: &NodeId, result: String) -> Result<(), TreeError> {
        let node = self.node_mut(id)?;
        if node.is_completed() {
            return Err(TreeError::AlreadyCompleted(id.clone()));
        }
        node.state = NodeState::Completed;
        node.result = Some(result);
        Ok(())
    }

    /// Fan-out: register `children` under `parent_id` and park the parent
    /// RUNNING until all of them complete.
    pub fn add_children(&mut self, parent_id: &NodeId, children: Vec<Node>) -> Result<(), TreeError> {
        if !self.nodes.contains_key(parent_id) {
            return Err(TreeError::UnknownNode(parent_id.clone()));
        }

        let ids: Vec<NodeId> = children.iter().map(|c| c.id.clone()).collect();
        for child in children {
            self.nodes.insert(child.id.clone(), child);
        }

        let parent = self.node_mut(parent_id)?;
        parent.active_children = ids.iter().cloned().collect();
        parent.children_ids.extend(ids);
        parent.state = NodeState::Running;
        debug!(parent = %parent_id, active = parent.active_children.len(), "children registered");
        Ok(())
    }

    /// Deliver `text` as the tool result filling the child's originating call
    /// slot in its parent's conversation. No-op for the root.
    pub fn message_parent(&mut self, child_id: &NodeId, text: &str) -> Result<(), TreeError> {
        let child = self
            .nodes
            .get(child_id)
            .ok_or_else(|| TreeError::UnknownNode(child_id.clone()))?;
        let Some(parent_id) = child.parent_id.clone() else {
            return Ok(());
        };
        let call_id = child
            .originating_call_id
            .clone()
            .ok_or_else(|| TreeError::MissingCallId(child_id.clone()))?;

        self.node_mut(&parent_id)?
            .conversation
            .add_tool_result(call_id, text);
        Ok(())
    }

    /// Fan-in: drop the child from its parent's active set. Returns the parent
    /// id when this was its last active child and the parent is READY again.
    pub fn sync_with_parent(&mut self, child_id: &NodeId) -> Result<Option<NodeId>, TreeError> {
        let child = self
            .nodes
            .get(child_id)
            .ok_or_else(|| TreeError::UnknownNode(child_id.clone()))?;
        let Some(parent_id) = child.parent_id.clone() else {
            return Ok(None);
        };

        let parent = self.node_mut(&parent_id)?;
        if !parent.active_children.remove(child_id) {
            return Ok(None);
        }
        if parent.active_children.is_empty() {
            parent.state = NodeState::Ready;
            debug!(parent = %parent_id, "all children resolved, parent resumes");
            return Ok(Some(parent_id));
        }
        Ok(None)
    }

    /// True iff there is a root and every node is COMPLETED.
    pub fn is_done(&self) -> bool {
        self.root.is_some() && self.nodes.values().all(Node::is_completed)
    }

    /// Reset every RUNNING node without active children to READY.
    ///
    /// Such a node was mid-turn when the run stopped; its turn is re-executed.
    pub fn recover_interrupted(&mut self) -> Vec<NodeId> {
        let mut recovered: Vec<NodeId> = self
            .nodes
            .values_mut()
            .filter(|n| n.state == NodeState::Running && n.active_children.is_empty())
            .map(|n| {
                n.state = NodeState::Ready;
                n.id.clone()
            })
            .collect();
        recovered.sort();
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered interrupted nodes");
        }
        recovered
    }

    pub fn state_counts(&self) -> BTreeMap<NodeState, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.state).or_insert(0) += 1;
        }
        counts
    }

    /// Every violated structural invariant, as human-readable strings.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();

        match &self.root {
            None if !self.nodes.is_empty() => errors.push("tree has nodes but no root".to_string()),
            None => {}
            Some(root) => match self.nodes.get(root) {
                None => errors.push(format!("root {} is not in the arena", root)),
                Some(node) if node.parent_id.is_some() => {
                    errors.push(format!("root {} has a parent", root))
                }
                Some(_) => {}
            },
        }

        let parentless: Vec<&NodeId> = ids
            .iter()
            .copied()
            .filter(|id| self.nodes[*id].parent_id.is_none())
            .collect();
        if !self.nodes.is_empty() && parentless.len() != 1 {
            errors.push(format!(
                "expected exactly one parentless node, found {}",
                parentless.len()
            ));
        }

        for id in &ids {
            let node = &self.nodes[*id];
            if node.id != **id {
                errors.push(format!("node stored under {} has id {}", id, node.id));
            }

            for child_id in &node.children_ids {
                match self.nodes.get(child_id) {
                    None => errors.push(format!("{}: child {} does not exist", id, child_id)),
                    Some(child) if child.parent_id.as_ref() != Some(*id) => errors.push(format!(
                        "{}: child {} names a different parent",
                        id, child_id
                    )),
                    Some(_) => {}
                }
            }

            for active in &node.active_children {
                if !node.children_ids.contains(active) {
                    errors.push(format!(
                        "{}: active child {} is not among its children",
                        id, active
                    ));
                }
            }

            if let Some(parent_id) = &node.parent_id {
                match self.nodes.get(parent_id) {
                    None => errors.push(format!("{}: parent {} does not exist", id, parent_id)),
                    Some(parent) if !parent.children_ids.contains(*id) => errors.push(format!(
                        "{}: parent {} does not list it as a child",
                        id, parent_id
                    )),
                    Some(_) => {}
                }
                if node.originating_call_id.is_none() {
                    errors.push(format!("{}: child has no originating call id", id));
                }
            }

            if self.reaches_cycle(id) {
                errors.push(format!("{}: parent chain contains a cycle", id));
            }
        }

        errors
    }

    fn reaches_cycle(&self, start: &NodeId) -> bool {
        let mut seen = HashSet::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if !seen.insert(id) {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent_id.as_ref());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;

    fn root_tree() -> (DecompositionTree, NodeId) {
        let root = Node::root(NodeKind::Thinking, "plan", ".");
        let id = root.id.clone();
        (DecompositionTree::with_root(root).unwrap(), id)
    }

    fn child_of(parent: &NodeId, call: &str) -> Node {
        Node::child(NodeKind::Code, "work", parent.clone(), call, ".")
    }

    #[test]
    fn rejects_second_root_and_non_root() {
        let (mut tree, root) = root_tree();
        let other = Node::root(NodeKind::Thinking, "again", ".");
        assert_eq!(tree.set_root(other), Err(TreeError::RootAlreadySet(root.clone())));

        let mut fresh = DecompositionTree::new();
        let child = child_of(&root, "c");
        let child_id = child.id.clone();
        assert_eq!(fresh.set_root(child), Err(TreeError::NotARoot(child_id)));
    }

    #[test]
    fn fan_out_and_fan_in_resumes_parent_once() {
        let (mut tree, root) = root_tree();
        tree.mark_running(&root).unwrap();
        let a = child_of(&root, "call_a");
        let b = child_of(&root, "call_b");
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        tree.add_children(&root, vec![a, b]).unwrap();

        let parent = tree.get(&root).unwrap();
        assert_eq!(parent.active_children.len(), 2);
        assert_eq!(parent.children_ids, vec![a_id.clone(), b_id.clone()]);
        assert_eq!(parent.state, NodeState::Running);
        assert_eq!(tree.ready_nodes().len(), 2);

        tree.complete(&a_id, "A".into()).unwrap();
        tree.message_parent(&a_id, "A").unwrap();
        assert_eq!(tree.sync_with_parent(&a_id).unwrap(), None);
        assert_eq!(tree.get(&root).unwrap().active_children.len(), 1);
        assert_eq!(tree.get(&root).unwrap().state, NodeState::Running);

        tree.complete(&b_id, "B".into()).unwrap();
        tree.message_parent(&b_id, "B").unwrap();
        assert_eq!(tree.sync_with_parent(&b_id).unwrap(), Some(root.clone()));
        // A repeated sync never resumes twice.
        assert_eq!(tree.sync_with_parent(&b_id).unwrap(), None);

        let parent = tree.get(&root).unwrap();
        assert!(parent.active_children.is_empty());
        assert_eq!(parent.state, NodeState::Ready);
        assert_eq!(parent.conversation.find_tool_result("call_a"), Some("A"));
        assert_eq!(parent.conversation.find_tool_result("call_b"), Some("B"));
        assert!(tree.validate().is_empty());
    }

    #[test]
    fn message_and_sync_are_noops_for_root() {
        let (mut tree, root) = root_tree();
        let before = tree.get(&root).unwrap().conversation.len();
        tree.message_parent(&root, "final").unwrap();
        assert_eq!(tree.sync_with_parent(&root).unwrap(), None);
        assert_eq!(tree.get(&root).unwrap().conversation.len(), before);
    }

    #[test]
    fn completion_is_terminal() {
        let (mut tree, root) = root_tree();
        tree.complete(&root, "done".into()).unwrap();
        assert_eq!(
            tree.complete(&root, "again".into()),
            Err(TreeError::AlreadyCompleted(root.clone()))
        );
        assert_eq!(tree.get(&root).unwrap().result.as_deref(), Some("done"));
    }

    #[test]
    fn is_done_requires_every_node_completed() {
        assert!(!DecompositionTree::new().is_done());

        let (mut tree, root) = root_tree();
        let child = child_of(&root, "c");
        let child_id = child.id.clone();
        tree.add_children(&root, vec![child]).unwrap();
        tree.complete(&child_id, "x".into()).unwrap();
        assert!(!tree.is_done());
        tree.complete(&root, "y".into()).unwrap();
        assert!(tree.is_done());
    }

    #[test]
    fn unknown_ids_are_errors() {
        let (mut tree, _) = root_tree();
        let ghost = NodeId::from("ghost");
        assert_eq!(tree.mark_ready(&ghost), Err(TreeError::UnknownNode(ghost.clone())));
        assert_eq!(
            tree.add_children(&ghost, vec![]),
            Err(TreeError::UnknownNode(ghost.clone()))
        );
        assert!(tree.sync_with_parent(&ghost).is_err());
    }

    #[test]
    fn recover_resets_only_leaf_running_nodes() {
        let (mut tree, root) = root_tree();
        tree.mark_running(&root).unwrap();
        let child = child_of(&root, "c");
        let child_id = child.id.clone();
        tree.add_children(&root, vec![child]).unwrap();
        tree.mark_running(&child_id).unwrap();

        let recovered = tree.recover_interrupted();
        assert_eq!(recovered, vec![child_id.clone()]);
        assert_eq!(tree.get(&child_id).unwrap().state, NodeState::Ready);
        assert_eq!(tree.get(&root).unwrap().state, NodeState::Running);
    }

    #[test]
    fn state_counts_tally_by_state() {
        let (mut tree, root) = root_tree();
        tree.add_children(&root, vec![child_of(&root, "a"), child_of(&root, "b")])
            .unwrap();
        let counts = tree.state_counts();
        assert_eq!(counts[&NodeState::Running], 1);
        assert_eq!(counts[&NodeState::Ready], 2);
    }

    #[test]
    fn validate_reports_broken_links() {
        let (mut tree, root) = root_tree();
        let child = child_of(&root, "c");
        let child_id = child.id.clone();
        tree.add_children(&root, vec![child]).unwrap();

        let parent = tree.get_mut(&root).unwrap();
        parent.active_children.insert(NodeId::from("stray"));
        parent.children_ids.push(NodeId::from("missing"));

        let errors = tree.validate();
        assert!(errors.iter().any(|e| e.contains("child missing does not exist")));
        assert!(errors.iter().any(|e| e.contains("active child stray")));

        tree.get_mut(&child_id).unwrap().originating_call_id = None;
        assert!(tree.validate().iter().any(|e| e.contains("no originating call id")));
    }

    #[test]
    fn validate_detects_cycles_and_multiple_roots() {
        let (mut tree, root) = root_tree();
        let child = child_of(&root, "c");
        let child_id = child.id.clone();
        tree.add_children(&root, vec![child]).unwrap();
        tree.get_mut(&root).unwrap().parent_id = Some(child_id.clone());
        tree.get_mut(&child_id).unwrap().children_ids.push(root.clone());

        let errors = tree.validate();
        assert!(errors.iter().any(|e| e.contains("cycle")));
        assert!(errors.iter().any(|e| e.contains("exactly one parentless node")));
    }
}
