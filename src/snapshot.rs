//! JSON snapshots of a decomposition tree.
//!
//! Format: `{ "root": <node>, "nodes": { "<id>": <node>, ... } }`, where
//! `nodes` holds every node except the root. Loading reinserts the root under
//! its own id and rejects snapshots that violate tree invariants.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::SnapshotError;
use crate::node::{Node, NodeId};
use crate::tree::DecompositionTree;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root: Node,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, Node>,
}

impl TreeSnapshot {
    pub fn capture(tree: &DecompositionTree) -> Result<Self, SnapshotError> {
        let root = tree.root().ok_or(SnapshotError::NoRoot)?.clone();
        let nodes = tree
            .nodes()
            .filter(|n| n.id != root.id)
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        Ok(Self { root, nodes })
    }

    /// Rebuild the tree, failing if it violates any invariant.
    pub fn restore(self) -> Result<DecompositionTree, SnapshotError> {
        let root_id = self.root.id.clone();
        let mut nodes: HashMap<NodeId, Node> = self.nodes.into_iter().collect();
        nodes.insert(root_id.clone(), self.root);

        let tree = DecompositionTree::from_parts(root_id, nodes);
        let errors = tree.validate();
        if !errors.is_empty() {
            return Err(SnapshotError::Invalid(errors));
        }
        Ok(tree)
    }
}

/// Write `tree` to `path` through a temporary sibling file and a rename.
pub fn save(tree: &DecompositionTree, path: &Path) -> Result<(), SnapshotError> {
    let snapshot = TreeSnapshot::capture(tree)?;
    let mut json = serde_json::to_string_pretty(&snapshot)?;
    json.push('\n');

    let io_err = |source: std::io::Error| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;

    debug!(path = %path.display(), nodes = tree.len(), "snapshot saved");
    Ok(())
}

pub fn load(path: &Path) -> Result<DecompositionTree, SnapshotError> {
    let content = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let snapshot: TreeSnapshot = serde_json::from_str(&content)?;
    let tree = snapshot.restore()?;
    info!(path = %path.display(), nodes = tree.len(), "snapshot loaded");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;
    use crate::node::NodeState;
    use tempfile::tempdir;

    fn small_tree() -> DecompositionTree {
        let root = Node::root(NodeKind::Thinking, "plan", ".");
        let root_id = root.id.clone();
        let mut tree = DecompositionTree::with_root(root).unwrap();
        let child = Node::child(NodeKind::Code, "build", root_id.clone(), "toolu_1", "src");
        tree.add_children(&root_id, vec![child]).unwrap();
        tree
    }

    #[test]
    fn nodes_map_excludes_root() {
        let tree = small_tree();
        let snapshot = TreeSnapshot::capture(&tree).unwrap();
        assert_eq!(snapshot.nodes.len(), 1);
        assert!(!snapshot.nodes.contains_key(&snapshot.root.id));
    }

    #[test]
    fn empty_tree_cannot_be_captured() {
        assert!(matches!(
            TreeSnapshot::capture(&DecompositionTree::new()),
            Err(SnapshotError::NoRoot)
        ));
    }

    #[test]
    fn save_then_load_preserves_every_node() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("tree.json");
        let mut tree = small_tree();
        let root_id = tree.root_id().unwrap().clone();
        tree.get_mut(&root_id)
            .unwrap()
            .file_versions
            .insert("/env/a.txt".into(), "abc".into());

        save(&tree, &path).unwrap();
        assert!(!dir.path().join("state").join("tree.json.tmp").exists());
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.len(), tree.len());
        for node in tree.nodes() {
            assert_eq!(loaded.get(&node.id), Some(node));
        }
        assert_eq!(loaded.root_id(), Some(&root_id));
        assert_eq!(loaded.get(&root_id).unwrap().state, NodeState::Running);
    }

    #[test]
    fn snapshot_uses_lowercase_tags() {
        let tree = small_tree();
        let value = serde_json::to_value(TreeSnapshot::capture(&tree).unwrap()).unwrap();
        assert_eq!(value["root"]["kind"], "thinking");
        assert_eq!(value["root"]["state"], "running");
        assert!(value["root"]["active_children"].is_array());
    }

    #[test]
    fn load_rejects_broken_invariants() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree.json");
        let mut snapshot = TreeSnapshot::capture(&small_tree()).unwrap();
        snapshot.root.children_ids.push(NodeId::from("ghost"));
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        match load(&path) {
            Err(SnapshotError::Invalid(errors)) => {
                assert!(errors.iter().any(|e| e.contains("ghost")))
            }
            other => panic!("expected invalid snapshot, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load(&dir.path().join("absent.json")),
            Err(SnapshotError::Io { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load(&path), Err(SnapshotError::Json(_))));
    }
}
