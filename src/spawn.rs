//! Spawn authorization and child-node construction.
//!
//! A spawn request is checked against the caller kind's `may_spawn` row, its
//! working directory is resolved inside the environment root and created,
//! and only then is a READY child node built. Every failure is a
//! [`SpawnError`] that the scheduler renders into the caller's conversation.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::conversation::ToolCall;
use crate::errors::SpawnError;
use crate::kind::NodeKind;
use crate::node::Node;

/// Input of a `spawn_subagent` call.
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnRequest {
    pub task: String,
    pub agent_type: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

impl SpawnRequest {
    pub fn from_call(call: &ToolCall) -> Result<Self, SpawnError> {
        let request: SpawnRequest = serde_json::from_value(call.input.clone())
            .map_err(|e| SpawnError::InvalidRequest(e.to_string()))?;
        if request.task.trim().is_empty() {
            return Err(SpawnError::InvalidRequest("task must not be empty".to_string()));
        }
        Ok(request)
    }
}

/// Check `requested` against the caller's allowed spawn targets.
///
/// A name that is not a kind at all is treated like a disallowed kind.
pub fn authorize(caller: NodeKind, requested: &str) -> Result<NodeKind, SpawnError> {
    match requested.parse::<NodeKind>() {
        Ok(target) if caller.may_spawn(target) => Ok(target),
        _ => Err(SpawnError::PolicyViolation {
            caller,
            allowed: caller.config().may_spawn,
            requested: requested.to_string(),
        }),
    }
}

/// Resolve a child's working directory relative to the environment root.
///
/// No request inherits the parent's directory. Relative requests are joined
/// onto the parent's directory, absolute ones are re-rooted at the
/// environment root. `..` never climbs above the root.
pub fn resolve_working_directory(parent_dir: &Path, requested: Option<&str>) -> PathBuf {
    let requested = match requested.map(str::trim) {
        Some(r) if !r.is_empty() => Path::new(r),
        _ => return normalize(parent_dir),
    };

    if requested.is_absolute() {
        normalize(requested)
    } else {
        normalize(&parent_dir.join(requested))
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if parts.is_empty() {
        PathBuf::from(".")
    } else {
        parts.iter().collect()
    }
}

/// Build the child node for one spawn call, creating its directory.
pub async fn spawn_child(env_root: &Path, parent: &Node, call: &ToolCall) -> Result<Node, SpawnError> {
    let request = SpawnRequest::from_call(call)?;
    let kind = authorize(parent.kind, &request.agent_type)?;
    let working_directory =
        resolve_working_directory(&parent.working_directory, request.working_directory.as_deref());

    let absolute = env_root.join(&working_directory);
    tokio::fs::create_dir_all(&absolute)
        .await
        .map_err(|source| SpawnError::DirectoryCreation {
            path: working_directory.clone(),
            source,
        })?;

    let child = Node::child(
        kind,
        &request.task,
        parent.id.clone(),
        call.id.clone(),
        working_directory,
    );
    debug!(parent = %parent.id, child = %child.id, kind = %kind, "spawn authorized");
    Ok(child)
}
