//! Typed error hierarchy for Arbor.
//!
//! One enum per subsystem:
//! - `ToolError` / `SpawnError`: action-level failures, rendered back to the
//!   model as text and never fatal to a run
//! - `EngineError`: reasoning-engine failures, fatal to a run
//! - `TreeError` / `SchedulerError`: scheduler and arena invariant failures
//! - `SnapshotError` / `ConfigError`: persistence and configuration

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::kind::NodeKind;
use crate::node::NodeId;

/// Failures of a non-spawn action (read, write, list, shell).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("tool '{tool}' is not available to {kind} agents")]
    NotAvailable { tool: String, kind: NodeKind },

    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    #[error(
        "CONFLICT: File '{path}' was modified by another agent since you read it. \
         Please re-read the file to see the latest changes and try again."
    )]
    Conflict { path: String },

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid UTF-8 text")]
    NotUtf8 { path: String },

    #[error("command timed out after {} seconds", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    #[error("failed to run command: {0}")]
    CommandFailed(#[source] std::io::Error),
}

impl ToolError {
    /// Text delivered to the model as the tool result.
    ///
    /// Conflicts carry their own `CONFLICT:` prefix; everything else is
    /// reported as `Error: ...`.
    pub fn render(&self) -> String {
        match self {
            ToolError::Conflict { .. } => self.to_string(),
            _ => format!("Error: {}", self),
        }
    }
}

/// Rejected spawn requests. Rendered into the caller's own conversation.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("{caller} agents may only spawn [{}], not '{requested}'.", join_kinds(.allowed))]
    PolicyViolation {
        caller: NodeKind,
        allowed: &'static [NodeKind],
        requested: String,
    },

    #[error("invalid spawn request: {0}")]
    InvalidRequest(String),

    #[error("Could not create directory '{}': {source}", .path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SpawnError {
    pub fn render(&self) -> String {
        format!("Error: {}", self)
    }
}

fn join_kinds(kinds: &[NodeKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failures of the reasoning-engine boundary. Always fatal to the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine not configured: {0}")]
    NotConfigured(String),

    #[error("Engine transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Engine API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Engine protocol violation: {0}")]
    Protocol(String),
}

/// A direct answer that lacks the kind's result marker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("no <{marker}>...</{marker}> block found in the answer")]
    Missing { marker: String },
}

/// Arena-level failures of the decomposition tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node {0} not found in tree")]
    UnknownNode(NodeId),

    #[error("Tree already has root {0}")]
    RootAlreadySet(NodeId),

    #[error("Node {0} has a parent and cannot be the root")]
    NotARoot(NodeId),

    #[error("Node {0} has no originating call id")]
    MissingCallId(NodeId),

    #[error("Node {0} is already completed")]
    AlreadyCompleted(NodeId),
}

/// Scheduler failures that end a run.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Tree has no root node to schedule")]
    EmptyTree,

    #[error("max_concurrent must be at least 1")]
    ZeroConcurrency,

    #[error(
        "Scheduler stalled: nothing running or ready, but {} node(s) unresolved: {}",
        .unresolved.len(),
        join_ids(.unresolved)
    )]
    Stalled { unresolved: Vec<NodeId> },

    #[error("Node execution panicked: {0}")]
    ExecutionPanicked(String),

    #[error("Concurrency limiter closed")]
    LimiterClosed,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Snapshot save/load failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to access snapshot at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tree has no root to snapshot")]
    NoRoot,

    #[error("Snapshot violates tree invariants: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid config value for {key}: {message}")]
    Invalid { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_renders_without_error_prefix() {
        let err = ToolError::Conflict {
            path: "src/lib.rs".to_string(),
        };
        let text = err.render();
        assert!(text.starts_with("CONFLICT: File 'src/lib.rs'"));
        assert!(text.contains("re-read"));
    }

    #[test]
    fn other_tool_errors_render_with_error_prefix() {
        let err = ToolError::Timeout {
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.render(), "Error: command timed out after 30 seconds");
    }

    #[test]
    fn sub_second_timeout_keeps_its_fraction() {
        let err = ToolError::Timeout {
            limit: Duration::from_millis(250),
        };
        assert_eq!(err.render(), "Error: command timed out after 0.25 seconds");
    }

    #[test]
    fn policy_violation_names_caller_allowed_and_requested() {
        let err = SpawnError::PolicyViolation {
            caller: NodeKind::Code,
            allowed: &[NodeKind::Test],
            requested: "thinking".to_string(),
        };
        assert_eq!(
            err.render(),
            "Error: code agents may only spawn [test], not 'thinking'."
        );
    }

    #[test]
    fn policy_violation_with_empty_allowed_set() {
        let err = SpawnError::PolicyViolation {
            caller: NodeKind::Test,
            allowed: &[],
            requested: "code".to_string(),
        };
        assert!(err.to_string().contains("[]"));
    }

    #[test]
    fn stalled_lists_unresolved_nodes() {
        let err = SchedulerError::Stalled {
            unresolved: vec![NodeId::from("a"), NodeId::from("b")],
        };
        let text = err.to_string();
        assert!(text.contains("2 node(s)"));
        assert!(text.contains("a, b"));
    }

    #[test]
    fn scheduler_error_converts_from_engine_error() {
        let err: SchedulerError = EngineError::Protocol("bad stop".into()).into();
        assert!(matches!(
            err,
            SchedulerError::Engine(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ToolError::UnknownTool("x".into()));
        assert_std_error(&SpawnError::InvalidRequest("x".into()));
        assert_std_error(&EngineError::NotConfigured("x".into()));
        assert_std_error(&TreeError::UnknownNode(NodeId::from("x")));
        assert_std_error(&SchedulerError::EmptyTree);
        assert_std_error(&SnapshotError::NoRoot);
    }
}
