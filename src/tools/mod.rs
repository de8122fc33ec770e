//! Agent actions: the tool table, input schemas and the non-spawn tool runtime.
//!
//! Spawn requests are intercepted by the scheduler before reaching
//! [`ToolRuntime::run`]; everything else executes here against the calling
//! node's private copy, so OCC bookkeeping lands in that node's `file_versions`.

pub mod fs;
pub mod schema;
pub mod shell;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::conversation::ToolCall;
use crate::errors::ToolError;
use crate::node::Node;

pub use schema::ToolSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SpawnSubagent,
    ReadFile,
    WriteFile,
    ListDirectory,
    RunShell,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::SpawnSubagent => "spawn_subagent",
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::ListDirectory => "list_directory",
            ToolName::RunShell => "run_shell",
        }
    }

    pub fn parse(name: &str) -> Option<ToolName> {
        match name {
            "spawn_subagent" => Some(ToolName::SpawnSubagent),
            "read_file" => Some(ToolName::ReadFile),
            "write_file" => Some(ToolName::WriteFile),
            "list_directory" => Some(ToolName::ListDirectory),
            "run_shell" => Some(ToolName::RunShell),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize)]
struct PathInput {
    path: String,
}

#[derive(Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct ListInput {
    #[serde(default = "default_list_path")]
    path: String,
}

fn default_list_path() -> String {
    ".".to_string()
}

#[derive(Deserialize)]
struct ShellInput {
    command: String,
}

fn parse_input<T: DeserializeOwned>(tool: ToolName, call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_value(call.input.clone()).map_err(|e| ToolError::InvalidInput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Executes non-spawn actions for one node turn.
#[derive(Debug, Clone)]
pub struct ToolRuntime {
    shell_timeout: Duration,
}

impl Default for ToolRuntime {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ToolRuntime {
    pub fn new(shell_timeout: Duration) -> Self {
        Self { shell_timeout }
    }

    /// Run one action and return the text delivered back as its tool result.
    ///
    /// Never fails: every error is rendered into the returned string.
    pub async fn run(&self, call: &ToolCall, node: &mut Node, working_dir: &Path) -> String {
        match self.dispatch(call, node, working_dir).await {
            Ok(output) => output,
            Err(e) => {
                debug!(node = %node.id, tool = %call.name, error = %e, "tool call failed");
                e.render()
            }
        }
    }

    async fn dispatch(
        &self,
        call: &ToolCall,
        node: &mut Node,
        working_dir: &Path,
    ) -> Result<String, ToolError> {
        let tool =
            ToolName::parse(&call.name).ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;
        if !node.kind.exposes(tool) {
            return Err(ToolError::NotAvailable {
                tool: call.name.clone(),
                kind: node.kind,
            });
        }

        match tool {
            ToolName::ReadFile => {
                let input: PathInput = parse_input(tool, call)?;
                fs::read_file(node, working_dir, &input.path).await
            }
            ToolName::WriteFile => {
                let input: WriteInput = parse_input(tool, call)?;
                fs::write_file(node, working_dir, &input.path, &input.content).await
            }
            ToolName::ListDirectory => {
                let input: ListInput = parse_input(tool, call)?;
                fs::list_directory(working_dir, &input.path).await
            }
            ToolName::RunShell => {
                let input: ShellInput = parse_input(tool, call)?;
                shell::run_shell(&input.command, working_dir, self.shell_timeout).await
            }
            ToolName::SpawnSubagent => Err(ToolError::InvalidInput {
                tool: tool.to_string(),
                message: "spawn requests are resolved by the scheduler".to_string(),
            }),
        }
    }
}
