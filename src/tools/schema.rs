//! JSON input schemas advertised to the engine for each tool.

use serde::Serialize;
use serde_json::{Value, json};

use super::ToolName;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

impl ToolName {
    pub fn schema(self) -> ToolSchema {
        let (description, input_schema) = match self {
            ToolName::SpawnSubagent => (
                "Assign a subagent to complete a task. You can optionally specify a working directory for the subagent.",
                json!({
                    "type": "object",
                    "properties": {
                        "task": {"type": "string", "description": "Task you want completed."},
                        "agent_type": {
                            "type": "string",
                            "description": "Type of agent to spawn. Must be one of: thinking, code, test, synthesize."
                        },
                        "working_directory": {
                            "type": "string",
                            "description": "Optional working directory for the subagent, relative to yours. Created if missing; inherits yours when omitted."
                        }
                    },
                    "required": ["task", "agent_type"]
                }),
            ),
            ToolName::ReadFile => (
                "Read the contents of a file.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path to the file to read."}
                    },
                    "required": ["path"]
                }),
            ),
            ToolName::WriteFile => (
                "Write content to a file, creating it if it doesn't exist.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path to the file to write."},
                        "content": {"type": "string", "description": "Content to write to the file."}
                    },
                    "required": ["path", "content"]
                }),
            ),
            ToolName::ListDirectory => (
                "List the files and directories at a given path.",
                json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Directory path to list. Defaults to the working directory."}
                    }
                }),
            ),
            ToolName::RunShell => (
                "Run a shell command and return its output.",
                json!({
                    "type": "object",
                    "properties": {
                        "command": {"type": "string", "description": "Shell command to run."}
                    },
                    "required": ["command"]
                }),
            ),
        };

        ToolSchema {
            name: self.as_str(),
            description,
            input_schema,
        }
    }
}

/// Schemas for a kind's tool set, in table order.
pub fn schemas_for(tools: &[ToolName]) -> Vec<ToolSchema> {
    tools.iter().map(|t| t.schema()).collect()
}
