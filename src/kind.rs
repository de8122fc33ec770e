//! The closed set of node kinds and their configuration table.
//!
//! Every kind fixes its model, system prompt, result marker, tool set and the
//! kinds it may spawn. Adding a kind means adding one arm to [`NodeKind::config`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::prompts;
use crate::tools::ToolName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Thinking,
    Code,
    Test,
    Synthesize,
}

/// One row of the kind table.
#[derive(Debug)]
pub struct KindConfig {
    pub model: &'static str,
    pub system_prompt: &'static str,
    pub marker: &'static str,
    pub tools: &'static [ToolName],
    pub may_spawn: &'static [NodeKind],
}

const THINKING: KindConfig = KindConfig {
    model: "claude-sonnet-4-6",
    system_prompt: prompts::THINKING,
    marker: "MESSAGE",
    tools: &[
        ToolName::SpawnSubagent,
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::ListDirectory,
        ToolName::RunShell,
    ],
    may_spawn: &[NodeKind::Thinking, NodeKind::Code, NodeKind::Synthesize],
};

const CODE: KindConfig = KindConfig {
    model: "claude-haiku-4-5",
    system_prompt: prompts::CODE,
    marker: "MESSAGE",
    tools: &[
        ToolName::ReadFile,
        ToolName::WriteFile,
        ToolName::ListDirectory,
        ToolName::RunShell,
        ToolName::SpawnSubagent,
    ],
    may_spawn: &[NodeKind::Test],
};

const TEST: KindConfig = KindConfig {
    model: "claude-haiku-4-5",
    system_prompt: prompts::TEST,
    marker: "MESSAGE",
    tools: &[ToolName::ReadFile, ToolName::RunShell],
    may_spawn: &[],
};

const SYNTHESIZE: KindConfig = KindConfig {
    model: "claude-sonnet-4-6",
    system_prompt: prompts::SYNTHESIZE,
    marker: "MESSAGE",
    tools: &[ToolName::ReadFile, ToolName::ListDirectory],
    may_spawn: &[],
};

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Thinking,
        NodeKind::Code,
        NodeKind::Test,
        NodeKind::Synthesize,
    ];

    pub fn config(self) -> &'static KindConfig {
        match self {
            NodeKind::Thinking => &THINKING,
            NodeKind::Code => &CODE,
            NodeKind::Test => &TEST,
            NodeKind::Synthesize => &SYNTHESIZE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Thinking => "thinking",
            NodeKind::Code => "code",
            NodeKind::Test => "test",
            NodeKind::Synthesize => "synthesize",
        }
    }

    pub fn marker(self) -> &'static str {
        self.config().marker
    }

    pub fn may_spawn(self, target: NodeKind) -> bool {
        self.config().may_spawn.contains(&target)
    }

    /// Whether `tool` is in this kind's tool set.
    pub fn exposes(self, tool: ToolName) -> bool {
        self.config().tools.contains(&tool)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| format!("unknown agent type '{}'", s))
    }
}
