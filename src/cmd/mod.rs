//! CLI command implementations.
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `run`    | `Run`, `Resume`   |
//! | `status` | `Status`          |

pub mod run;
pub mod status;

pub use run::{cmd_resume, cmd_run};
pub use status::cmd_status;

use std::path::PathBuf;

use arbor::conversation::MessageContent;
use arbor::node::Node;

use super::Cli;

/// Snapshot path: `--state-file`, else `<env-dir>/state/tree.json`.
pub fn state_file(cli: &Cli) -> PathBuf {
    cli.state_file
        .clone()
        .unwrap_or_else(|| cli.env_dir.join("state").join("tree.json"))
}

/// The task a node was given, without the working-directory header.
pub fn task_of(node: &Node) -> String {
    let Some(first) = node.conversation.messages.first() else {
        return String::new();
    };
    let text = match &first.content {
        MessageContent::Text(text) => text.as_str(),
        MessageContent::Blocks(_) => "",
    };
    match text.split_once("\n\n") {
        Some((header, task)) if header.starts_with("[Working Directory:") => task.to_string(),
        _ => text.to_string(),
    }
}

/// First line of `text`, cut to `max` characters.
pub fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    } else {
        line.to_string()
    }
}
