//! `arbor status`: summarize a saved run.

use anyhow::{Context, Result};

use arbor::node::{Node, NodeState};
use arbor::tree::DecompositionTree;

use super::super::Cli;
use super::{preview, state_file, task_of};

pub fn cmd_status(cli: &Cli) -> Result<()> {
    let path = state_file(cli);
    if !path.exists() {
        println!("No run state at {}.", path.display());
        println!("Start one with 'arbor run <task>'.");
        return Ok(());
    }

    let tree = arbor::snapshot::load(&path)
        .with_context(|| format!("Failed to load run state from {}", path.display()))?;

    println!();
    println!("{}", console::style("Arbor Run Status").bold().cyan());
    println!("================");
    println!("State file: {}", path.display());

    let counts = tree.state_counts();
    let summary: Vec<String> = counts
        .iter()
        .map(|(state, count)| format!("{} {}", count, state))
        .collect();
    println!("Nodes:      {} ({})", tree.len(), summary.join(", "));
    println!();

    if let Some(root) = tree.root() {
        print_node(&tree, root, 0);
    }

    if tree.is_done() {
        let result = tree.root().and_then(|r| r.result.clone()).unwrap_or_default();
        println!();
        println!("{}", console::style("Result").bold().green());
        println!("{}", result);
    }
    println!();
    Ok(())
}

fn print_node(tree: &DecompositionTree, node: &Node, depth: usize) {
    let icon = match node.state {
        NodeState::Completed => console::style("✓").green(),
        NodeState::Running if !node.active_children.is_empty() => console::style("…").cyan(),
        NodeState::Running => console::style("▶").cyan(),
        NodeState::Ready => console::style("○").yellow(),
        NodeState::Failed => console::style("✗").red(),
    };
    let waiting = if node.active_children.is_empty() {
        String::new()
    } else {
        format!(" (waiting on {})", node.active_children.len())
    };
    println!(
        "{}{} {} {}{}",
        "  ".repeat(depth),
        icon,
        console::style(node.kind).bold(),
        preview(&task_of(node), 70),
        console::style(waiting).dim()
    );

    for child_id in &node.children_ids {
        if let Some(child) = tree.get(child_id) {
            print_node(tree, child, depth + 1);
        }
    }
}
