//! Driving a tree to completion: `arbor run` and `arbor resume`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use arbor::config::ArborConfig;
use arbor::scheduler::{RunOutcome, Scheduler, SchedulerEvent};
use arbor::tree::DecompositionTree;

use super::super::Cli;
use super::{preview, state_file};

fn load_config(cli: &Cli, max_concurrent: Option<usize>) -> Result<ArborConfig> {
    let mut config = ArborConfig::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    let config = config.with_max_concurrent(max_concurrent);
    config.validate()?;
    Ok(config)
}

fn prepare_env_root(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create environment directory {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("Failed to resolve environment directory {}", dir.display()))
}

pub async fn cmd_run(cli: &Cli, task: &str, kind: &str, max_concurrent: Option<usize>) -> Result<()> {
    use arbor::kind::NodeKind;
    use arbor::node::Node;

    let config = load_config(cli, max_concurrent)?;
    let kind: NodeKind = kind.parse().map_err(anyhow::Error::msg)?;

    let state_path = state_file(cli);
    if state_path.exists() {
        anyhow::bail!(
            "A run already exists at {}. Use 'arbor resume' to continue it, or pass --state-file for a new one.",
            state_path.display()
        );
    }

    let env_root = prepare_env_root(&cli.env_dir)?;
    let tree = DecompositionTree::with_root(Node::root(kind, task, "."))?;

    println!(
        "{} {} agent on: {}",
        console::style("Starting").bold().cyan(),
        kind,
        preview(task, 80)
    );
    drive(config, env_root, &state_path, tree).await
}

pub async fn cmd_resume(cli: &Cli, max_concurrent: Option<usize>) -> Result<()> {
    let config = load_config(cli, max_concurrent)?;
    let state_path = state_file(cli);
    let mut tree = arbor::snapshot::load(&state_path)
        .with_context(|| format!("Failed to load run state from {}", state_path.display()))?;

    if tree.is_done() {
        let result = tree.root().and_then(|r| r.result.clone()).unwrap_or_default();
        println!("{}", console::style("Run already complete.").green());
        println!();
        println!("{}", result);
        return Ok(());
    }

    let recovered = tree.recover_interrupted();
    println!(
        "{} {} nodes ({} interrupted turns to redo)",
        console::style("Resuming").bold().cyan(),
        tree.len(),
        recovered.len()
    );

    let env_root = prepare_env_root(&cli.env_dir)?;
    drive(config, env_root, &state_path, tree).await
}

async fn drive(
    config: ArborConfig,
    env_root: PathBuf,
    state_path: &Path,
    tree: DecompositionTree,
) -> Result<()> {
    use arbor::engine::{AnthropicEngine, Engine};

    let engine = AnthropicEngine::from_config(&config.engine)
        .context("Reasoning engine is not available")?;
    let settings = config.scheduler_settings(env_root);
    tracing::info!(
        engine = engine.name(),
        max_concurrent = settings.max_concurrent,
        "engine ready"
    );

    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(rx));

    let mut scheduler = Scheduler::new(tree, Arc::new(engine), settings)?.with_event_channel(tx);
    arbor::snapshot::save(scheduler.tree(), state_path)
        .with_context(|| format!("Failed to write run state to {}", state_path.display()))?;

    let outcome = scheduler
        .run_until(async {
            // Without a signal handler there is nothing to wait for.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await;

    arbor::snapshot::save(scheduler.tree(), state_path)
        .with_context(|| format!("Failed to write run state to {}", state_path.display()))?;
    let stats = scheduler.stats();
    drop(scheduler);
    printer.await.ok();

    match outcome {
        Ok(RunOutcome::Completed { result }) => {
            println!();
            println!("{}", console::style("Result").bold().green());
            println!("{}", result);
            println!();
            println!(
                "{}",
                console::style(format!(
                    "{} executions, {} input / {} output tokens, peak concurrency {}",
                    stats.executions, stats.input_tokens, stats.output_tokens, stats.peak_concurrency
                ))
                .dim()
            );
            Ok(())
        }
        Ok(RunOutcome::Interrupted) => {
            println!();
            println!(
                "{} State saved to {}. Run 'arbor resume' to continue.",
                console::style("Interrupted.").yellow().bold(),
                state_path.display()
            );
            Ok(())
        }
        Err(e) => Err(e).with_context(|| {
            format!("Run failed; state saved to {}", state_path.display())
        }),
    }
}

async fn print_events(mut rx: mpsc::Receiver<SchedulerEvent>) {
    while let Some(event) = rx.recv().await {
        let short = |id: &arbor::node::NodeId| id.as_str().chars().take(8).collect::<String>();
        match event {
            SchedulerEvent::NodeStarted { node, kind } => {
                println!("  {} {} [{}]", console::style("▶").cyan(), kind, short(&node));
            }
            SchedulerEvent::ToolsExecuted { node, tools } => {
                println!(
                    "  {} [{}] {}",
                    console::style("⚙").dim(),
                    short(&node),
                    console::style(tools.join(", ")).dim()
                );
            }
            SchedulerEvent::ChildrenSpawned { parent, children } => {
                let kinds: Vec<String> = children.iter().map(|(_, k)| k.to_string()).collect();
                println!(
                    "  {} [{}] spawned {}",
                    console::style("⑂").magenta(),
                    short(&parent),
                    kinds.join(", ")
                );
            }
            SchedulerEvent::SpawnRejected { node, reason } => {
                println!(
                    "  {} [{}] {}",
                    console::style("✗").red(),
                    short(&node),
                    preview(&reason, 100)
                );
            }
            SchedulerEvent::NodeCompleted { node, kind, result } => {
                println!(
                    "  {} {} [{}] {}",
                    console::style("✓").green(),
                    kind,
                    short(&node),
                    console::style(preview(&result, 80)).dim()
                );
            }
            SchedulerEvent::NodeResumed { node } => {
                println!("  {} [{}] resumed", console::style("↺").cyan(), short(&node));
            }
            SchedulerEvent::FormatRetry { node, attempt } => {
                println!(
                    "  {} [{}] answer without result marker, retry {}",
                    console::style("⚠").yellow(),
                    short(&node),
                    attempt
                );
            }
        }
    }
}
