//! Bounded-concurrency scheduler for a decomposition tree.
//!
//! Each loop iteration launches an execution for every READY node, waits for
//! at least one to finish, folds every finished outcome back into the tree,
//! and repeats until every node is COMPLETED. A semaphore keeps at most
//! `max_concurrent` executions talking to the engine at once.
//!
//! Only this loop writes the arena. Executions get a private copy of their
//! node and hand it back with their outcome.

mod events;
mod execution;

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::engine::{Engine, Usage};
use crate::errors::SchedulerError;
use crate::kind::NodeKind;
use crate::tree::DecompositionTree;

pub use events::SchedulerEvent;
use execution::{Execution, ExecutionContext, Outcome};

/// Runtime settings of one scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Directory all node working directories are relative to.
    pub env_root: PathBuf,
    pub max_concurrent: usize,
    pub max_format_retries: u32,
    pub shell_timeout: Duration,
    /// Model per kind; missing kinds fall back to the kind table.
    pub models: BTreeMap<NodeKind, String>,
}

impl SchedulerSettings {
    pub fn new(env_root: impl Into<PathBuf>) -> Self {
        Self {
            env_root: env_root.into(),
            max_concurrent: 10,
            max_format_retries: 2,
            shell_timeout: Duration::from_secs(30),
            models: BTreeMap::new(),
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_max_format_retries(mut self, retries: u32) -> Self {
        self.max_format_retries = retries;
        self
    }

    pub fn with_shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    pub fn model_for(&self, kind: NodeKind) -> &str {
        self.models
            .get(&kind)
            .map(String::as_str)
            .unwrap_or(kind.config().model)
    }
}

/// How a run ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every node completed; `result` is the root's answer.
    Completed { result: String },
    /// The shutdown signal fired; in-flight nodes were abandoned RUNNING.
    Interrupted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub executions: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub peak_concurrency: usize,
}

pub struct Scheduler {
    tree: DecompositionTree,
    ctx: Arc<ExecutionContext>,
    event_tx: Option<mpsc::Sender<SchedulerEvent>>,
    executions: usize,
    usage: Usage,
}

impl Scheduler {
    pub fn new(
        tree: DecompositionTree,
        engine: Arc<dyn Engine>,
        settings: SchedulerSettings,
    ) -> Result<Self, SchedulerError> {
        if settings.max_concurrent == 0 {
            return Err(SchedulerError::ZeroConcurrency);
        }
        if tree.root_id().is_none() {
            return Err(SchedulerError::EmptyTree);
        }
        Ok(Self {
            tree,
            ctx: Arc::new(ExecutionContext::new(engine, settings)),
            event_tx: None,
            executions: 0,
            usage: Usage::default(),
        })
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn tree(&self) -> &DecompositionTree {
        &self.tree
    }

    pub fn into_tree(self) -> DecompositionTree {
        self.tree
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.ctx.settings
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            executions: self.executions,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            peak_concurrency: self.ctx.peak(),
        }
    }

    /// Drive the tree until every node completes.
    pub async fn run(&mut self) -> Result<RunOutcome, SchedulerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Drive the tree until every node completes or `shutdown` resolves.
    ///
    /// On shutdown every in-flight execution is aborted and its node is left
    /// RUNNING in the tree, to be reset by `recover_interrupted` on resume.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunOutcome, SchedulerError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut in_flight: JoinSet<Result<Execution, SchedulerError>> = JoinSet::new();

        loop {
            if self.tree.is_done() {
                let result = self
                    .tree
                    .root()
                    .and_then(|root| root.result.clone())
                    .unwrap_or_default();
                info!(executions = self.executions, nodes = self.tree.len(), "tree resolved");
                return Ok(RunOutcome::Completed { result });
            }

            self.launch_ready(&mut in_flight).await?;

            if in_flight.is_empty() {
                let unresolved = self.tree.unresolved();
                warn!(count = unresolved.len(), "scheduler stalled");
                return Err(SchedulerError::Stalled { unresolved });
            }

            let joined = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(in_flight = in_flight.len(), "shutdown requested, abandoning in-flight nodes");
                    in_flight.abort_all();
                    while in_flight.join_next().await.is_some() {}
                    return Ok(RunOutcome::Interrupted);
                }
                joined = in_flight.join_next() => joined,
            };

            if let Some(joined) = joined {
                self.apply_joined(joined).await?;
            }
            while let Some(joined) = in_flight.try_join_next() {
                self.apply_joined(joined).await?;
            }
        }
    }

    async fn launch_ready(
        &mut self,
        in_flight: &mut JoinSet<Result<Execution, SchedulerError>>,
    ) -> Result<(), SchedulerError> {
        for id in self.tree.ready_nodes() {
            let node = self.tree.mark_running(&id)?;
            debug!(node = %id, kind = %node.kind, "launching node");
            self.emit_event(SchedulerEvent::NodeStarted {
                node: id,
                kind: node.kind,
            })
            .await;
            in_flight.spawn(execution::execute(Arc::clone(&self.ctx), node));
        }
        Ok(())
    }

    async fn apply_joined(
        &mut self,
        joined: Result<Result<Execution, SchedulerError>, JoinError>,
    ) -> Result<(), SchedulerError> {
        let execution = joined.map_err(|e| SchedulerError::ExecutionPanicked(e.to_string()))??;
        self.apply(execution).await
    }

    /// Fold one finished execution back into the tree.
    async fn apply(&mut self, execution: Execution) -> Result<(), SchedulerError> {
        let Execution {
            node,
            outcome,
            usage,
            tools_run,
            spawn_errors,
        } = execution;
        let id = node.id.clone();
        let kind = node.kind;

        self.executions += 1;
        self.usage.add(usage);
        self.tree.put_back(node)?;

        if !tools_run.is_empty() {
            self.emit_event(SchedulerEvent::ToolsExecuted {
                node: id.clone(),
                tools: tools_run,
            })
            .await;
        }
        for reason in spawn_errors {
            self.emit_event(SchedulerEvent::SpawnRejected {
                node: id.clone(),
                reason,
            })
            .await;
        }

        match outcome {
            Outcome::Completed(result) => {
                self.tree.complete(&id, result.clone())?;
                self.tree.message_parent(&id, &result)?;
                info!(node = %id, kind = %kind, "node completed");
                self.emit_event(SchedulerEvent::NodeCompleted {
                    node: id.clone(),
                    kind,
                    result,
                })
                .await;
                if let Some(parent) = self.tree.sync_with_parent(&id)? {
                    self.emit_event(SchedulerEvent::NodeResumed { node: parent }).await;
                }
            }
            Outcome::FormatRetry(attempt) => {
                self.tree.mark_ready(&id)?;
                self.emit_event(SchedulerEvent::FormatRetry { node: id, attempt })
                    .await;
            }
            Outcome::Continue => {
                self.tree.mark_ready(&id)?;
            }
            Outcome::Spawned(children) => {
                let spawned: Vec<_> = children.iter().map(|c| (c.id.clone(), c.kind)).collect();
                info!(node = %id, children = spawned.len(), "node fanned out");
                self.tree.add_children(&id, children)?;
                self.emit_event(SchedulerEvent::ChildrenSpawned {
                    parent: id,
                    children: spawned,
                })
                .await;
            }
        }
        Ok(())
    }

    async fn emit_event(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}
