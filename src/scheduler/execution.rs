//! One node turn: engine call, outcome interpretation, actions.
//!
//! An execution owns a private copy of its node for the whole turn. It never
//! touches the arena; the scheduler writes the returned node back.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::SchedulerSettings;
use crate::conversation::Message;
use crate::engine::{Engine, EngineRequest, Turn, Usage};
use crate::errors::SchedulerError;
use crate::marker;
use crate::node::Node;
use crate::spawn;
use crate::tools::schema::schemas_for;
use crate::tools::{ToolName, ToolRuntime};

/// Shared, read-only state for every execution of a run.
pub(crate) struct ExecutionContext {
    pub engine: Arc<dyn Engine>,
    pub settings: SchedulerSettings,
    pub tools: ToolRuntime,
    limiter: Semaphore,
    occupancy: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionContext {
    pub fn new(engine: Arc<dyn Engine>, settings: SchedulerSettings) -> Self {
        Self {
            tools: ToolRuntime::new(settings.shell_timeout),
            limiter: Semaphore::new(settings.max_concurrent),
            engine,
            settings,
            occupancy: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Most executions ever observed holding a slot at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Counts an execution as running while it holds a limiter slot.
struct Occupied<'a>(&'a AtomicUsize);

impl<'a> Occupied<'a> {
    fn enter(ctx: &'a ExecutionContext) -> Self {
        let now = ctx.occupancy.fetch_add(1, Ordering::SeqCst) + 1;
        ctx.peak.fetch_max(now, Ordering::SeqCst);
        Self(&ctx.occupancy)
    }
}

impl Drop for Occupied<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) enum Outcome {
    /// Direct answer with its extracted result.
    Completed(String),
    /// Answer lacked its marker; a corrective message was appended.
    FormatRetry(u32),
    /// Actions ran and no child was created.
    Continue,
    /// At least one child was created.
    Spawned(Vec<Node>),
}

#[derive(Debug)]
pub(crate) struct Execution {
    pub node: Node,
    pub outcome: Outcome,
    pub usage: Usage,
    pub tools_run: Vec<String>,
    pub spawn_errors: Vec<String>,
}

pub(crate) async fn execute(ctx: Arc<ExecutionContext>, mut node: Node) -> Result<Execution, SchedulerError> {
    let _permit = ctx
        .limiter
        .acquire()
        .await
        .map_err(|_| SchedulerError::LimiterClosed)?;
    let _occupied = Occupied::enter(&ctx);

    let kind = node.kind;
    let config = kind.config();
    let request = EngineRequest {
        system: node.conversation.system.clone(),
        model: ctx.settings.model_for(kind).to_string(),
        tools: schemas_for(config.tools),
        messages: node.conversation.messages.clone(),
    };
    debug!(
        node = %node.id,
        kind = %kind,
        engine = ctx.engine.name(),
        model = %request.model,
        "calling engine"
    );

    let response = ctx.engine.complete(request).await?;
    node.conversation
        .push(Message::assistant_turn(&response.text, &response.tool_calls));
    let turn = response.turn()?;

    let mut execution = Execution {
        node,
        outcome: Outcome::Continue,
        usage: response.usage,
        tools_run: Vec::new(),
        spawn_errors: Vec::new(),
    };

    execution.outcome = match turn {
        Turn::Answer(text) => interpret_answer(&mut execution.node, &text, ctx.settings.max_format_retries),
        Turn::Actions(calls) => {
            let node = &mut execution.node;
            let working_dir = node.resolved_dir(&ctx.settings.env_root);
            let mut children = Vec::new();

            for call in &calls {
                if call.name == ToolName::SpawnSubagent.as_str() {
                    match spawn::spawn_child(&ctx.settings.env_root, node, call).await {
                        Ok(child) => children.push(child),
                        Err(e) => {
                            let rendered = e.render();
                            debug!(node = %node.id, error = %e, "spawn rejected");
                            node.conversation.add_tool_result(call.id.clone(), rendered.clone());
                            execution.spawn_errors.push(rendered);
                        }
                    }
                } else {
                    let output = ctx.tools.run(call, node, &working_dir).await;
                    node.conversation.add_tool_result(call.id.clone(), output);
                    execution.tools_run.push(call.name.clone());
                }
            }

            if children.is_empty() {
                Outcome::Continue
            } else {
                Outcome::Spawned(children)
            }
        }
    };

    Ok(execution)
}

fn interpret_answer(node: &mut Node, text: &str, max_format_retries: u32) -> Outcome {
    let marker_name = node.kind.marker();
    match marker::extract(text, marker_name) {
        Ok(result) => Outcome::Completed(result),
        Err(e) if node.format_retries >= max_format_retries => {
            warn!(
                node = %node.id,
                retries = node.format_retries,
                error = %e,
                "answer still lacks result marker, accepting full text"
            );
            Outcome::Completed(text.trim().to_string())
        }
        Err(e) => {
            node.format_retries += 1;
            node.conversation.add_user(marker::reminder(marker_name));
            debug!(node = %node.id, attempt = node.format_retries, error = %e, "asking for marked answer");
            Outcome::FormatRetry(node.format_retries)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::NodeKind;

    #[test]
    fn marked_answer_completes() {
        let mut node = Node::root(NodeKind::Thinking, "t", ".");
        let outcome = interpret_answer(&mut node, "ok <MESSAGE> 42 </MESSAGE>", 2);
        assert!(matches!(outcome, Outcome::Completed(ref r) if r == "42"));
        assert_eq!(node.format_retries, 0);
    }

    #[test]
    fn unmarked_answer_retries_then_falls_back() {
        let mut node = Node::root(NodeKind::Code, "t", ".");
        let before = node.conversation.len();

        let first = interpret_answer(&mut node, "no tags", 2);
        assert!(matches!(first, Outcome::FormatRetry(1)));
        assert_eq!(node.conversation.len(), before + 1);

        let second = interpret_answer(&mut node, "still none", 2);
        assert!(matches!(second, Outcome::FormatRetry(2)));

        let third = interpret_answer(&mut node, "  final words  ", 2);
        assert!(matches!(third, Outcome::Completed(ref r) if r == "final words"));
    }

    #[test]
    fn zero_retries_accepts_immediately() {
        let mut node = Node::root(NodeKind::Code, "t", ".");
        let outcome = interpret_answer(&mut node, "plain", 0);
        assert!(matches!(outcome, Outcome::Completed(ref r) if r == "plain"));
    }

    #[test]
    fn occupancy_tracks_peak() {
        let ctx = ExecutionContext::new(
            Arc::new(crate::engine::ScriptedEngine::new()),
            SchedulerSettings::new("/tmp"),
        );
        {
            let _a = Occupied::enter(&ctx);
            let _b = Occupied::enter(&ctx);
            assert_eq!(ctx.occupancy.load(Ordering::SeqCst), 2);
        }
        let _c = Occupied::enter(&ctx);
        assert_eq!(ctx.peak(), 2);
    }
}
