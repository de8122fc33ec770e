//! Deterministic engine that replays canned responses.
//!
//! Each script is keyed by a substring of a node's first user message (its
//! task). The response for a turn is picked by how many assistant turns the
//! node's conversation already holds, so a node's N-th call gets the N-th
//! scripted response no matter how executions interleave.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Engine, EngineRequest, EngineResponse};
use crate::conversation::{ContentBlock, Message, MessageContent, Role};
use crate::errors::EngineError;

#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Vec<(String, Vec<EngineResponse>)>,
    failures: Vec<String>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<EngineRequest>>,
}

/// Decrements the in-flight counter even if the call is aborted.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses for any node whose task contains `task_fragment`.
    pub fn script(mut self, task_fragment: impl Into<String>, responses: Vec<EngineResponse>) -> Self {
        self.scripts.push((task_fragment.into(), responses));
        self
    }

    /// Fail with an API error for any node whose task contains `task_fragment`.
    pub fn fail_on(mut self, task_fragment: impl Into<String>) -> Self {
        self.failures.push(task_fragment.into());
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<EngineRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn respond(&self, request: &EngineRequest) -> Result<EngineResponse, EngineError> {
        let task = first_user_text(&request.messages);

        if self.failures.iter().any(|f| task.contains(f.as_str())) {
            return Err(EngineError::Api {
                status: 500,
                message: format!("scripted failure for task: {}", task),
            });
        }

        let (_, responses) = self
            .scripts
            .iter()
            .find(|(fragment, _)| task.contains(fragment.as_str()))
            .ok_or_else(|| EngineError::Protocol(format!("no script matches task: {}", task)))?;

        let turn = request
            .messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        responses.get(turn).cloned().ok_or_else(|| {
            EngineError::Protocol(format!("script exhausted after {} turns for task: {}", turn, task))
        })
    }
}

fn first_user_text(messages: &[Message]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return String::new();
    };
    match &first.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn complete(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.respond(&request)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
