//! Terminal-event fan-out. The orchestrator emits exactly one event per task,
//! gated on winning the terminal store write; sinks are thin shims over the
//! actual delivery channels (subscriber push, batch messaging).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::task::{GenerationTask, TaskStatus, now_ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed,
}

/// The single event emitted when a task reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalEvent {
    pub task_id: String,
    pub outcome: Outcome,
    pub artifact_count: usize,
    pub error_message: Option<String>,
    pub timestamp_ms: u64,
}

impl TerminalEvent {
    pub fn from_task(task: &GenerationTask) -> Self {
        let outcome = if task.status == TaskStatus::Completed {
            Outcome::Completed
        } else {
            Outcome::Failed
        };
        Self {
            task_id: task.id.clone(),
            outcome,
            artifact_count: task.artifacts.len(),
            error_message: task.error_message.clone(),
            timestamp_ms: task.completed_at_ms.unwrap_or_else(now_ms),
        }
    }
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: &TerminalEvent);
}

/// Fans one event out to every registered sink.
#[derive(Default)]
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn dispatch(&self, event: TerminalEvent) {
        tracing::info!(
            task_id = event.task_id,
            outcome = ?event.outcome,
            artifact_count = event.artifact_count,
            "task reached terminal state"
        );
        for sink in &self.sinks {
            sink.publish(&event).await;
        }
    }
}

/// Default sink that writes events to the log stream.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, event: &TerminalEvent) {
        match event.outcome {
            Outcome::Completed => tracing::info!(
                task_id = event.task_id,
                artifact_count = event.artifact_count,
                "generation completed"
            ),
            Outcome::Failed => tracing::warn!(
                task_id = event.task_id,
                error = event.error_message.as_deref().unwrap_or("unknown"),
                "generation failed"
            ),
        }
    }
}
