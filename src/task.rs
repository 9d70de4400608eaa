use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::SiroccoError;

/// Kind of media a model produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

/// Reference to one produced result (a hosted location, not the raw bytes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub url: String,
    pub kind: MediaKind,
}

/// Lifecycle status of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Request accepted, not yet dispatched to a backend.
    Pending,
    /// Dispatched, outcome pending.
    Processing,
    /// Terminal: at least one artifact produced.
    Completed,
    /// Terminal: no result will be produced.
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Legal transitions along PENDING → PROCESSING → {COMPLETED | FAILED}.
    /// PENDING → FAILED covers a submission the backend rejected outright.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

/// One generation request tracked by the orchestrator. The durable store
/// record is the single authoritative copy of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: String,
    pub model: String,
    pub status: TaskStatus,
    /// Set once an asynchronous backend accepts the job. None for
    /// synchronous backends or before submission completes.
    pub external_task_id: Option<String>,
    pub created_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub error_message: Option<String>,
    pub artifacts: Vec<Artifact>,
}

/// Optional fields applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    pub external_task_id: Option<String>,
    pub error_message: Option<String>,
    pub artifacts: Option<Vec<Artifact>>,
}

impl GenerationTask {
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            status: TaskStatus::Pending,
            external_task_id: None,
            created_at_ms: now_ms(),
            completed_at_ms: None,
            error_message: None,
            artifacts: Vec::new(),
        }
    }

    /// Apply a status transition plus its associated fields as one atomic
    /// mutation. Returns Ok(false) without touching the record when the task
    /// already reached a terminal state (idempotent no-op), Ok(true) when the
    /// transition was applied, and Err for transitions the state machine
    /// forbids outright.
    pub(crate) fn apply_update(
        &mut self,
        new_status: TaskStatus,
        fields: StatusFields,
        now_ms: u64,
    ) -> Result<bool, SiroccoError> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        if new_status != self.status && !self.status.can_transition_to(new_status) {
            return Err(SiroccoError::Store(format!(
                "illegal transition {:?} → {new_status:?} for task {}",
                self.status, self.id
            )));
        }
        if let Some(external) = &fields.external_task_id {
            match &self.external_task_id {
                Some(existing) if existing != external => {
                    return Err(SiroccoError::Store(format!(
                        "external task id already set for task {}",
                        self.id
                    )));
                }
                _ => self.external_task_id = Some(external.clone()),
            }
        }
        if let Some(artifacts) = fields.artifacts {
            self.artifacts = artifacts;
        }
        if let Some(message) = fields.error_message {
            self.error_message = Some(message);
        }
        if new_status == TaskStatus::Completed && self.artifacts.is_empty() {
            return Err(SiroccoError::Store(format!(
                "task {} cannot complete without artifacts",
                self.id
            )));
        }
        if new_status.is_terminal() {
            self.completed_at_ms = Some(now_ms);
        }
        self.status = new_status;
        Ok(true)
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
