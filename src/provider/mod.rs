pub mod minimax;
pub mod openai;
pub mod registry;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SiroccoError;
use crate::task::{Artifact, MediaKind};

/// Request handed to a provider adapter. `model` is the provider-side model
/// id, already substituted from the configured model name.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    pub kind: MediaKind,
    /// Number of artifacts requested. Backends that only produce one ignore it.
    pub count: u32,
}

/// Explicit capability tag: checked once at dispatch time, never inferred
/// from which optional methods happen to be implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// `submit` returns artifacts directly.
    Synchronous,
    /// `submit` returns an external task id; status must be polled.
    Asynchronous,
}

/// What a submit call produced.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Synchronous backend: artifacts are already at hand.
    Completed(Vec<Artifact>),
    /// Asynchronous backend accepted the job.
    Accepted { external_task_id: String },
}

/// Status reported by an asynchronous backend for one external job.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReport {
    /// Queued or still running.
    InProgress,
    /// Finished; the result can be fetched.
    Done,
    /// The backend gave up on the job; carries its error text verbatim.
    Failed(String),
}

/// The capability contract every backend integration satisfies.
///
/// `poll_status` and `fetch_result` are only meaningful for adapters that
/// report `DispatchMode::Asynchronous`; the defaults make a synchronous-only
/// adapter explicit about that.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable provider family name for logs and error messages.
    fn name(&self) -> &'static str;

    fn mode(&self) -> DispatchMode;

    async fn submit(&self, req: &GenerationRequest) -> Result<SubmitOutcome, SiroccoError>;

    async fn poll_status(&self, _external_task_id: &str) -> Result<PollReport, SiroccoError> {
        Err(SiroccoError::Other(format!(
            "{} does not support status polling",
            self.name()
        )))
    }

    /// Called once after `poll_status` reports `Done`.
    async fn fetch_result(&self, _external_task_id: &str) -> Result<Vec<Artifact>, SiroccoError> {
        Err(SiroccoError::Other(format!(
            "{} does not support result retrieval",
            self.name()
        )))
    }
}
