//! The task orchestrator: tracks a generation request from submission to
//! terminal outcome, abstracting over synchronous and asynchronous backends.

mod poller;
mod recovery;
mod retrieval;

pub use recovery::RecoveryReport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PollConfig, RetrievalConfig};
use crate::error::SiroccoError;
use crate::notify::{NotificationDispatcher, TerminalEvent};
use crate::provider::registry::ProviderRegistry;
use crate::provider::{GenerationRequest, PollReport, ProviderAdapter, SubmitOutcome};
use crate::store::{TaskStore, UpdateOutcome};
use crate::task::{Artifact, GenerationTask, StatusFields, TaskStatus};

use poller::PollVerdict;

/// Max concurrent in-flight submissions to backends.
const MAX_CONCURRENT_SUBMITS: usize = 8;

/// A caller's generation request. `model` is a configured model name, not a
/// provider-side id.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub model: String,
    pub prompt: String,
    pub count: u32,
}

/// In-memory handle to one active poll loop. Never persisted: after a
/// restart, sessions are rebuilt by recovery from durable PROCESSING records.
struct PollSession {
    external_task_id: String,
    provider: String,
    started_at: Instant,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn TaskStore>,
    notifier: Arc<NotificationDispatcher>,
    poll: PollConfig,
    retrieval: RetrievalConfig,
    sessions: Mutex<HashMap<String, PollSession>>,
    submit_permits: Semaphore,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn TaskStore>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            poll: PollConfig::default(),
            retrieval: RetrievalConfig::default(),
            sessions: Mutex::new(HashMap::new()),
            submit_permits: Semaphore::new(MAX_CONCURRENT_SUBMITS),
        }
    }

    pub fn with_poll_config(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retrieval_config(mut self, retrieval: RetrievalConfig) -> Self {
        self.retrieval = retrieval;
        self
    }

    /// Submit a generation request. Registry failures surface as errors with
    /// no task created; everything after the record exists resolves into the
    /// record itself, so the returned task is always the latest durable state.
    pub async fn submit(
        self: &Arc<Self>,
        req: SubmitRequest,
    ) -> Result<GenerationTask, SiroccoError> {
        let resolved = self.registry.resolve(&req.model)?;
        let task = self.store.create(&req.model).await?;
        tracing::info!(
            task_id = task.id,
            model = req.model,
            provider = resolved.provider,
            "task created"
        );

        let provider_req = GenerationRequest {
            model: resolved.model_id.clone(),
            prompt: req.prompt.clone(),
            kind: resolved.kind,
            count: req.count.max(1),
        };

        let outcome = {
            let _permit = self
                .submit_permits
                .acquire()
                .await
                .map_err(|_| SiroccoError::Other("submit semaphore closed".to_string()))?;
            resolved.adapter.submit(&provider_req).await
        };

        match outcome {
            Err(e) => {
                tracing::warn!(
                    task_id = task.id,
                    provider = resolved.provider,
                    "submission failed: {e}"
                );
                self.finalize_failed(&task.id, &e.user_message()).await
            }
            Ok(SubmitOutcome::Completed(artifacts)) => {
                // Synchronous path: PENDING → PROCESSING → terminal within
                // this one logical operation.
                self.store
                    .update_status(&task.id, TaskStatus::Processing, StatusFields::default())
                    .await?;
                if artifacts.is_empty() {
                    return self
                        .finalize_failed(&task.id, "provider returned no artifacts")
                        .await;
                }
                self.store.record_artifacts(&task.id, &artifacts).await?;
                self.finalize_completed(&task.id, artifacts).await
            }
            Ok(SubmitOutcome::Accepted { external_task_id }) => {
                let updated = self
                    .store
                    .update_status(
                        &task.id,
                        TaskStatus::Processing,
                        StatusFields {
                            external_task_id: Some(external_task_id.clone()),
                            ..StatusFields::default()
                        },
                    )
                    .await?
                    .into_task();
                self.spawn_session(
                    &task.id,
                    external_task_id,
                    resolved.provider,
                    resolved.adapter,
                );
                Ok(updated)
            }
        }
    }

    /// Manual "check now": one out-of-band poll/fetch cycle applying the same
    /// state-machine rules as the scheduled loop. Used when the scheduled
    /// notification cannot be relied upon.
    pub async fn check_now(&self, task_id: &str) -> Result<GenerationTask, SiroccoError> {
        let task = self
            .store
            .get(task_id)
            .await?
            .ok_or_else(|| SiroccoError::TaskNotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(task);
        }
        let Some(external_task_id) = task.external_task_id.clone() else {
            return Err(SiroccoError::Other(format!(
                "task {task_id} has no external job to check"
            )));
        };
        let resolved = self.registry.resolve(&task.model)?;

        match resolved.adapter.poll_status(&external_task_id).await? {
            PollReport::InProgress => Ok(task),
            PollReport::Done => {
                let result = retrieval::fetch_with_retry(
                    resolved.adapter.as_ref(),
                    self.store.as_ref(),
                    task_id,
                    &external_task_id,
                    &self.retrieval,
                )
                .await;
                let finalized = match result {
                    Ok(artifacts) => self.finalize_completed(task_id, artifacts).await,
                    Err(e) => self.finalize_failed(task_id, &e.user_message()).await,
                };
                // The scheduled poller for this task, if any, is now redundant.
                self.cancel_session(task_id);
                finalized
            }
            PollReport::Failed(message) => {
                let finalized = self.finalize_failed(task_id, &message).await;
                self.cancel_session(task_id);
                finalized
            }
        }
    }

    /// Mark the task's poll session cancelled. The next scheduled wake-up
    /// observes the flag and exits without further backend calls, finalizing
    /// the task as FAILED with a "cancelled" reason. Returns false when no
    /// live session exists for the id.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.cancel_session(task_id)
    }

    /// Number of live poll sessions (for testing and introspection).
    pub fn active_sessions(&self) -> usize {
        self.sessions()
            .values()
            .filter(|s| !s.join.is_finished())
            .count()
    }

    /// Cancel every live session and wait for the workers to exit. Sessions
    /// are process-local bookkeeping; the durable records stay authoritative.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut sessions = self.sessions();
            sessions
                .drain()
                .map(|(_, session)| {
                    session.cancel.cancel();
                    session.join
                })
                .collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Start a poll loop for a PROCESSING task. Idempotent per task id:
    /// returns false without spawning when a live session already exists.
    pub(crate) fn spawn_session(
        self: &Arc<Self>,
        task_id: &str,
        external_task_id: String,
        provider: String,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> bool {
        let mut sessions = self.sessions();
        if sessions.get(task_id).is_some_and(|s| !s.join.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let join = tokio::spawn(Self::poll_task(
            self.clone(),
            task_id.to_string(),
            external_task_id.clone(),
            provider.clone(),
            adapter,
            cancel.clone(),
        ));
        sessions.insert(
            task_id.to_string(),
            PollSession {
                external_task_id,
                provider,
                started_at: Instant::now(),
                cancel,
                join,
            },
        );
        true
    }

    async fn poll_task(
        self: Arc<Self>,
        task_id: String,
        external_task_id: String,
        provider: String,
        adapter: Arc<dyn ProviderAdapter>,
        cancel: CancellationToken,
    ) {
        let verdict = poller::run(
            adapter.as_ref(),
            &provider,
            &task_id,
            &external_task_id,
            &self.poll,
            &cancel,
        )
        .await;

        let finalized = match verdict {
            PollVerdict::Done => {
                match retrieval::fetch_with_retry(
                    adapter.as_ref(),
                    self.store.as_ref(),
                    &task_id,
                    &external_task_id,
                    &self.retrieval,
                )
                .await
                {
                    Ok(artifacts) => self.finalize_completed(&task_id, artifacts).await,
                    Err(e) => self.finalize_failed(&task_id, &e.user_message()).await,
                }
            }
            PollVerdict::Failed(message) => self.finalize_failed(&task_id, &message).await,
            PollVerdict::TimedOut { elapsed_ms } => {
                let reason = SiroccoError::Timeout {
                    external_task_id,
                    elapsed_ms,
                };
                self.finalize_failed(&task_id, &reason.user_message()).await
            }
            PollVerdict::Cancelled { elapsed_ms } => {
                let reason = SiroccoError::Cancelled(elapsed_ms);
                self.finalize_failed(&task_id, &reason.user_message()).await
            }
        };

        if let Err(e) = finalized {
            tracing::error!(task_id = task_id, "failed to finalize task: {e}");
        }

        self.sessions().remove(&task_id);
    }

    /// Terminal-success write. The store rejects the write if another worker
    /// already finalized the task; only the winner emits the notification.
    pub(crate) async fn finalize_completed(
        &self,
        task_id: &str,
        artifacts: Vec<Artifact>,
    ) -> Result<GenerationTask, SiroccoError> {
        let outcome = self
            .store
            .update_status(
                task_id,
                TaskStatus::Completed,
                StatusFields {
                    artifacts: Some(artifacts),
                    ..StatusFields::default()
                },
            )
            .await?;
        self.notify_if_applied(task_id, outcome).await
    }

    pub(crate) async fn finalize_failed(
        &self,
        task_id: &str,
        message: &str,
    ) -> Result<GenerationTask, SiroccoError> {
        let outcome = self
            .store
            .update_status(
                task_id,
                TaskStatus::Failed,
                StatusFields {
                    error_message: Some(message.to_string()),
                    ..StatusFields::default()
                },
            )
            .await?;
        self.notify_if_applied(task_id, outcome).await
    }

    async fn notify_if_applied(
        &self,
        task_id: &str,
        outcome: UpdateOutcome,
    ) -> Result<GenerationTask, SiroccoError> {
        match outcome {
            UpdateOutcome::Applied(task) => {
                self.notifier.dispatch(TerminalEvent::from_task(&task)).await;
                Ok(task)
            }
            UpdateOutcome::AlreadyTerminal(task) => {
                tracing::debug!(
                    task_id = task_id,
                    status = ?task.status,
                    "terminal transition was a no-op, task already finalized"
                );
                Ok(task)
            }
        }
    }

    fn cancel_session(&self, task_id: &str) -> bool {
        match self.sessions().get(task_id) {
            Some(session) if !session.join.is_finished() => {
                tracing::info!(
                    task_id = task_id,
                    provider = session.provider,
                    external_id = session.external_task_id,
                    elapsed_ms = session.started_at.elapsed().as_millis() as u64,
                    "cancelling poll session"
                );
                session.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, PollSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &dyn TaskStore {
        self.store.as_ref()
    }

    pub(crate) fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }
}
