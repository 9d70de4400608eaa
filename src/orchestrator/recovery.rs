use std::sync::Arc;

use crate::error::SiroccoError;
use crate::orchestrator::Orchestrator;
use crate::provider::DispatchMode;

/// What a recovery pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Poll sessions re-attached.
    pub resumed: usize,
    /// Tasks finalized as FAILED because no progress was possible.
    pub failed: usize,
    /// Tasks that already had a live session (repeat pass).
    pub skipped: usize,
}

impl Orchestrator {
    /// Re-attach polling to tasks left mid-flight by a prior process.
    ///
    /// Scans the durable store for PROCESSING records. A task whose adapter
    /// is synchronous-only, or whose submission never produced an external
    /// task id, cannot make further progress and is finalized as FAILED.
    /// Everything else gets a fresh poll session: the interval ladder and the
    /// overall timeout both restart from now rather than from the task's
    /// original creation time, so a resumed task is not declared failed the
    /// moment it comes back.
    ///
    /// Idempotent: a second pass never duplicates a live session. A store
    /// failure here propagates so startup halts instead of silently skipping
    /// recovery.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport, SiroccoError> {
        let in_flight = self.store().list_processing().await?;
        let mut report = RecoveryReport::default();

        for task in in_flight {
            let resolved = match self.registry().resolve(&task.model) {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(task_id = task.id, model = task.model, "cannot resume: {e}");
                    self.finalize_failed(&task.id, &format!("interrupted by restart: {}", e.user_message()))
                        .await?;
                    report.failed += 1;
                    continue;
                }
            };

            if resolved.adapter.mode() == DispatchMode::Synchronous {
                // A synchronous backend holds no job to poll; the in-flight
                // call died with the old process.
                self.finalize_failed(&task.id, "interrupted by restart").await?;
                report.failed += 1;
                continue;
            }

            let Some(external_task_id) = task.external_task_id.clone() else {
                // Crash landed between record creation and submission.
                self.finalize_failed(&task.id, "interrupted by restart before submission completed")
                    .await?;
                report.failed += 1;
                continue;
            };

            if self.spawn_session(
                &task.id,
                external_task_id,
                resolved.provider,
                resolved.adapter,
            ) {
                tracing::info!(task_id = task.id, model = task.model, "polling resumed");
                report.resumed += 1;
            } else {
                report.skipped += 1;
            }
        }

        tracing::info!(
            resumed = report.resumed,
            failed = report.failed,
            skipped = report.skipped,
            "recovery pass complete"
        );
        Ok(report)
    }
}
