use crate::config::RetrievalConfig;
use crate::error::SiroccoError;
use crate::provider::ProviderAdapter;
use crate::store::TaskStore;
use crate::task::Artifact;

/// Fetch the final artifact references after a backend reported success.
///
/// A "done" status does not guarantee the fetch call succeeds immediately, so
/// attempts are retried with bounded exponential backoff. Artifacts are
/// durably recorded before this returns, which both upholds the
/// artifacts-before-COMPLETED ordering and seeds the fallback: when every
/// attempt fails, artifacts a previous attempt managed to record are used
/// instead of failing outright.
pub(crate) async fn fetch_with_retry(
    adapter: &dyn ProviderAdapter,
    store: &dyn TaskStore,
    task_id: &str,
    external_task_id: &str,
    config: &RetrievalConfig,
) -> Result<Vec<Artifact>, SiroccoError> {
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        match adapter.fetch_result(external_task_id).await {
            Ok(artifacts) if !artifacts.is_empty() => {
                store.record_artifacts(task_id, &artifacts).await?;
                return Ok(artifacts);
            }
            Ok(_) => {
                tracing::warn!(
                    task_id = task_id,
                    external_id = external_task_id,
                    attempt = attempt,
                    "result fetch returned no artifacts"
                );
            }
            Err(e) => {
                tracing::warn!(
                    task_id = task_id,
                    external_id = external_task_id,
                    attempt = attempt,
                    "result fetch failed: {e}"
                );
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.backoff_after(attempt)).await;
        }
    }

    // A previous attempt (possibly before a crash) may have recorded
    // artifacts already; treat those as the result.
    let recorded = store
        .get(task_id)
        .await?
        .map(|task| task.artifacts)
        .unwrap_or_default();
    if !recorded.is_empty() {
        tracing::info!(
            task_id = task_id,
            external_id = external_task_id,
            artifact_count = recorded.len(),
            "using previously recorded artifacts after retrieval failures"
        );
        return Ok(recorded);
    }

    Err(SiroccoError::ResultRetrievalExhausted {
        external_task_id: external_task_id.to_string(),
        attempts,
    })
}
