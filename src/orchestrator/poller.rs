use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::provider::{PollReport, ProviderAdapter};

/// How one poll loop ended.
#[derive(Debug)]
pub(crate) enum PollVerdict {
    /// Backend reported success; result retrieval runs next.
    Done,
    /// Backend reported failure; carries its error text verbatim.
    Failed(String),
    /// Overall timeout elapsed and the final-chance check was not terminal.
    TimedOut { elapsed_ms: u64 },
    /// Cancelled between checks; no further backend calls were made.
    Cancelled { elapsed_ms: u64 },
}

/// Drive status checks for one external job until a terminal report, the
/// overall timeout, or cancellation.
///
/// Transient errors from a check are treated as "not yet terminal" and
/// retried at the next scheduled interval, never immediately. When the next
/// interval would cross the timeout boundary the loop sleeps out the
/// remainder and runs one last check, so a job that completed exactly at the
/// deadline is not discarded.
pub(crate) async fn run(
    adapter: &dyn ProviderAdapter,
    provider: &str,
    task_id: &str,
    external_task_id: &str,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> PollVerdict {
    // Measured on the tokio clock so sleeps and elapsed time agree.
    let start = Instant::now();
    let elapsed_ms = |start: Instant| start.elapsed().as_millis() as u64;

    let first_delay = config.initial_delay.min(config.overall_timeout);
    if sleep_or_cancel(first_delay, cancel).await {
        return PollVerdict::Cancelled {
            elapsed_ms: elapsed_ms(start),
        };
    }

    loop {
        if let Some(verdict) = check(adapter, provider, task_id, external_task_id).await {
            return verdict;
        }

        let elapsed = start.elapsed();
        let interval = config.interval_after(elapsed);
        let remaining = config.overall_timeout.saturating_sub(elapsed);

        if remaining <= interval {
            // Timeout boundary: sleep out the remainder, then one last check.
            if sleep_or_cancel(remaining, cancel).await {
                return PollVerdict::Cancelled {
                    elapsed_ms: elapsed_ms(start),
                };
            }
            return match check(adapter, provider, task_id, external_task_id).await {
                Some(verdict) => verdict,
                None => PollVerdict::TimedOut {
                    elapsed_ms: elapsed_ms(start),
                },
            };
        }

        if sleep_or_cancel(interval, cancel).await {
            return PollVerdict::Cancelled {
                elapsed_ms: elapsed_ms(start),
            };
        }
    }
}

/// One status check. Returns a verdict for terminal reports, None when the
/// job is still running or the check failed transiently.
async fn check(
    adapter: &dyn ProviderAdapter,
    provider: &str,
    task_id: &str,
    external_task_id: &str,
) -> Option<PollVerdict> {
    match adapter.poll_status(external_task_id).await {
        Ok(PollReport::Done) => Some(PollVerdict::Done),
        Ok(PollReport::Failed(message)) => Some(PollVerdict::Failed(message)),
        Ok(PollReport::InProgress) => {
            tracing::debug!(
                task_id = task_id,
                provider = provider,
                external_id = external_task_id,
                "job still in progress"
            );
            None
        }
        Err(e) => {
            tracing::warn!(
                task_id = task_id,
                provider = provider,
                external_id = external_task_id,
                transient = e.is_transient(),
                "status check failed, retrying at next interval: {e}"
            );
            None
        }
    }
}

/// Sleep, waking early on cancellation. Returns true if cancelled.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
