//! End-to-end orchestrator tests over mock adapters and the in-memory store.
//! Covers the synchronous and asynchronous submit paths, poll scheduling,
//! result-retrieval fallback, timeouts, cancellation, and the exactly-once
//! notification contract.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sirocco::config::{Config, Credentials, LadderBand, PollConfig, RetrievalConfig};
use sirocco::error::SiroccoError;
use sirocco::notify::{NotificationDispatcher, NotificationSink, Outcome, TerminalEvent};
use sirocco::orchestrator::{Orchestrator, SubmitRequest};
use sirocco::provider::registry::ProviderRegistry;
use sirocco::provider::{
    DispatchMode, GenerationRequest, PollReport, ProviderAdapter, SubmitOutcome,
};
use sirocco::store::{MemoryStore, TaskStore};
use sirocco::task::{Artifact, GenerationTask, MediaKind, TaskStatus};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

enum SubmitScript {
    Sync(Vec<Artifact>),
    Async(String),
    Reject(String),
}

struct MockAdapter {
    mode: DispatchMode,
    submit_script: SubmitScript,
    poll_script: Mutex<VecDeque<Result<PollReport, String>>>,
    poll_calls: AtomicUsize,
    fetch_script: Mutex<VecDeque<Result<Vec<Artifact>, String>>>,
    fetch_calls: AtomicUsize,
}

impl MockAdapter {
    fn synchronous(artifacts: Vec<Artifact>) -> Arc<Self> {
        Arc::new(Self {
            mode: DispatchMode::Synchronous,
            submit_script: SubmitScript::Sync(artifacts),
            poll_script: Mutex::new(VecDeque::new()),
            poll_calls: AtomicUsize::new(0),
            fetch_script: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    fn asynchronous(
        external_id: &str,
        polls: Vec<Result<PollReport, String>>,
        fetches: Vec<Result<Vec<Artifact>, String>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            mode: DispatchMode::Asynchronous,
            submit_script: SubmitScript::Async(external_id.to_string()),
            poll_script: Mutex::new(polls.into()),
            poll_calls: AtomicUsize::new(0),
            fetch_script: Mutex::new(fetches.into()),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            mode: DispatchMode::Synchronous,
            submit_script: SubmitScript::Reject(message.to_string()),
            poll_script: Mutex::new(VecDeque::new()),
            poll_calls: AtomicUsize::new(0),
            fetch_script: Mutex::new(VecDeque::new()),
            fetch_calls: AtomicUsize::new(0),
        })
    }

    fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn mode(&self) -> DispatchMode {
        self.mode
    }

    async fn submit(&self, _req: &GenerationRequest) -> Result<SubmitOutcome, SiroccoError> {
        match &self.submit_script {
            SubmitScript::Sync(artifacts) => Ok(SubmitOutcome::Completed(artifacts.clone())),
            SubmitScript::Async(id) => Ok(SubmitOutcome::Accepted {
                external_task_id: id.clone(),
            }),
            SubmitScript::Reject(message) => Err(SiroccoError::SubmissionFailed {
                provider: "mock".to_string(),
                message: message.clone(),
            }),
        }
    }

    async fn poll_status(&self, _external_task_id: &str) -> Result<PollReport, SiroccoError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        // An empty script means the job just stays in progress.
        match self.poll_script.lock().unwrap().pop_front() {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(SiroccoError::Upstream {
                provider: "mock".to_string(),
                message,
                status: Some(500),
            }),
            None => Ok(PollReport::InProgress),
        }
    }

    async fn fetch_result(&self, _external_task_id: &str) -> Result<Vec<Artifact>, SiroccoError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        match self.fetch_script.lock().unwrap().pop_front() {
            Some(Ok(artifacts)) => Ok(artifacts),
            Some(Err(message)) => Err(SiroccoError::Upstream {
                provider: "mock".to_string(),
                message,
                status: Some(500),
            }),
            None => Err(SiroccoError::Upstream {
                provider: "mock".to_string(),
                message: "fetch script exhausted".to_string(),
                status: Some(500),
            }),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<TerminalEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<TerminalEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, event: &TerminalEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const MODEL: &str = "mock-model";

fn empty_config() -> Config {
    Config {
        models: HashMap::new(),
        credentials: Credentials::default(),
        poll: PollConfig::default(),
        retrieval: RetrievalConfig::default(),
    }
}

/// Short schedule so paused-clock tests advance quickly.
fn fast_poll() -> PollConfig {
    PollConfig {
        initial_delay: Duration::from_secs(1),
        ladder: vec![LadderBand {
            up_to: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }],
        tail_interval: Duration::from_secs(2),
        overall_timeout: Duration::from_secs(120),
    }
}

fn harness(
    adapter: Arc<MockAdapter>,
    poll: PollConfig,
) -> (Arc<Orchestrator>, Arc<MemoryStore>, Arc<RecordingSink>) {
    let mut registry = ProviderRegistry::from_config(&empty_config());
    registry.register_custom(MODEL, MediaKind::Image, adapter);

    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let notifier = Arc::new(NotificationDispatcher::new().with_sink(sink.clone()));
    let orchestrator = Arc::new(
        Orchestrator::new(Arc::new(registry), store.clone(), notifier).with_poll_config(poll),
    );
    (orchestrator, store, sink)
}

fn request(prompt: &str) -> SubmitRequest {
    SubmitRequest {
        model: MODEL.to_string(),
        prompt: prompt.to_string(),
        count: 1,
    }
}

fn art(name: &str) -> Artifact {
    Artifact {
        url: format!("https://cdn.example.com/{name}"),
        kind: MediaKind::Image,
    }
}

async fn wait_terminal(store: &MemoryStore, id: &str) -> GenerationTask {
    for _ in 0..100_000 {
        let task = store.get(id).await.unwrap().unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {id} never reached a terminal state");
}

// ---------------------------------------------------------------------------
// Synchronous path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_submit_completes_in_one_call() {
    let adapter = MockAdapter::synchronous(vec![art("a.png"), art("b.png")]);
    let (orchestrator, _store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("two cats")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.artifacts.len(), 2);
    assert_eq!(task.external_task_id, None);
    assert!(task.completed_at_ms.is_some());
    assert_eq!(adapter.poll_calls(), 0);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::Completed);
    assert_eq!(events[0].artifact_count, 2);
}

#[tokio::test]
async fn sync_submit_with_no_artifacts_fails() {
    let adapter = MockAdapter::synchronous(vec![]);
    let (orchestrator, _store, sink) = harness(adapter, fast_poll());

    let task = orchestrator.submit(request("nothing")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("provider returned no artifacts")
    );
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.events()[0].outcome, Outcome::Failed);
}

#[tokio::test]
async fn rejected_submission_finalizes_failed() {
    let adapter = MockAdapter::rejecting("quota exhausted");
    let (orchestrator, _store, sink) = harness(adapter, fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("submission rejected by mock: quota exhausted")
    );
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn unknown_model_is_an_error_and_creates_no_task() {
    let adapter = MockAdapter::synchronous(vec![art("a.png")]);
    let (orchestrator, store, sink) = harness(adapter, fast_poll());

    let err = orchestrator
        .submit(SubmitRequest {
            model: "no-such-model".to_string(),
            prompt: "x".to_string(),
            count: 1,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SiroccoError::UnknownModel { .. }));
    assert_eq!(store.task_count(), 0);
    assert!(sink.events().is_empty());
}

// ---------------------------------------------------------------------------
// Asynchronous path
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn async_submit_polls_until_done() {
    let adapter = MockAdapter::asynchronous(
        "ext-42",
        vec![
            Ok(PollReport::InProgress),
            Ok(PollReport::InProgress),
            Ok(PollReport::Done),
        ],
        vec![Ok(vec![art("clip.mp4")])],
    );
    let (orchestrator, store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("a storm at sea")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
    assert_eq!(task.external_task_id.as_deref(), Some("ext-42"));
    assert_eq!(orchestrator.active_sessions(), 1);

    let done = wait_terminal(&store, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.artifacts.len(), 1);
    assert_eq!(adapter.poll_calls(), 3);
    assert_eq!(adapter.fetch_calls(), 1);

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].outcome, Outcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn async_failure_carries_adapter_error_verbatim() {
    let adapter = MockAdapter::asynchronous(
        "ext-7",
        vec![Ok(PollReport::Failed("insufficient balance".to_string()))],
        vec![],
    );
    let (orchestrator, store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let done = wait_terminal(&store, &task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("insufficient balance"));
    assert_eq!(adapter.fetch_calls(), 0);
    assert_eq!(sink.events().len(), 1);
    assert_eq!(sink.events()[0].outcome, Outcome::Failed);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_errors_retry_at_the_next_interval() {
    // A failed status check is "not yet terminal", never a task failure:
    // the loop retries at its next scheduled wake-up and the job can still
    // complete normally.
    let adapter = MockAdapter::asynchronous(
        "ext-16",
        vec![Err("connection reset".to_string()), Ok(PollReport::Done)],
        vec![Ok(vec![art("clip.mp4")])],
    );
    let (orchestrator, store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let done = wait_terminal(&store, &task.id).await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.error_message.is_none());
    assert_eq!(
        adapter.poll_calls(),
        2,
        "the failed check is retried at the next interval"
    );

    let events = sink.events();
    assert_eq!(events.len(), 1, "no intermediate failure was published");
    assert_eq!(events[0].outcome, Outcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn retrieval_falls_back_to_recorded_artifacts() {
    // Every fetch attempt fails, but artifacts from a previous partial
    // attempt are already on the record.
    let adapter = MockAdapter::asynchronous(
        "ext-9",
        vec![Ok(PollReport::Done)],
        vec![
            Err("boom".to_string()),
            Err("boom".to_string()),
            Err("boom".to_string()),
        ],
    );
    let (orchestrator, store, _sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    store
        .record_artifacts(&task.id, &[art("part1.png"), art("part2.png")])
        .await
        .unwrap();

    let done = wait_terminal(&store, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.artifacts.len(), 2);
    assert_eq!(adapter.fetch_calls(), 3, "no retry past the configured bound");
}

#[tokio::test(start_paused = true)]
async fn retrieval_exhaustion_without_fallback_fails() {
    let adapter = MockAdapter::asynchronous(
        "ext-10",
        vec![Ok(PollReport::Done)],
        vec![
            Err("boom".to_string()),
            Err("boom".to_string()),
            Err("boom".to_string()),
        ],
    );
    let (orchestrator, store, _sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let done = wait_terminal(&store, &task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let message = done.error_message.unwrap();
    assert!(message.contains("ext-10"), "names the external id: {message}");
    assert!(message.contains('3'), "names the attempt count: {message}");
    assert_eq!(adapter.fetch_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn overall_timeout_fails_after_final_chance_check() {
    let adapter = MockAdapter::asynchronous("ext-11", vec![], vec![]);
    let poll = PollConfig {
        initial_delay: Duration::from_secs(1),
        ladder: vec![LadderBand {
            up_to: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }],
        tail_interval: Duration::from_secs(2),
        overall_timeout: Duration::from_secs(10),
    };
    let (orchestrator, store, sink) = harness(adapter.clone(), poll);

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let done = wait_terminal(&store, &task.id).await;

    assert_eq!(done.status, TaskStatus::Failed);
    let message = done.error_message.unwrap();
    assert!(message.contains("timed out"), "got: {message}");
    assert!(message.contains("ext-11"), "got: {message}");
    assert!(
        adapter.poll_calls() >= 2,
        "expected scheduled checks plus the final-chance check"
    );
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_observed_before_first_check() {
    let adapter = MockAdapter::asynchronous("ext-12", vec![], vec![]);
    let (orchestrator, store, _sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    assert!(orchestrator.cancel_task(&task.id));

    let done = wait_terminal(&store, &task.id).await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("cancelled"));
    assert_eq!(adapter.poll_calls(), 0, "no network call after cancellation");
}

#[tokio::test]
async fn cancel_task_without_session_is_false() {
    let adapter = MockAdapter::synchronous(vec![art("a.png")]);
    let (orchestrator, _store, _sink) = harness(adapter, fast_poll());
    assert!(!orchestrator.cancel_task("nonexistent"));
}

// ---------------------------------------------------------------------------
// check_now and terminal idempotence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn check_now_finalizes_out_of_band() {
    let adapter = MockAdapter::asynchronous(
        "ext-13",
        vec![Ok(PollReport::Done)],
        vec![Ok(vec![art("early.mp4")])],
    );
    let (orchestrator, store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    // The scheduled loop has not run yet (initial delay); check now.
    let checked = orchestrator.check_now(&task.id).await.unwrap();

    assert_eq!(checked.status, TaskStatus::Completed);
    assert_eq!(checked.artifacts.len(), 1);
    assert_eq!(sink.events().len(), 1);

    // The redundant session winds down without a second notification.
    let final_task = wait_terminal(&store, &task.id).await;
    assert_eq!(final_task.status, TaskStatus::Completed);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.events().len(), 1);
    assert_eq!(orchestrator.active_sessions(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_done_signal_is_a_noop() {
    let adapter = MockAdapter::asynchronous(
        "ext-14",
        vec![Ok(PollReport::InProgress), Ok(PollReport::Done)],
        vec![Ok(vec![art("clip.mp4")])],
    );
    let (orchestrator, store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let done = wait_terminal(&store, &task.id).await;
    assert_eq!(done.status, TaskStatus::Completed);

    // A duplicate completion signal (e.g. a replayed webhook) must neither
    // error nor re-notify nor touch the record.
    let polls_before = adapter.poll_calls();
    let again = orchestrator.check_now(&task.id).await.unwrap();
    assert_eq!(again, done);
    assert_eq!(adapter.poll_calls(), polls_before);
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn check_now_reports_in_progress_without_finalizing() {
    let adapter = MockAdapter::asynchronous("ext-15", vec![], vec![]);
    let (orchestrator, _store, sink) = harness(adapter.clone(), fast_poll());

    let task = orchestrator.submit(request("anything")).await.unwrap();
    let checked = orchestrator.check_now(&task.id).await.unwrap();

    assert_eq!(checked.status, TaskStatus::Processing);
    assert!(sink.events().is_empty());

    orchestrator.cancel_task(&task.id);
}

#[tokio::test]
async fn check_now_unknown_task_errors() {
    let adapter = MockAdapter::synchronous(vec![art("a.png")]);
    let (orchestrator, _store, _sink) = harness(adapter, fast_poll());
    let err = orchestrator.check_now("missing").await.unwrap_err();
    assert!(matches!(err, SiroccoError::TaskNotFound(_)));
}

// ---------------------------------------------------------------------------
// Schedule shapes
// ---------------------------------------------------------------------------

#[test]
fn interval_ladder_is_a_monotonic_step_function() {
    let poll = PollConfig::default();
    assert_eq!(poll.interval_after(Duration::ZERO), Duration::from_secs(10));
    assert_eq!(
        poll.interval_after(Duration::from_secs(59)),
        Duration::from_secs(10)
    );
    assert_eq!(
        poll.interval_after(Duration::from_secs(120)),
        Duration::from_secs(20)
    );
    assert_eq!(
        poll.interval_after(Duration::from_secs(300)),
        Duration::from_secs(45)
    );
    // Past the last band the tail interval repeats indefinitely.
    assert_eq!(
        poll.interval_after(Duration::from_secs(360)),
        Duration::from_secs(60)
    );
    assert_eq!(
        poll.interval_after(Duration::from_secs(3600)),
        Duration::from_secs(60)
    );
}

#[test]
fn retrieval_backoff_doubles_and_caps() {
    let retrieval = RetrievalConfig::default();
    assert_eq!(retrieval.backoff_after(1), Duration::from_secs(1));
    assert_eq!(retrieval.backoff_after(2), Duration::from_secs(2));
    assert_eq!(retrieval.backoff_after(3), Duration::from_secs(4));
    assert_eq!(retrieval.backoff_after(4), Duration::from_secs(5));
    assert_eq!(retrieval.backoff_after(10), Duration::from_secs(5));
}
