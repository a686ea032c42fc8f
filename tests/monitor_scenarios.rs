//! End-to-end poll cycles against an in-memory job store.
//!
//! The batch system, scheduler and active set are replaced by recording
//! fakes; fetching, partitioning and sampling run for real on a payload
//! written to a temporary directory.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use prediction_feedback::config::FeedbackConfig;
use prediction_feedback::dispatch::{ActiveSetDispatcher, SubjectAssignment};
use prediction_feedback::error::{DispatchError, ResultsError};
use prediction_feedback::monitor::{
    AdvanceError, BatchAdvancer, JobCompletionMonitor, MonitorError, MonitorScheduler,
    NewPredictionJob, PollOutcome, PredictionJob, PredictionJobStatus,
};
use prediction_feedback::results::{
    ExplorationSampler, PredictionResultsProcessor, ResultFetcher, ResultPayload, ResultSource,
};
use prediction_feedback::scheduler::QueueError;
use prediction_feedback::storage::{JobStore, SqliteJobStore};
use tempfile::TempDir;

const DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Advance(i64),
    Fetch(String),
    Schedule(i64, Duration),
    Dispatch(Vec<SubjectAssignment>),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

struct ScriptedAdvancer {
    status: PredictionJobStatus,
    results_url: Option<String>,
    log: EventLog,
}

#[async_trait]
impl BatchAdvancer for ScriptedAdvancer {
    async fn advance(&self, job: &PredictionJob) -> Result<PredictionJob, AdvanceError> {
        self.log.lock().unwrap().push(Event::Advance(job.id));
        let mut updated = job.clone();
        updated.status = self.status;
        if self.results_url.is_some() {
            updated.results_url = self.results_url.clone();
        }
        Ok(updated)
    }
}

struct RecordingScheduler {
    log: EventLog,
}

#[async_trait]
impl MonitorScheduler for RecordingScheduler {
    async fn schedule_after(
        &self,
        delay: Duration,
        prediction_job_id: i64,
    ) -> Result<(), QueueError> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Schedule(prediction_job_id, delay));
        Ok(())
    }
}

/// Logs each fetch, then reads the payload for real.
struct RecordingSource {
    inner: ResultFetcher,
    log: EventLog,
}

#[async_trait]
impl ResultSource for RecordingSource {
    async fn fetch(&self, location: &str) -> Result<ResultPayload, ResultsError> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Fetch(location.to_string()));
        self.inner.fetch(location).await
    }
}

struct RecordingDispatcher {
    log: EventLog,
    fail: bool,
}

#[async_trait]
impl ActiveSetDispatcher for RecordingDispatcher {
    async fn dispatch_bulk(&self, assignments: Vec<SubjectAssignment>) -> Result<(), DispatchError> {
        if self.fail {
            return Err(DispatchError::Enqueue("active set unavailable".to_string()));
        }
        self.log.lock().unwrap().push(Event::Dispatch(assignments));
        Ok(())
    }
}

struct Harness {
    store: Arc<SqliteJobStore>,
    log: EventLog,
    _dir: TempDir,
    results_url: String,
}

impl Harness {
    async fn new(payload: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results.json");
        std::fs::write(&path, payload).unwrap();

        Self {
            store: Arc::new(SqliteJobStore::open_in_memory().await.unwrap()),
            log: Arc::new(Mutex::new(Vec::new())),
            results_url: path.to_str().unwrap().to_string(),
            _dir: dir,
        }
    }

    async fn job_in(&self, status: PredictionJobStatus) -> PredictionJob {
        let mut job = self
            .store
            .create(NewPredictionJob::new("https://batch.example/jobs/1", "active-9"))
            .await
            .unwrap();
        job.status = status;
        self.store.save(&job).await.unwrap();
        job
    }

    fn monitor(&self, advanced_to: PredictionJobStatus, with_url: bool) -> JobCompletionMonitor {
        self.monitor_with(advanced_to, with_url, false)
    }

    fn monitor_with(
        &self,
        advanced_to: PredictionJobStatus,
        with_url: bool,
        failing_dispatch: bool,
    ) -> JobCompletionMonitor {
        let config = FeedbackConfig::default().with_randomisation_factor(0.5);
        let dispatcher = Arc::new(RecordingDispatcher {
            log: self.log.clone(),
            fail: failing_dispatch,
        });
        let processor = PredictionResultsProcessor::new(dispatcher, &config)
            .with_fetcher(RecordingSource {
                inner: ResultFetcher::new(),
                log: self.log.clone(),
            })
            .with_sampler(ExplorationSampler::new().with_seed(11));

        JobCompletionMonitor::new(
            self.store.clone(),
            Arc::new(ScriptedAdvancer {
                status: advanced_to,
                results_url: with_url.then(|| self.results_url.clone()),
                log: self.log.clone(),
            }),
            Arc::new(RecordingScheduler {
                log: self.log.clone(),
            }),
            Arc::new(processor),
            DELAY,
        )
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

const PAYLOAD: &str = r#"{"data": {"s1": 0.95, "s2": 0.5, "s3": 0.79, "s4": 0.81}}"#;

#[tokio::test]
async fn test_running_job_is_rescheduled_once() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Running, false);

    let outcome = monitor.poll(job.id).await.unwrap();

    assert!(matches!(outcome, PollOutcome::Rescheduled { delay, .. } if delay == DELAY));
    assert_eq!(
        harness.events(),
        vec![Event::Advance(job.id), Event::Schedule(job.id, DELAY)]
    );
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Running);
}

#[tokio::test]
async fn test_pending_job_moves_to_running_and_reschedules() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Pending).await;
    let monitor = harness.monitor(PredictionJobStatus::Running, false);

    monitor.poll(job.id).await.unwrap();

    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Running);
    assert_eq!(harness.events().len(), 2);
}

#[tokio::test]
async fn test_completed_job_dispatches_once_without_reschedule() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Completed, true);

    let outcome = monitor.poll(job.id).await.unwrap();

    let summary = match outcome {
        PollOutcome::Processed { summary, .. } => summary,
        other => panic!("expected processed, got {:?}", other),
    };
    assert_eq!(summary.confident, 2);
    assert_eq!(summary.uncertain, 2);
    assert_eq!(summary.sampled, 1);

    let events = harness.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], Event::Advance(job.id));
    assert_eq!(events[1], Event::Fetch(harness.results_url.clone()));
    assert_eq!(
        events[2],
        Event::Dispatch(vec![
            SubjectAssignment::new("s1", "active-9"),
            SubjectAssignment::new("s4", "active-9"),
        ])
    );
    match &events[3] {
        Event::Dispatch(sampled) => {
            assert_eq!(sampled.len(), 1);
            assert!(["s2", "s3"].contains(&sampled[0].subject_id.as_str()));
        }
        other => panic!("expected sampled dispatch, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, Event::Schedule(..))));

    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Completed);
    assert_eq!(stored.results_url.as_deref(), Some(harness.results_url.as_str()));
}

#[tokio::test]
async fn test_second_poll_of_completed_job_does_nothing() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Completed, true);

    monitor.poll(job.id).await.unwrap();
    let after_first = harness.events().len();

    let outcome = monitor.poll(job.id).await.unwrap();

    assert!(matches!(outcome, PollOutcome::AlreadyCompleted(_)));
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(outcome.job(), &stored);
    assert_eq!(stored.status, PredictionJobStatus::Completed);
    assert_eq!(harness.events().len(), after_first);
}

#[tokio::test]
async fn test_failed_job_keeps_polling() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Failed, false);

    let outcome = monitor.poll(job.id).await.unwrap();

    assert!(matches!(outcome, PollOutcome::Rescheduled { delay, .. } if delay == DELAY));
    assert_eq!(
        harness.events(),
        vec![Event::Advance(job.id), Event::Schedule(job.id, DELAY)]
    );
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Failed);

    let again = monitor.poll(job.id).await.unwrap();
    assert!(matches!(again, PollOutcome::Rescheduled { .. }));
    assert_eq!(harness.events().len(), 4);
}

#[tokio::test]
async fn test_resubmitted_failed_job_completes() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Failed).await;
    let monitor = harness.monitor(PredictionJobStatus::Completed, true);

    let outcome = monitor.poll(job.id).await.unwrap();

    assert!(matches!(outcome, PollOutcome::Processed { .. }));
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Completed);
}

#[tokio::test]
async fn test_completed_without_results_url_is_an_error() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Completed, false);

    let err = monitor.poll(job.id).await.unwrap_err();

    assert!(matches!(err, MonitorError::MissingResultsUrl(id) if id == job.id));
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Running);
}

#[tokio::test]
async fn test_backward_transition_is_rejected() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Pending, false);

    let err = monitor.poll(job.id).await.unwrap_err();

    assert!(matches!(err, MonitorError::InvalidTransition { .. }));
    assert_eq!(harness.events(), vec![Event::Advance(job.id)]);
}

#[tokio::test]
async fn test_pipeline_failure_leaves_job_retryable() {
    let harness = Harness::new(PAYLOAD).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let failing = harness.monitor_with(PredictionJobStatus::Completed, true, true);

    let err = failing.poll(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Results(ResultsError::Dispatch(_))
    ));
    let stored = harness.store.load(job.id).await.unwrap();
    assert_eq!(stored.status, PredictionJobStatus::Running);

    let healthy = harness.monitor(PredictionJobStatus::Completed, true);
    let outcome = healthy.poll(job.id).await.unwrap();
    assert!(matches!(outcome, PollOutcome::Processed { .. }));
}

#[tokio::test]
async fn test_malformed_payload_is_a_parse_error() {
    let harness = Harness::new(r#"{"data": {"s1": "high"}}"#).await;
    let job = harness.job_in(PredictionJobStatus::Running).await;
    let monitor = harness.monitor(PredictionJobStatus::Completed, true);

    let err = monitor.poll(job.id).await.unwrap_err();

    assert!(matches!(err, MonitorError::Results(ResultsError::Parse(_))));
    assert_eq!(
        harness
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Fetch(_)))
            .count(),
        1
    );
    assert!(!harness
        .events()
        .iter()
        .any(|e| matches!(e, Event::Dispatch(_))));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let harness = Harness::new(PAYLOAD).await;
    let monitor = harness.monitor(PredictionJobStatus::Running, false);

    let err = monitor.poll(12345).await.unwrap_err();

    assert!(matches!(err, MonitorError::Store(_)));
    assert!(harness.events().is_empty());
}
