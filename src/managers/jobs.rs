//! Generation Job Tracker
//!
//! Drives long-running generation jobs to a terminal status. Video jobs are
//! provider-side tasks polled at a fixed interval up to an attempt ceiling;
//! image edits are a single synchronous request with no polling phase. At
//! most one loop runs per job id, durable fields are persisted through the
//! `JobStore` seam while a job is in flight, and jobs still polling when
//! the process stopped are resumed at startup with a fresh budget.

use crate::error::AiError;
use crate::models::{GenerationJob, JobKind, JobStatus};
use crate::providers::AiProvider;
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Durable store for in-flight jobs, keyed by job id and owned by a
/// capture record. Lives outside the tracker so restarts can reconcile.
pub trait JobStore: Send + Sync {
    fn load_pending(&self) -> Result<Vec<GenerationJob>, AiError>;
    fn save(&self, job: &GenerationJob) -> Result<(), AiError>;
    fn clear(&self, job_id: &str) -> Result<(), AiError>;
}

#[derive(Debug, Clone, Copy)]
pub struct JobTrackerConfig {
    /// Spacing between status polls.
    pub poll_interval: Duration,
    /// Poll ceiling before a job is declared timed out.
    pub max_attempts: u32,
}

impl Default for JobTrackerConfig {
    fn default() -> Self {
        JobTrackerConfig {
            poll_interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

/// Terminal report for one job. `artifact` carries the fetched bytes only
/// when the job succeeded.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: GenerationJob,
    pub artifact: Option<Vec<u8>>,
}

/// Owns the per-job poll loops and reports terminal outcomes over a
/// channel the orchestrator consumes.
#[derive(Clone)]
pub struct GenerationJobTracker {
    store: Arc<dyn JobStore>,
    config: JobTrackerConfig,
    active: Arc<Mutex<HashSet<String>>>,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
}

impl GenerationJobTracker {
    pub fn new(
        store: Arc<dyn JobStore>,
        config: JobTrackerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        (
            GenerationJobTracker {
                store,
                config,
                active: Arc::new(Mutex::new(HashSet::new())),
                outcome_tx,
            },
            outcome_rx,
        )
    }

    /// Submit a video generation task and start polling it. Returns the
    /// provider-side job id. Submitting an id that is already being polled
    /// is a no-op at the polling layer.
    pub async fn submit_video(
        &self,
        provider: Arc<dyn AiProvider>,
        record_id: Uuid,
        source_ref: &str,
        image: &[u8],
        prompt: &str,
    ) -> Result<String, AiError> {
        let job_id = provider.submit_video_job(image, prompt).await?;

        let job = GenerationJob {
            id: job_id.clone(),
            kind: JobKind::VideoGeneration,
            record_id,
            source_ref: source_ref.to_string(),
            status: JobStatus::Polling,
            created_at: Utc::now(),
        };
        self.store.save(&job)?;
        info!("Submitted video job {} for record {}", job_id, record_id);

        self.spawn_poll_loop(provider, job);
        Ok(job_id)
    }

    /// Run a one-shot image edit. No polling, no retry; the outcome lands
    /// on the same channel as polled jobs. The record id doubles as the
    /// job id since the provider keeps no server-side handle.
    pub fn submit_image_edit(
        &self,
        provider: Arc<dyn AiProvider>,
        record_id: Uuid,
        source_ref: &str,
        image: Vec<u8>,
        prompt: String,
    ) {
        let job = GenerationJob {
            id: record_id.to_string(),
            kind: JobKind::ImageEdit,
            record_id,
            source_ref: source_ref.to_string(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
        };

        if !self.claim(&job.id) {
            debug!("Image edit for record {} already running", record_id);
            return;
        }

        let tracker = self.clone();
        tokio::spawn(async move {
            let result = provider.generate_edited_image(&image, &prompt).await;
            let outcome = match result {
                Ok(bytes) => JobOutcome {
                    job: GenerationJob {
                        status: JobStatus::Succeeded {
                            artifact_ref: String::new(),
                        },
                        ..job
                    },
                    artifact: Some(bytes),
                },
                Err(e) => {
                    warn!("Image edit for record {} failed: {}", record_id, e);
                    JobOutcome {
                        job: GenerationJob {
                            status: JobStatus::Failed {
                                reason: e.to_string(),
                            },
                            ..job
                        },
                        artifact: None,
                    }
                }
            };
            tracker.release_and_report(outcome, false);
        });
    }

    /// Reconciliation pass at startup: re-enter the poll loop for every
    /// durable job that was still polling when the process stopped. Each
    /// resumed job gets a fresh attempt budget. Returns how many were
    /// resumed.
    pub fn resume_pending(&self, provider: Arc<dyn AiProvider>) -> Result<usize, AiError> {
        let pending = self.store.load_pending()?;
        let count = pending.len();
        for mut job in pending {
            info!("Resuming {} job {} from a previous session", job.kind.as_str(), job.id);
            job.status = JobStatus::Polling;
            self.store.save(&job)?;
            self.spawn_poll_loop(provider.clone(), job);
        }
        Ok(count)
    }

    /// Whether a poll loop is currently running for this job id.
    pub fn is_tracking(&self, job_id: &str) -> bool {
        self.active.lock().unwrap().contains(job_id)
    }

    fn claim(&self, job_id: &str) -> bool {
        self.active.lock().unwrap().insert(job_id.to_string())
    }

    fn release_and_report(&self, outcome: JobOutcome, clear_store: bool) {
        self.active.lock().unwrap().remove(&outcome.job.id);
        let job_id = outcome.job.id.clone();
        // An unbounded send only fails when the orchestrator is gone, in
        // which case the durable row is kept for the next session.
        if self.outcome_tx.send(outcome).is_err() {
            warn!("No outcome consumer for job {}, keeping durable state", job_id);
            return;
        }
        if clear_store {
            if let Err(e) = self.store.clear(&job_id) {
                warn!("Failed to clear durable state for job {}: {}", job_id, e);
            }
        }
    }

    fn spawn_poll_loop(&self, provider: Arc<dyn AiProvider>, job: GenerationJob) {
        if !self.claim(&job.id) {
            debug!("Job {} is already being polled, ignoring duplicate", job.id);
            return;
        }

        let tracker = self.clone();
        let config = self.config;
        tokio::spawn(async move {
            let result = poll_to_completion(provider.as_ref(), &job.id, config).await;
            let outcome = match result {
                Ok((artifact_ref, bytes)) => {
                    info!("Video job {} succeeded ({} bytes)", job.id, bytes.len());
                    JobOutcome {
                        job: GenerationJob {
                            status: JobStatus::Succeeded { artifact_ref },
                            ..job
                        },
                        artifact: Some(bytes),
                    }
                }
                Err(AiError::JobTimedOut) => {
                    warn!("Video job {} timed out", job.id);
                    JobOutcome {
                        job: GenerationJob {
                            status: JobStatus::TimedOut,
                            ..job
                        },
                        artifact: None,
                    }
                }
                Err(e) => {
                    warn!("Video job {} failed: {}", job.id, e);
                    JobOutcome {
                        job: GenerationJob {
                            status: JobStatus::Failed {
                                reason: e.to_string(),
                            },
                            ..job
                        },
                        artifact: None,
                    }
                }
            };
            tracker.release_and_report(outcome, true);
        });
    }
}

/// Poll one job until it reaches a terminal state or the attempt budget
/// runs out. Success requires both a terminal "succeeded" status and a
/// retrievable artifact; an unrecognized status fails fast instead of
/// burning the remaining budget.
async fn poll_to_completion(
    provider: &dyn AiProvider,
    job_id: &str,
    config: JobTrackerConfig,
) -> Result<(String, Vec<u8>), AiError> {
    for attempt in 0..config.max_attempts {
        let status = provider.poll_video_job(job_id).await?;

        match status.status.as_str() {
            "succeeded" => {
                let url = status.video_url.ok_or(AiError::MissingArtifact)?;
                let bytes = provider.fetch_artifact(&url).await?;
                return Ok((url, bytes));
            }
            "failed" => {
                let reason = status
                    .error_message
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(AiError::JobFailed(reason));
            }
            "processing" | "pending" => {
                debug!(
                    "Job {} still {} (attempt {}/{})",
                    job_id,
                    status.status,
                    attempt + 1,
                    config.max_attempts
                );
                if attempt + 1 < config.max_attempts {
                    tokio::time::sleep(config.poll_interval).await;
                }
            }
            other => return Err(AiError::UnknownStatus(other.to_string())),
        }
    }
    Err(AiError::JobTimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AiProviderKind, AnalysisRequest};
    use crate::providers::{AnalysisStream, VideoJobStatus};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[derive(Default)]
    struct MemoryJobStore {
        jobs: Mutex<HashMap<String, GenerationJob>>,
    }

    impl JobStore for MemoryJobStore {
        fn load_pending(&self) -> Result<Vec<GenerationJob>, AiError> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|job| !job.status.is_terminal())
                .cloned()
                .collect())
        }

        fn save(&self, job: &GenerationJob) -> Result<(), AiError> {
            self.jobs
                .lock()
                .unwrap()
                .insert(job.id.clone(), job.clone());
            Ok(())
        }

        fn clear(&self, job_id: &str) -> Result<(), AiError> {
            self.jobs.lock().unwrap().remove(job_id);
            Ok(())
        }
    }

    fn poll(status: &str, url: Option<&str>, error: Option<&str>) -> VideoJobStatus {
        VideoJobStatus {
            id: "job-1".to_string(),
            status: status.to_string(),
            error_message: error.map(str::to_string),
            video_url: url.map(str::to_string),
        }
    }

    /// Provider with a scripted poll sequence; the last entry repeats.
    struct PollingProvider {
        polls: Mutex<VecDeque<VideoJobStatus>>,
        poll_count: AtomicU32,
        poll_times: Mutex<Vec<Instant>>,
        artifact: Vec<u8>,
    }

    impl PollingProvider {
        fn new(polls: Vec<VideoJobStatus>) -> Arc<Self> {
            Arc::new(PollingProvider {
                polls: Mutex::new(polls.into()),
                poll_count: AtomicU32::new(0),
                poll_times: Mutex::new(Vec::new()),
                artifact: b"video-bytes".to_vec(),
            })
        }
    }

    #[async_trait]
    impl AiProvider for PollingProvider {
        fn kind(&self) -> AiProviderKind {
            AiProviderKind::Doubao
        }

        async fn stream_analysis(
            &self,
            _request: AnalysisRequest,
        ) -> Result<AnalysisStream, AiError> {
            Err(AiError::Unsupported("analysis"))
        }

        async fn generate_edited_image(
            &self,
            _image: &[u8],
            _prompt: &str,
        ) -> Result<Vec<u8>, AiError> {
            Ok(b"edited".to_vec())
        }

        async fn submit_video_job(&self, _image: &[u8], _prompt: &str) -> Result<String, AiError> {
            Ok("job-1".to_string())
        }

        async fn poll_video_job(&self, _job_id: &str) -> Result<VideoJobStatus, AiError> {
            self.poll_count.fetch_add(1, Ordering::SeqCst);
            self.poll_times.lock().unwrap().push(Instant::now());
            let mut polls = self.polls.lock().unwrap();
            if polls.len() > 1 {
                Ok(polls.pop_front().unwrap())
            } else {
                Ok(polls.front().cloned().expect("poll script is empty"))
            }
        }

        async fn fetch_artifact(&self, _url: &str) -> Result<Vec<u8>, AiError> {
            Ok(self.artifact.clone())
        }
    }

    fn quick_config(max_attempts: u32) -> JobTrackerConfig {
        JobTrackerConfig {
            poll_interval: Duration::from_millis(20),
            max_attempts,
        }
    }

    async fn next_outcome(rx: &mut mpsc::UnboundedReceiver<JobOutcome>) -> JobOutcome {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("outcome timed out")
            .expect("outcome channel closed")
    }

    #[tokio::test]
    async fn test_video_job_polls_to_success() {
        let provider = PollingProvider::new(vec![
            poll("pending", None, None),
            poll("processing", None, None),
            poll("succeeded", Some("https://cdn/v.mp4"), None),
        ]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store.clone(), quick_config(10));

        tracker
            .submit_video(provider.clone(), Uuid::new_v4(), "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(
            outcome.job.status,
            JobStatus::Succeeded {
                artifact_ref: "https://cdn/v.mp4".to_string()
            }
        );
        assert_eq!(outcome.artifact.as_deref(), Some(b"video-bytes".as_ref()));
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 3);

        // Polls are spaced by at least the configured interval.
        let times = provider.poll_times.lock().unwrap();
        for pair in times.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(20));
        }

        // The durable row is gone once the outcome was handed off.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.jobs.lock().unwrap().is_empty());
        assert!(!tracker.is_tracking("job-1"));
    }

    #[tokio::test]
    async fn test_video_job_times_out_at_the_attempt_ceiling() {
        let provider = PollingProvider::new(vec![poll("processing", None, None)]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store, quick_config(4));

        tracker
            .submit_video(provider.clone(), Uuid::new_v4(), "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.job.status, JobStatus::TimedOut);
        assert!(outcome.artifact.is_none());
        // Exactly the ceiling, and nothing after it.
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 4);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unknown_status_fails_fast() {
        let provider = PollingProvider::new(vec![poll("paused", None, None)]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store, quick_config(10));

        tracker
            .submit_video(provider.clone(), Uuid::new_v4(), "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        match outcome.job.status {
            JobStatus::Failed { reason } => assert!(reason.contains("paused")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeded_without_artifact_url_is_a_failure() {
        let provider = PollingProvider::new(vec![poll("succeeded", None, None)]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store, quick_config(10));

        tracker
            .submit_video(provider, Uuid::new_v4(), "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        match outcome.job.status {
            JobStatus::Failed { reason } => assert!(reason.contains("no artifact")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_status_carries_the_provider_reason() {
        let provider = PollingProvider::new(vec![poll("failed", None, Some("content policy"))]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store, quick_config(10));

        tracker
            .submit_video(provider, Uuid::new_v4(), "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        match outcome.job.status {
            JobStatus::Failed { reason } => assert!(reason.contains("content policy")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_a_no_op() {
        // A slow script keeps the first loop alive while the duplicate
        // arrives.
        let provider = PollingProvider::new(vec![
            poll("processing", None, None),
            poll("processing", None, None),
            poll("succeeded", Some("https://cdn/v.mp4"), None),
        ]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store, quick_config(10));

        let record = Uuid::new_v4();
        tracker
            .submit_video(provider.clone(), record, "orig.jpg", &[1], "story")
            .await
            .unwrap();
        tracker
            .submit_video(provider.clone(), record, "orig.jpg", &[1], "story")
            .await
            .unwrap();

        let outcome = next_outcome(&mut rx).await;
        assert!(matches!(outcome.job.status, JobStatus::Succeeded { .. }));

        // Only the first loop ever polled: three scripted polls, no more.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resume_pending_re_enters_the_poll_loop() {
        let store = Arc::new(MemoryJobStore::default());
        store
            .save(&GenerationJob {
                id: "job-1".to_string(),
                kind: JobKind::VideoGeneration,
                record_id: Uuid::new_v4(),
                source_ref: "orig.jpg".to_string(),
                status: JobStatus::Polling,
                created_at: Utc::now(),
            })
            .unwrap();

        let provider = PollingProvider::new(vec![
            poll("processing", None, None),
            poll("succeeded", Some("https://cdn/v.mp4"), None),
        ]);
        let (tracker, mut rx) = GenerationJobTracker::new(store.clone(), quick_config(10));

        let resumed = tracker.resume_pending(provider.clone()).unwrap();
        assert_eq!(resumed, 1);

        let outcome = next_outcome(&mut rx).await;
        assert!(matches!(outcome.job.status, JobStatus::Succeeded { .. }));
        // The resumed loop started from a fresh budget and ran its two
        // scripted polls.
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_not_resumed() {
        let store = Arc::new(MemoryJobStore::default());
        store
            .save(&GenerationJob {
                id: "done".to_string(),
                kind: JobKind::VideoGeneration,
                record_id: Uuid::new_v4(),
                source_ref: "orig.jpg".to_string(),
                status: JobStatus::TimedOut,
                created_at: Utc::now(),
            })
            .unwrap();

        let provider = PollingProvider::new(vec![poll("processing", None, None)]);
        let (tracker, _rx) = GenerationJobTracker::new(store, quick_config(10));
        assert_eq!(tracker.resume_pending(provider).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_image_edit_reports_bytes_without_polling() {
        let provider = PollingProvider::new(vec![poll("processing", None, None)]);
        let store = Arc::new(MemoryJobStore::default());
        let (tracker, mut rx) = GenerationJobTracker::new(store.clone(), quick_config(10));

        tracker.submit_image_edit(
            provider.clone(),
            Uuid::new_v4(),
            "orig.jpg",
            vec![1],
            "stylize".to_string(),
        );

        let outcome = next_outcome(&mut rx).await;
        assert_eq!(outcome.job.kind, JobKind::ImageEdit);
        assert!(matches!(outcome.job.status, JobStatus::Succeeded { .. }));
        assert_eq!(outcome.artifact.as_deref(), Some(b"edited".as_ref()));
        // One-shot: the status endpoint was never touched and nothing was
        // persisted.
        assert_eq!(provider.poll_count.load(Ordering::SeqCst), 0);
        assert!(store.jobs.lock().unwrap().is_empty());
    }
}
