//! Camera orchestrator: the AI-facing slice of the camera view-model.
//!
//! Wires capture events to the inspiration controller, generation requests
//! to the job tracker, and terminal results back into local storage. The
//! wiring itself stays thin; all the hard state lives in the managers.

use crate::capture::{CaptureSource, NormalizedPoint};
use crate::error::AiError;
use crate::managers::analysis::{collect_analysis_text, InspirationController};
use crate::managers::jobs::{GenerationJobTracker, JobOutcome, JobStore, JobTrackerConfig};
use crate::models::{
    AnalysisOptions, CaptureRecord, InspirationPersona, InspirationState, JobKind, JobStatus,
};
use crate::providers::{make_provider, AiProvider};
use crate::settings::AppSettings;
use crate::store::{CaptureStore, MediaStore};
use anyhow::{anyhow, Result};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// User-facing failure notice. Cancelled analysis produces none of these.
#[derive(Debug, Clone)]
pub struct AppAlert {
    pub title: String,
    pub message: String,
}

pub struct CameraOrchestrator {
    settings: Mutex<AppSettings>,
    provider: Mutex<Arc<dyn AiProvider>>,
    capture: Arc<dyn CaptureSource>,
    controller: InspirationController,
    tracker: GenerationJobTracker,
    store: Arc<CaptureStore>,
    media: Arc<MediaStore>,
    alerts: broadcast::Sender<AppAlert>,
    persona: Mutex<InspirationPersona>,
    auto_inspiration: AtomicBool,
}

impl CameraOrchestrator {
    pub fn new(
        settings: AppSettings,
        capture: Arc<dyn CaptureSource>,
        store: Arc<CaptureStore>,
        media: Arc<MediaStore>,
        job_config: JobTrackerConfig,
    ) -> Arc<Self> {
        let provider = make_provider(&settings);
        let (tracker, outcome_rx) =
            GenerationJobTracker::new(store.clone() as Arc<dyn JobStore>, job_config);
        let (alerts, _) = broadcast::channel(32);
        let auto = settings.auto_inspiration_enabled;

        let orchestrator = Arc::new(CameraOrchestrator {
            settings: Mutex::new(settings),
            provider: Mutex::new(provider),
            capture: capture.clone(),
            controller: InspirationController::new(capture),
            tracker,
            store,
            media,
            alerts,
            persona: Mutex::new(InspirationPersona::Assistant),
            auto_inspiration: AtomicBool::new(auto),
        });

        let consumer = orchestrator.clone();
        tokio::spawn(async move {
            consumer.consume_outcomes(outcome_rx).await;
        });

        orchestrator
    }

    /// Swap in fresh settings and rebuild the provider client, picking up
    /// provider selection, keys and model changes.
    pub fn update_settings(&self, settings: AppSettings) {
        *self.provider.lock().unwrap() = make_provider(&settings);
        self.auto_inspiration
            .store(settings.auto_inspiration_enabled, Ordering::Relaxed);
        *self.settings.lock().unwrap() = settings;
    }

    /// Replace the provider client directly (custom endpoints, tests).
    pub fn set_provider(&self, provider: Arc<dyn AiProvider>) {
        *self.provider.lock().unwrap() = provider;
    }

    fn provider(&self) -> Arc<dyn AiProvider> {
        self.provider.lock().unwrap().clone()
    }

    fn settings(&self) -> AppSettings {
        self.settings.lock().unwrap().clone()
    }

    fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            deep_thinking: self.settings.lock().unwrap().deep_thinking_enabled,
        }
    }

    pub fn persona(&self) -> InspirationPersona {
        *self.persona.lock().unwrap()
    }

    /// Changing persona restarts the commentary in the new voice.
    pub fn set_persona(&self, persona: InspirationPersona) {
        let changed = {
            let mut current = self.persona.lock().unwrap();
            let changed = *current != persona;
            *current = persona;
            changed
        };
        if changed {
            self.trigger_inspiration();
        }
    }

    pub fn auto_inspiration_enabled(&self) -> bool {
        self.auto_inspiration.load(Ordering::Relaxed)
    }

    /// Enabling while idle kicks off a run; disabling cancels the live one
    /// without restarting.
    pub fn set_auto_inspiration(&self, enabled: bool) {
        self.auto_inspiration.store(enabled, Ordering::Relaxed);
        if enabled {
            if self.controller.state().is_idle() {
                self.trigger_inspiration();
            }
        } else {
            self.controller.cancel();
        }
    }

    pub fn inspiration_state(&self) -> InspirationState {
        self.controller.state()
    }

    pub fn subscribe_inspiration(&self) -> broadcast::Receiver<InspirationState> {
        self.controller.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AppAlert> {
        self.alerts.subscribe()
    }

    /// Start (or restart) the live commentary for the current persona.
    pub fn trigger_inspiration(&self) -> u64 {
        let prompt = self.settings().prompt_for(self.persona());
        self.controller
            .trigger(self.provider(), prompt, self.analysis_options())
    }

    /// Tap-to-focus: refocus the camera, then re-analyze with the marked
    /// frame. One single-flight run covers both.
    pub fn focus(&self, point: NormalizedPoint) -> u64 {
        let prompt = self.settings().prompt_for(self.persona());
        self.controller
            .trigger_with_focus(self.provider(), prompt, self.analysis_options(), point)
    }

    /// Cancel the live run; optionally restart when auto-inspiration is on.
    pub fn cancel_inspiration(&self, restart: bool) {
        self.controller.cancel();
        if restart && self.auto_inspiration_enabled() {
            self.trigger_inspiration();
        }
    }

    /// Persist the current frame as a capture record, attaching the
    /// finished commentary when there is one.
    pub fn capture_photo(&self) -> Result<CaptureRecord> {
        let frame = self
            .capture
            .current_frame()
            .ok_or_else(|| anyhow!("no frame available to capture"))?;

        let record_id = Uuid::new_v4();
        let original_ref = MediaStore::original_name(record_id);
        self.media.save(&original_ref, &frame)?;

        let mut record = CaptureRecord::with_id(record_id, original_ref);
        if let InspirationState::Finished { text, .. } = self.controller.state() {
            record.inspiration_text = Some(text);
            record.inspiration_persona = Some(self.persona());
        }
        self.store.insert_record(&record)?;
        info!("Captured record {}", record.id);
        Ok(record)
    }

    /// Kick off a stylized edit of a captured image. The result arrives
    /// through the job outcome loop.
    pub fn generate_edited_image(&self, record_id: Uuid) -> Result<()> {
        let record = self
            .store
            .get_record(record_id)?
            .ok_or_else(|| anyhow!("capture record {} not found", record_id))?;
        let source = self.media.read(&record.original_ref)?;
        let prompt = self.settings().image_edit_prompt;

        self.tracker.submit_image_edit(
            self.provider(),
            record_id,
            &record.original_ref,
            source,
            prompt,
        );
        Ok(())
    }

    /// Generate an AI video for a capture: first stream a one-line
    /// director script from the image, then submit the asynchronous video
    /// task with it. Returns the provider-side job id.
    pub async fn generate_video(&self, record_id: Uuid) -> Result<String> {
        let mut record = self
            .store
            .get_record(record_id)?
            .ok_or_else(|| anyhow!("capture record {} not found", record_id))?;

        // One video job per record at a time.
        let already_running = self
            .store
            .load_pending()?
            .iter()
            .any(|job| job.record_id == record_id);
        if already_running {
            return Err(anyhow!("a video job is already running for this capture"));
        }

        let source = self.media.read(&record.original_ref)?;
        let provider = self.provider();
        let settings = self.settings();

        let script = collect_analysis_text(
            provider.as_ref(),
            vec![source.clone()],
            settings.video_story_prompt,
            self.analysis_options(),
        )
        .await
        .map_err(|e| anyhow!("script drafting failed: {}", e))?;
        if script.trim().is_empty() {
            return Err(anyhow!("the model produced no usable script"));
        }

        record.video_script = Some(script.clone());
        self.store.update_record(&record)?;

        let job_id = self
            .tracker
            .submit_video(provider, record_id, &record.original_ref, &source, &script)
            .await?;
        Ok(job_id)
    }

    /// Multi-frame interpretation of a recorded clip, stored on the record.
    pub async fn analyze_video_frames(
        &self,
        record_id: Uuid,
        frames: Vec<Vec<u8>>,
    ) -> Result<String> {
        if frames.is_empty() {
            return Err(anyhow!("no frames extracted from the recording"));
        }
        let mut record = self
            .store
            .get_record(record_id)?
            .ok_or_else(|| anyhow!("capture record {} not found", record_id))?;

        let settings = self.settings();
        let persona = record.inspiration_persona.unwrap_or(self.persona());
        let prompt = format!(
            "These frames are consecutive moments of one recording. In the \
             voice set by '{}', read the whole sequence and tell its story.",
            settings.prompt_for(persona)
        );

        let text = collect_analysis_text(
            self.provider().as_ref(),
            frames,
            prompt,
            self.analysis_options(),
        )
        .await
        .map_err(|e| anyhow!("video interpretation failed: {}", e))?;

        record.video_analysis_text = Some(text.clone());
        self.store.update_record(&record)?;
        Ok(text)
    }

    /// Startup reconciliation: resume polling every durable job that was
    /// still in flight when the process last stopped.
    pub fn resume_pending_jobs(&self) -> Result<usize, AiError> {
        self.tracker.resume_pending(self.provider())
    }

    fn alert(&self, title: &str, message: String) {
        warn!("{}: {}", title, message);
        let _ = self.alerts.send(AppAlert {
            title: title.to_string(),
            message,
        });
    }

    async fn consume_outcomes(&self, mut rx: mpsc::UnboundedReceiver<JobOutcome>) {
        while let Some(outcome) = rx.recv().await {
            if let Err(e) = self.apply_outcome(outcome) {
                warn!("Failed to apply job outcome: {}", e);
            }
        }
    }

    fn apply_outcome(&self, outcome: JobOutcome) -> Result<()> {
        let job = outcome.job;
        let mut record = match self.store.get_record(job.record_id)? {
            Some(record) => record,
            None => {
                warn!(
                    "Job {} finished but record {} is gone",
                    job.id, job.record_id
                );
                return Ok(());
            }
        };

        match (&job.status, outcome.artifact) {
            (JobStatus::Succeeded { .. }, Some(bytes)) => {
                let name = match job.kind {
                    JobKind::ImageEdit => MediaStore::edited_name(job.record_id),
                    JobKind::VideoGeneration => MediaStore::generated_video_name(job.record_id),
                };
                self.media.save(&name, &bytes)?;
                match job.kind {
                    JobKind::ImageEdit => record.edited_ref = Some(name),
                    JobKind::VideoGeneration => record.generated_video_ref = Some(name),
                }
                self.store.update_record(&record)?;
                info!("Stored {} artifact for record {}", job.kind.as_str(), job.record_id);
            }
            (JobStatus::Failed { reason }, _) => {
                let title = match job.kind {
                    JobKind::ImageEdit => "Image edit failed",
                    JobKind::VideoGeneration => "Video generation failed",
                };
                self.alert(title, reason.clone());
            }
            (JobStatus::TimedOut, _) => {
                self.alert(
                    "Video generation timed out",
                    "the provider never reached a terminal status".to_string(),
                );
            }
            (status, _) => {
                warn!("Job {} reported non-terminal status {:?}", job.id, status);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::StillFrameSource;
    use crate::models::{AiProviderKind, AnalysisRequest, GenerationJob};
    use crate::providers::{AnalysisStream, StreamChunk, VideoJobStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Scripted provider covering the full generation flow: streamed
    /// script, image edit bytes, submit + poll for video.
    struct FlowProvider {
        streams: Mutex<VecDeque<Vec<Result<StreamChunk, AiError>>>>,
        edit_result: Mutex<Option<Result<Vec<u8>, AiError>>>,
        polls: Mutex<VecDeque<VideoJobStatus>>,
    }

    impl FlowProvider {
        fn new() -> Arc<Self> {
            Arc::new(FlowProvider {
                streams: Mutex::new(VecDeque::new()),
                edit_result: Mutex::new(None),
                polls: Mutex::new(VecDeque::new()),
            })
        }

        fn push_stream(&self, chunks: Vec<Result<StreamChunk, AiError>>) {
            self.streams.lock().unwrap().push_back(chunks);
        }

        fn set_edit_result(&self, result: Result<Vec<u8>, AiError>) {
            *self.edit_result.lock().unwrap() = Some(result);
        }

        fn push_poll(&self, status: VideoJobStatus) {
            self.polls.lock().unwrap().push_back(status);
        }
    }

    #[async_trait]
    impl AiProvider for FlowProvider {
        fn kind(&self) -> AiProviderKind {
            AiProviderKind::Doubao
        }

        async fn stream_analysis(
            &self,
            _request: AnalysisRequest,
        ) -> Result<AnalysisStream, AiError> {
            let chunks = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted stream left");
            Ok(AnalysisStream::from_chunks(chunks))
        }

        async fn generate_edited_image(
            &self,
            _image: &[u8],
            _prompt: &str,
        ) -> Result<Vec<u8>, AiError> {
            self.edit_result
                .lock()
                .unwrap()
                .take()
                .expect("no scripted edit result")
        }

        async fn submit_video_job(&self, _image: &[u8], _prompt: &str) -> Result<String, AiError> {
            Ok("video-task-1".to_string())
        }

        async fn poll_video_job(&self, job_id: &str) -> Result<VideoJobStatus, AiError> {
            let mut polls = self.polls.lock().unwrap();
            Ok(polls.pop_front().unwrap_or(VideoJobStatus {
                id: job_id.to_string(),
                status: "processing".to_string(),
                error_message: None,
                video_url: None,
            }))
        }

        async fn fetch_artifact(&self, _url: &str) -> Result<Vec<u8>, AiError> {
            Ok(b"generated-video".to_vec())
        }
    }

    fn test_orchestrator(provider: Arc<FlowProvider>) -> (Arc<CameraOrchestrator>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CaptureStore::open_in_memory().unwrap());
        let media = Arc::new(MediaStore::new(dir.path()));
        let capture = Arc::new(StillFrameSource::new(vec![vec![0xFF, 0xD8, 0xEE]]));
        let mut settings = AppSettings::default();
        settings.auto_inspiration_enabled = false;
        let orchestrator = CameraOrchestrator::new(
            settings,
            capture,
            store,
            media,
            JobTrackerConfig {
                poll_interval: Duration::from_millis(10),
                max_attempts: 10,
            },
        );
        orchestrator.set_provider(provider);
        (orchestrator, dir)
    }

    async fn wait_until<F: Fn() -> bool>(predicate: F) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_capture_photo_attaches_finished_inspiration() {
        let provider = FlowProvider::new();
        provider.push_stream(vec![
            Ok(StreamChunk::Content("golden hour".to_string())),
            Ok(StreamChunk::Done),
        ]);
        let (orchestrator, _dir) = test_orchestrator(provider);

        orchestrator.trigger_inspiration();
        wait_until(|| {
            matches!(
                orchestrator.inspiration_state(),
                InspirationState::Finished { .. }
            )
        })
        .await;

        let record = orchestrator.capture_photo().unwrap();
        assert_eq!(record.inspiration_text.as_deref(), Some("golden hour"));
        assert_eq!(record.inspiration_persona, Some(InspirationPersona::Assistant));
    }

    #[tokio::test]
    async fn test_capture_photo_without_inspiration_has_no_text() {
        let provider = FlowProvider::new();
        let (orchestrator, _dir) = test_orchestrator(provider);

        let record = orchestrator.capture_photo().unwrap();
        assert!(record.inspiration_text.is_none());
        let loaded = orchestrator.store.get_record(record.id).unwrap().unwrap();
        assert_eq!(loaded.original_ref, record.original_ref);
    }

    #[tokio::test]
    async fn test_generate_edited_image_stores_artifact() {
        let provider = FlowProvider::new();
        provider.set_edit_result(Ok(b"edited-bytes".to_vec()));
        let (orchestrator, _dir) = test_orchestrator(provider);

        let record = orchestrator.capture_photo().unwrap();
        orchestrator.generate_edited_image(record.id).unwrap();

        let store = orchestrator.store.clone();
        let id = record.id;
        wait_until(move || {
            store
                .get_record(id)
                .unwrap()
                .unwrap()
                .edited_ref
                .is_some()
        })
        .await;

        let loaded = orchestrator.store.get_record(record.id).unwrap().unwrap();
        let bytes = orchestrator
            .media
            .read(loaded.edited_ref.as_deref().unwrap())
            .unwrap();
        assert_eq!(bytes, b"edited-bytes");
    }

    #[tokio::test]
    async fn test_failed_edit_raises_an_alert() {
        let provider = FlowProvider::new();
        provider.set_edit_result(Err(AiError::Http {
            status: 429,
            message: "rate limited".to_string(),
        }));
        let (orchestrator, _dir) = test_orchestrator(provider);
        let mut alerts = orchestrator.subscribe_alerts();

        let record = orchestrator.capture_photo().unwrap();
        orchestrator.generate_edited_image(record.id).unwrap();

        let alert = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
            .await
            .expect("alert timed out")
            .unwrap();
        assert_eq!(alert.title, "Image edit failed");
        assert!(alert.message.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_generate_video_drafts_script_then_stores_artifact() {
        let provider = FlowProvider::new();
        // Script drafting stream, then a quick poll success.
        provider.push_stream(vec![
            Ok(StreamChunk::Content("a door opens at dawn".to_string())),
            Ok(StreamChunk::Done),
        ]);
        provider.push_poll(VideoJobStatus {
            id: "video-task-1".to_string(),
            status: "succeeded".to_string(),
            error_message: None,
            video_url: Some("https://cdn/video.mp4".to_string()),
        });
        let (orchestrator, _dir) = test_orchestrator(provider);

        let record = orchestrator.capture_photo().unwrap();
        let job_id = orchestrator.generate_video(record.id).await.unwrap();
        assert_eq!(job_id, "video-task-1");

        let store = orchestrator.store.clone();
        let id = record.id;
        wait_until(move || {
            store
                .get_record(id)
                .unwrap()
                .unwrap()
                .generated_video_ref
                .is_some()
        })
        .await;

        let loaded = orchestrator.store.get_record(record.id).unwrap().unwrap();
        assert_eq!(loaded.video_script.as_deref(), Some("a door opens at dawn"));
        let bytes = orchestrator
            .media
            .read(loaded.generated_video_ref.as_deref().unwrap())
            .unwrap();
        assert_eq!(bytes, b"generated-video");
    }

    #[tokio::test]
    async fn test_generate_video_rejects_an_empty_script() {
        let provider = FlowProvider::new();
        provider.push_stream(vec![Ok(StreamChunk::Done)]);
        let (orchestrator, _dir) = test_orchestrator(provider);

        let record = orchestrator.capture_photo().unwrap();
        let err = orchestrator.generate_video(record.id).await.unwrap_err();
        assert!(err.to_string().contains("no usable script"));
    }

    #[tokio::test]
    async fn test_resume_pending_jobs_completes_a_stored_job() {
        let provider = FlowProvider::new();
        provider.push_poll(VideoJobStatus {
            id: "stored-job".to_string(),
            status: "succeeded".to_string(),
            error_message: None,
            video_url: Some("https://cdn/video.mp4".to_string()),
        });
        let (orchestrator, _dir) = test_orchestrator(provider);

        let record = orchestrator.capture_photo().unwrap();
        orchestrator
            .store
            .save(&GenerationJob {
                id: "stored-job".to_string(),
                kind: JobKind::VideoGeneration,
                record_id: record.id,
                source_ref: record.original_ref.clone(),
                status: JobStatus::Polling,
                created_at: Utc::now(),
            })
            .unwrap();

        assert_eq!(orchestrator.resume_pending_jobs().unwrap(), 1);

        let store = orchestrator.store.clone();
        let id = record.id;
        wait_until(move || {
            store
                .get_record(id)
                .unwrap()
                .unwrap()
                .generated_video_ref
                .is_some()
        })
        .await;
        // Durable row cleared after the artifact landed.
        assert!(orchestrator.store.load_pending().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persona_change_retriggers_inspiration() {
        let provider = FlowProvider::new();
        provider.push_stream(vec![
            Ok(StreamChunk::Content("first".to_string())),
            Ok(StreamChunk::Done),
        ]);
        provider.push_stream(vec![
            Ok(StreamChunk::Content("second".to_string())),
            Ok(StreamChunk::Done),
        ]);
        let (orchestrator, _dir) = test_orchestrator(provider);

        orchestrator.trigger_inspiration();
        wait_until(|| {
            matches!(
                orchestrator.inspiration_state(),
                InspirationState::Finished { .. }
            )
        })
        .await;

        orchestrator.set_persona(InspirationPersona::Poet);
        wait_until(|| {
            matches!(
                orchestrator.inspiration_state(),
                InspirationState::Finished { ref text, .. } if text == "second"
            )
        })
        .await;

        // Setting the same persona again does not restart.
        orchestrator.set_persona(InspirationPersona::Poet);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            orchestrator.inspiration_state(),
            InspirationState::Finished { ref text, .. } if text == "second"
        ));
    }

    #[tokio::test]
    async fn test_disabling_auto_inspiration_cancels() {
        let provider = FlowProvider::new();
        let (orchestrator, _dir) = test_orchestrator(provider);

        orchestrator.set_auto_inspiration(false);
        assert_eq!(orchestrator.inspiration_state(), InspirationState::Idle);
    }
}
