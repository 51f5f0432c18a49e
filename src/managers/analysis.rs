//! Inspiration Controller
//!
//! Owns the single-flight scene analysis state machine. Exactly one run is
//! live at a time; a new trigger supersedes the previous run before any new
//! state transition becomes observable, and a superseded run can never
//! mutate state again. Runs are identified by a monotonically increasing id
//! compared against the active id before every mutation.

use crate::capture::{CaptureSource, NormalizedPoint};
use crate::error::AiError;
use crate::models::{AnalysisOptions, AnalysisRequest, InspirationState};
use crate::providers::{AiProvider, StreamChunk};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const SILENT_RESULT_MESSAGE: &str = "inspiration fell silent";

// How long a run waits for the camera to produce its first frame before
// giving up with a precondition error.
const FRAME_WAIT_ATTEMPTS: u32 = 30;
const FRAME_WAIT_INTERVAL: Duration = Duration::from_millis(100);

struct ControllerInner {
    /// Monotonically increasing run id. Each trigger gets a unique id.
    next_run_id: AtomicU64,
    /// The run currently allowed to mutate state. Mutated only while
    /// `state` is held, so a superseded run can never write after the
    /// superseding run's first transition.
    active_run_id: AtomicU64,
    state: Mutex<InspirationState>,
    events: broadcast::Sender<InspirationState>,
    capture: Arc<dyn CaptureSource>,
}

impl ControllerInner {
    fn is_active(&self, run_id: u64) -> bool {
        self.active_run_id.load(Ordering::SeqCst) == run_id
    }

    /// Apply a state transition on behalf of a run. Fails (and leaves state
    /// untouched) when the run has been superseded or cancelled.
    fn apply(&self, run_id: u64, new_state: InspirationState) -> bool {
        let mut state = self.state.lock().unwrap();
        if self.active_run_id.load(Ordering::SeqCst) != run_id {
            debug!("Run {} is no longer active, dropping state update", run_id);
            return false;
        }
        *state = new_state.clone();
        let _ = self.events.send(new_state);
        true
    }
}

/// Single-flight driver for the live inspiration commentary.
#[derive(Clone)]
pub struct InspirationController {
    inner: Arc<ControllerInner>,
}

impl InspirationController {
    pub fn new(capture: Arc<dyn CaptureSource>) -> Self {
        let (events, _) = broadcast::channel(64);
        InspirationController {
            inner: Arc::new(ControllerInner {
                next_run_id: AtomicU64::new(1),
                active_run_id: AtomicU64::new(0),
                state: Mutex::new(InspirationState::Idle),
                events,
                capture,
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> InspirationState {
        self.inner.state.lock().unwrap().clone()
    }

    /// Subscribe to every state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<InspirationState> {
        self.inner.events.subscribe()
    }

    /// Start a new analysis run, superseding any live one. Returns the run
    /// id; completion is observed through the state feed.
    pub fn trigger(
        &self,
        provider: Arc<dyn AiProvider>,
        prompt: String,
        options: AnalysisOptions,
    ) -> u64 {
        self.start_run(provider, prompt, options, None)
    }

    /// Trigger variant that first asks the capture source to focus at a
    /// point; the focus delay belongs to the same single-flight run.
    pub fn trigger_with_focus(
        &self,
        provider: Arc<dyn AiProvider>,
        prompt: String,
        options: AnalysisOptions,
        point: NormalizedPoint,
    ) -> u64 {
        self.start_run(provider, prompt, options, Some(point))
    }

    /// Cancel the live run, if any, and return to `Idle` discarding all
    /// accumulated text. A no-op on an already idle controller.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock().unwrap();
        let previous = self.inner.active_run_id.swap(0, Ordering::SeqCst);
        if previous != 0 {
            info!("Cancelled inspiration run {}", previous);
        }
        if !state.is_idle() {
            *state = InspirationState::Idle;
            let _ = self.inner.events.send(InspirationState::Idle);
        }
    }

    fn start_run(
        &self,
        provider: Arc<dyn AiProvider>,
        prompt: String,
        options: AnalysisOptions,
        focus: Option<NormalizedPoint>,
    ) -> u64 {
        let run_id = self.inner.next_run_id.fetch_add(1, Ordering::SeqCst);

        // Supersede and publish the new run's first state in one critical
        // section so the old run can never write in between.
        {
            let mut state = self.inner.state.lock().unwrap();
            let previous = self.inner.active_run_id.swap(run_id, Ordering::SeqCst);
            if previous != 0 {
                warn!(
                    "Starting inspiration run {} while run {} was still live",
                    run_id, previous
                );
            }
            *state = InspirationState::Capturing;
            let _ = self.inner.events.send(InspirationState::Capturing);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            run_analysis(inner, run_id, provider, prompt, options, focus).await;
        });
        run_id
    }
}

async fn run_analysis(
    inner: Arc<ControllerInner>,
    run_id: u64,
    provider: Arc<dyn AiProvider>,
    prompt: String,
    options: AnalysisOptions,
    focus: Option<NormalizedPoint>,
) {
    if let Some(point) = focus {
        inner.capture.focus(point);
    }

    // Wait for the camera to deliver a frame; a fresh session needs a
    // moment before the first one lands.
    let mut waited = 0;
    let frame = loop {
        if let Some(frame) = inner.capture.current_frame() {
            break frame;
        }
        if waited >= FRAME_WAIT_ATTEMPTS {
            inner.apply(
                run_id,
                InspirationState::Error {
                    message: AiError::Precondition(
                        "no frame available from the camera yet".to_string(),
                    )
                    .to_string(),
                },
            );
            return;
        }
        tokio::time::sleep(FRAME_WAIT_INTERVAL).await;
        if !inner.is_active(run_id) {
            return;
        }
        waited += 1;
    };

    let request = AnalysisRequest {
        images: vec![frame],
        prompt,
        options,
    };

    if !inner.apply(run_id, InspirationState::Thinking) {
        return;
    }

    let started = Instant::now();
    let mut stream = match provider.stream_analysis(request).await {
        Ok(stream) => stream,
        Err(e) => {
            inner.apply(
                run_id,
                InspirationState::Error {
                    message: e.to_string(),
                },
            );
            return;
        }
    };
    if !inner.is_active(run_id) {
        return;
    }

    let mut latency_ms: Option<u64> = None;
    let mut reasoning = String::new();
    let mut content = String::new();
    let mut has_content = false;

    loop {
        let item = stream.next().await;
        // A superseded run must not touch state, no matter what arrived.
        if !inner.is_active(run_id) {
            return;
        }

        match item {
            None | Some(Ok(StreamChunk::Done)) => break,
            Some(Ok(StreamChunk::Reasoning(text))) => {
                latency_ms.get_or_insert_with(|| started.elapsed().as_millis() as u64);
                // The reasoning scratch-pad is only shown until content
                // starts; late reasoning chunks are dropped.
                if !has_content {
                    reasoning.push_str(&text);
                    if !inner.apply(
                        run_id,
                        InspirationState::Reasoning {
                            text: reasoning.clone(),
                        },
                    ) {
                        return;
                    }
                }
            }
            Some(Ok(StreamChunk::Content(text))) => {
                latency_ms.get_or_insert_with(|| started.elapsed().as_millis() as u64);
                if !has_content {
                    has_content = true;
                    reasoning.clear();
                }
                content.push_str(&text);
                if !inner.apply(
                    run_id,
                    InspirationState::Streaming {
                        text: content.clone(),
                    },
                ) {
                    return;
                }
            }
            Some(Err(e)) => {
                inner.apply(
                    run_id,
                    InspirationState::Error {
                        message: e.to_string(),
                    },
                );
                return;
            }
        }
    }

    if content.is_empty() {
        inner.apply(
            run_id,
            InspirationState::Error {
                message: SILENT_RESULT_MESSAGE.to_string(),
            },
        );
    } else {
        let latency_ms = latency_ms.unwrap_or_else(|| started.elapsed().as_millis() as u64);
        info!(
            "Inspiration run {} finished ({} chars, first byte after {}ms)",
            run_id,
            content.len(),
            latency_ms
        );
        inner.apply(
            run_id,
            InspirationState::Finished {
                text: content,
                latency_ms,
            },
        );
    }
}

/// Run one streamed analysis to completion and return the accumulated
/// content text, ignoring any reasoning phase. Used for multi-frame video
/// interpretation and script drafting, outside the single-flight machine.
pub async fn collect_analysis_text(
    provider: &dyn AiProvider,
    images: Vec<Vec<u8>>,
    prompt: String,
    options: AnalysisOptions,
) -> Result<String, AiError> {
    let mut stream = provider
        .stream_analysis(AnalysisRequest {
            images,
            prompt,
            options,
        })
        .await?;

    let mut text = String::new();
    while let Some(item) = stream.next().await {
        match item? {
            StreamChunk::Content(chunk) => text.push_str(&chunk),
            StreamChunk::Reasoning(_) => {}
            StreamChunk::Done => break,
        }
    }
    Ok(text)
}
