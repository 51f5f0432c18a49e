use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which remote AI family handles analysis and generation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    Doubao,
    OpenAi,
}

impl Default for AiProviderKind {
    fn default() -> Self {
        AiProviderKind::Doubao
    }
}

/// Named prompt profile selecting the commentary style. Orthogonal to the
/// provider selection.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InspirationPersona {
    Assistant,
    Photographer,
    Poet,
    Translator,
    Encyclopedia,
    Storyteller,
    HealthCoach,
    MenuGuide,
}

impl InspirationPersona {
    pub const ALL: [InspirationPersona; 8] = [
        InspirationPersona::Assistant,
        InspirationPersona::Photographer,
        InspirationPersona::Poet,
        InspirationPersona::Translator,
        InspirationPersona::Encyclopedia,
        InspirationPersona::Storyteller,
        InspirationPersona::HealthCoach,
        InspirationPersona::MenuGuide,
    ];

    pub fn label(self) -> &'static str {
        match self {
            InspirationPersona::Assistant => "assistant",
            InspirationPersona::Photographer => "photographer",
            InspirationPersona::Poet => "poet",
            InspirationPersona::Translator => "translator",
            InspirationPersona::Encyclopedia => "encyclopedia",
            InspirationPersona::Storyteller => "storyteller",
            InspirationPersona::HealthCoach => "health_coach",
            InspirationPersona::MenuGuide => "menu_guide",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        InspirationPersona::ALL
            .into_iter()
            .find(|p| p.label() == label)
    }
}

/// Live state of the single-flight inspiration run. Exactly one of these is
/// current per orchestrator; transitions are monotonic within one run and
/// reset to `Idle` only by cancellation or a new trigger.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InspirationState {
    Idle,
    Capturing,
    Thinking,
    Reasoning { text: String },
    Streaming { text: String },
    Finished { text: String, latency_ms: u64 },
    Error { message: String },
}

impl InspirationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, InspirationState::Idle)
    }

    /// Final commentary, present only once the run finished successfully.
    pub fn finished_text(&self) -> Option<&str> {
        match self {
            InspirationState::Finished { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// One frozen analysis invocation: the frames to look at, the persona
/// prompt, and per-run options. Never shared across runs.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub images: Vec<Vec<u8>>,
    pub prompt: String,
    pub options: AnalysisOptions,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOptions {
    /// Ask the provider for a visible reasoning phase before the answer
    /// (Doubao "thinking"). Ignored by providers without one.
    pub deep_thinking: bool,
}

/// What a long-running generation job produces.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ImageEdit,
    VideoGeneration,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ImageEdit => "image_edit",
            JobKind::VideoGeneration => "video_generation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image_edit" => Some(JobKind::ImageEdit),
            "video_generation" => Some(JobKind::VideoGeneration),
            _ => None,
        }
    }
}

/// Lifecycle of a generation job. Transitions are monotonic and acyclic:
/// `Pending -> Polling -> {Succeeded | Failed | TimedOut}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Polling,
    Succeeded { artifact_ref: String },
    Failed { reason: String },
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Polling => "polling",
            JobStatus::Succeeded { .. } => "succeeded",
            JobStatus::Failed { .. } => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// A long-running generation job owned by a capture record. The durable
/// fields (id, kind, record id, source ref, created_at, status) survive
/// restarts while the job is non-terminal.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    /// Provider-side task id for polled jobs; the record id for one-shot
    /// image edits.
    pub id: String,
    pub kind: JobKind,
    pub record_id: Uuid,
    /// Reference to the source image the job was started from.
    pub source_ref: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

/// One captured moment and everything the AI attached to it. The rust twin
/// of the app's photo-roll entry.
#[derive(Debug, Clone)]
pub struct CaptureRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub original_ref: String,
    pub edited_ref: Option<String>,
    pub video_ref: Option<String>,
    pub generated_video_ref: Option<String>,
    pub inspiration_text: Option<String>,
    pub inspiration_persona: Option<InspirationPersona>,
    pub video_analysis_text: Option<String>,
    pub video_script: Option<String>,
}

impl CaptureRecord {
    pub fn new(original_ref: String) -> Self {
        Self::with_id(Uuid::new_v4(), original_ref)
    }

    pub fn with_id(id: Uuid, original_ref: String) -> Self {
        CaptureRecord {
            id,
            created_at: Utc::now(),
            original_ref,
            edited_ref: None,
            video_ref: None,
            generated_video_ref: None,
            inspiration_text: None,
            inspiration_persona: None,
            video_analysis_text: None,
            video_script: None,
        }
    }
}
