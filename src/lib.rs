pub mod capture;
pub mod cli;
pub mod error;
pub mod managers;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod settings;
pub mod store;

pub use error::AiError;
pub use models::{
    AiProviderKind, AnalysisOptions, AnalysisRequest, CaptureRecord, GenerationJob,
    InspirationPersona, InspirationState, JobKind, JobStatus,
};
pub use orchestrator::CameraOrchestrator;

use crate::capture::StillFrameSource;
use crate::cli::CliArgs;
use crate::managers::jobs::JobTrackerConfig;
use crate::models::InspirationState as State;
use crate::settings::{load_or_create_settings, SETTINGS_FILE_NAME};
use crate::store::{CaptureStore, MediaStore, DATABASE_FILE_NAME};
use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Headless driver: feed still images through the full pipeline the way
/// the camera app would, streaming the commentary to stdout and running
/// generation jobs to completion.
pub async fn run(args: CliArgs) -> Result<()> {
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(".musecam"));
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let mut settings = load_or_create_settings(&data_dir.join(SETTINGS_FILE_NAME));
    if let Some(provider) = &args.provider {
        settings.ai_provider = match provider.to_lowercase().as_str() {
            "doubao" => AiProviderKind::Doubao,
            "openai" => AiProviderKind::OpenAi,
            other => bail!("unknown provider \"{}\" (expected doubao or openai)", other),
        };
    }
    if args.deep_thinking {
        settings.deep_thinking_enabled = true;
    }
    // The CLI drives runs explicitly.
    settings.auto_inspiration_enabled = false;

    let persona = InspirationPersona::from_label(&args.persona).ok_or_else(|| {
        anyhow!(
            "unknown persona \"{}\" (expected one of: {})",
            args.persona,
            InspirationPersona::ALL
                .iter()
                .map(|p| p.label())
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;

    let mut frames = Vec::new();
    for path in &args.images {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
        frames.push(bytes);
    }

    let capture = Arc::new(StillFrameSource::new(frames.clone()));
    let store = Arc::new(CaptureStore::open(&data_dir.join(DATABASE_FILE_NAME))?);
    let media = Arc::new(MediaStore::new(data_dir.join("media")));

    let orchestrator = CameraOrchestrator::new(
        settings,
        capture,
        store.clone(),
        media,
        JobTrackerConfig::default(),
    );

    let resumed = orchestrator.resume_pending_jobs()?;
    if resumed > 0 {
        info!("Resumed {} generation job(s) from the last session", resumed);
    }

    // Subscribe before triggering so no transition is missed. Changing
    // the persona already starts a run; trigger explicitly otherwise.
    let mut states = orchestrator.subscribe_inspiration();
    orchestrator.set_persona(persona);
    if orchestrator.inspiration_state().is_idle() {
        orchestrator.trigger_inspiration();
    }
    render_inspiration(&mut states).await?;

    let record = orchestrator.capture_photo()?;
    println!("\ncaptured record {}", record.id);

    if args.interpret_sequence && frames.len() > 1 {
        println!("interpreting the {} frames as one recording...", frames.len());
        let story = orchestrator
            .analyze_video_frames(record.id, frames.clone())
            .await?;
        println!("{}", story);
    }

    if args.edit {
        println!("generating stylized edit...");
        let mut alerts = orchestrator.subscribe_alerts();
        orchestrator.generate_edited_image(record.id)?;
        wait_for_artifact(&mut alerts, &store, record.id, ArtifactKind::Edited).await?;
    }

    if args.video {
        println!("drafting script and submitting video generation...");
        let mut alerts = orchestrator.subscribe_alerts();
        let job_id = orchestrator.generate_video(record.id).await?;
        println!("video job {} submitted, polling...", job_id);
        wait_for_artifact(&mut alerts, &store, record.id, ArtifactKind::Video).await?;
    }

    Ok(())
}

/// Render inspiration state transitions until a terminal state lands.
async fn render_inspiration(
    states: &mut tokio::sync::broadcast::Receiver<InspirationState>,
) -> Result<()> {
    let mut printed = 0usize;
    let mut in_reasoning = false;
    let mut in_streaming = false;
    loop {
        let state = states.recv().await.context("state feed closed")?;
        match state {
            State::Capturing => println!("[capturing]"),
            State::Thinking => println!("[thinking]"),
            State::Reasoning { text } => {
                if !in_reasoning {
                    in_reasoning = true;
                    printed = 0;
                    print!("[reasoning] ");
                }
                print_tail(&text, &mut printed);
            }
            State::Streaming { text } => {
                if !in_streaming {
                    // Content starts; the reasoning scratch-pad is gone.
                    if in_reasoning {
                        println!();
                        in_reasoning = false;
                    }
                    in_streaming = true;
                    printed = 0;
                    print!("[inspiration] ");
                }
                print_tail(&text, &mut printed);
            }
            State::Finished { latency_ms, .. } => {
                println!("\n[finished] first byte after {}ms", latency_ms);
                return Ok(());
            }
            State::Error { message } => bail!("inspiration failed: {}", message),
            State::Idle => {}
        }
    }
}

/// Print only what was appended since the last event, so the growing text
/// renders as a live stream.
fn print_tail(text: &str, printed: &mut usize) {
    if *printed <= text.len() {
        print!("{}", &text[*printed..]);
        let _ = std::io::stdout().flush();
    }
    *printed = text.len();
}

enum ArtifactKind {
    Edited,
    Video,
}

/// Wait until the job outcome loop lands the artifact on the record, or an
/// alert reports the failure.
async fn wait_for_artifact(
    alerts: &mut tokio::sync::broadcast::Receiver<orchestrator::AppAlert>,
    store: &CaptureStore,
    record_id: Uuid,
    kind: ArtifactKind,
) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15 * 60);

    loop {
        if let Some(record) = store.get_record(record_id)? {
            let artifact = match kind {
                ArtifactKind::Edited => record.edited_ref,
                ArtifactKind::Video => record.generated_video_ref,
            };
            if let Some(name) = artifact {
                println!("artifact ready: {}", name);
                return Ok(());
            }
        }

        tokio::select! {
            alert = alerts.recv() => {
                if let Ok(alert) = alert {
                    bail!("{}: {}", alert.title, alert.message);
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(2)) => {}
        }

        if tokio::time::Instant::now() >= deadline {
            bail!("gave up waiting for the artifact");
        }
    }
}
