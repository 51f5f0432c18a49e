use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "musecam", about = "musecam - AI camera companion")]
pub struct CliArgs {
    /// Image file(s) standing in for the live camera feed
    #[arg(long = "image", required = true, num_args = 1..)]
    pub images: Vec<PathBuf>,

    /// Persona voice for the commentary (assistant, photographer, poet,
    /// translator, encyclopedia, storyteller, health_coach, menu_guide)
    #[arg(long, default_value = "assistant")]
    pub persona: String,

    /// Provider override for this run: doubao or openai
    #[arg(long)]
    pub provider: Option<String>,

    /// Directory for settings, database and media (default: ./.musecam)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Ask the provider for a visible reasoning phase before the answer
    #[arg(long)]
    pub deep_thinking: bool,

    /// Capture the frame and generate a stylized edit of it
    #[arg(long)]
    pub edit: bool,

    /// Capture the frame and generate an AI video from it
    #[arg(long)]
    pub video: bool,

    /// When several images are given, also interpret them as one recording
    #[arg(long)]
    pub interpret_sequence: bool,

    /// Enable debug mode with verbose logging
    #[arg(long)]
    pub debug: bool,
}
