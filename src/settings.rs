use crate::models::{AiProviderKind, InspirationPersona};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

// Environment variable names for base URL overrides
const DOUBAO_BASE_URL_ENV: &str = "MUSECAM_DOUBAO_BASE_URL";
const OPENAI_BASE_URL_ENV: &str = "MUSECAM_OPENAI_BASE_URL";

const DEFAULT_DOUBAO_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Get the effective base URL for a provider. Checks the environment
/// variable first so test servers and proxies can be swapped in at runtime.
/// This is called fresh on each invocation to pick up runtime changes.
pub fn effective_base_url(kind: AiProviderKind, settings: &AppSettings) -> String {
    let (env_name, configured) = match kind {
        AiProviderKind::Doubao => (DOUBAO_BASE_URL_ENV, &settings.doubao_base_url),
        AiProviderKind::OpenAi => (OPENAI_BASE_URL_ENV, &settings.openai_base_url),
    };

    if let Ok(env_url) = env::var(env_name) {
        let trimmed = env_url.trim();
        if !trimmed.is_empty() {
            debug!(
                "Using base URL from environment variable {}: {}",
                env_name, trimmed
            );
            return trimmed.trim_end_matches('/').to_string();
        }
    }
    configured.trim_end_matches('/').to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppSettings {
    #[serde(default)]
    pub ai_provider: AiProviderKind,
    #[serde(default)]
    pub doubao_api_key: String,
    #[serde(default)]
    pub openai_api_key: String,

    #[serde(default = "default_doubao_base_url")]
    pub doubao_base_url: String,
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    #[serde(default = "default_vlm_model")]
    pub vlm_model_id: String,
    #[serde(default = "default_openai_vlm_model")]
    pub openai_vlm_model_id: String,
    #[serde(default = "default_image_edit_model")]
    pub image_edit_model_id: String,
    #[serde(default = "default_openai_image_model")]
    pub openai_image_model_id: String,
    #[serde(default = "default_video_gen_model")]
    pub video_gen_model_id: String,

    /// Per-persona commentary prompts, keyed by persona label. Missing
    /// entries fall back to the built-in defaults.
    #[serde(default)]
    pub persona_prompts: HashMap<String, String>,
    #[serde(default = "default_image_edit_prompt")]
    pub image_edit_prompt: String,
    #[serde(default = "default_video_story_prompt")]
    pub video_story_prompt: String,

    #[serde(default)]
    pub deep_thinking_enabled: bool,
    #[serde(default = "default_auto_inspiration")]
    pub auto_inspiration_enabled: bool,
}

impl AppSettings {
    pub fn api_key(&self, kind: AiProviderKind) -> &str {
        match kind {
            AiProviderKind::Doubao => &self.doubao_api_key,
            AiProviderKind::OpenAi => &self.openai_api_key,
        }
    }

    /// Commentary prompt for a persona: the user's override if one is
    /// stored, else the built-in default.
    pub fn prompt_for(&self, persona: InspirationPersona) -> String {
        if let Some(custom) = self.persona_prompts.get(persona.label()) {
            if !custom.trim().is_empty() {
                return custom.clone();
            }
        }
        default_persona_prompt(persona)
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            ai_provider: AiProviderKind::default(),
            doubao_api_key: String::new(),
            openai_api_key: String::new(),
            doubao_base_url: default_doubao_base_url(),
            openai_base_url: default_openai_base_url(),
            vlm_model_id: default_vlm_model(),
            openai_vlm_model_id: default_openai_vlm_model(),
            image_edit_model_id: default_image_edit_model(),
            openai_image_model_id: default_openai_image_model(),
            video_gen_model_id: default_video_gen_model(),
            persona_prompts: HashMap::new(),
            image_edit_prompt: default_image_edit_prompt(),
            video_story_prompt: default_video_story_prompt(),
            deep_thinking_enabled: false,
            auto_inspiration_enabled: default_auto_inspiration(),
        }
    }
}

fn default_doubao_base_url() -> String {
    DEFAULT_DOUBAO_BASE_URL.to_string()
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.to_string()
}

fn default_vlm_model() -> String {
    "ep-20250719131318-27rck".to_string()
}

fn default_openai_vlm_model() -> String {
    "gpt-4o".to_string()
}

fn default_image_edit_model() -> String {
    "ep-20250725101032-2zcfj".to_string()
}

fn default_openai_image_model() -> String {
    "dall-e-3".to_string()
}

fn default_video_gen_model() -> String {
    "doubao-seedance-1-0-pro-250528".to_string()
}

fn default_auto_inspiration() -> bool {
    true
}

// The focus marker drawn onto the frame must steer the analysis without
// ever being mentioned back to the user.
const FOCUS_MARKER_INSTRUCTION: &str = "Your reply must read as a natural \
reaction to the whole scene. If a small translucent blue circle marker \
appears in the frame, treat its area as the focus of your analysis, but \
never mention the marker, the focus, or anything about coordinates in your \
reply.";

pub fn default_persona_prompt(persona: InspirationPersona) -> String {
    let body = match persona {
        InspirationPersona::Assistant => {
            "Your task: 1. Study the scene in front of you and read its \
             character, mood, or tension. 2. Pick the single expert voice \
             that fits it best (photographer, poet, translator, naturalist, \
             storyteller, health coach...). 3. Answer directly in that \
             voice, in Markdown."
        }
        InspirationPersona::Photographer => {
            "As a photographer with a poet's eye for light, give the single \
             most useful shooting or composition idea for the light, color \
             and framing in front of you. Use Markdown."
        }
        InspirationPersona::Poet => {
            "As a poet, turn the character and atmosphere of this scene \
             into a short poem. Use Markdown."
        }
        InspirationPersona::Translator => {
            "As a linguist, find any foreign-language text in the frame, \
             translate it, or share a piece of background or trivia about \
             that language. Use Markdown."
        }
        InspirationPersona::Encyclopedia => {
            "As a naturalist, identify what the scene or object is and \
             offer one genuinely interesting piece of background or trivia \
             about it. Use Markdown."
        }
        InspirationPersona::Storyteller => {
            "As a weaver of dreams, open a tiny story full of suspense or \
             imagination from what this scene suggests. Use Markdown."
        }
        InspirationPersona::HealthCoach => {
            "As a calm coach of healthy living, offer one relevant, \
             actionable piece of health advice drawn from the scene. Use \
             Markdown."
        }
        InspirationPersona::MenuGuide => {
            "As a menu guide, read any dishes or menu text in the frame and \
             recommend what to order, with a word on why. Use Markdown."
        }
    };
    format!("{} {}", body, FOCUS_MARKER_INSTRUCTION)
}

fn default_image_edit_prompt() -> String {
    "Redraw this scene as a hand-painted animation still, soft light and \
     storybook color."
        .to_string()
}

fn default_video_story_prompt() -> String {
    "You are a film director. Give a one-sentence cinematic logline that \
     captures the core story or emotion of this picture; it will be used \
     as the script for a generated video."
        .to_string()
}

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Load settings from the JSON store, creating it with defaults when it is
/// missing or unreadable.
pub fn load_or_create_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<AppSettings>(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                debug!("Failed to parse settings, falling back to defaults: {}", e);
                let defaults = AppSettings::default();
                write_settings(path, &defaults);
                defaults
            }
        },
        Err(_) => {
            let defaults = AppSettings::default();
            write_settings(path, &defaults);
            defaults
        }
    }
}

pub fn write_settings(path: &Path, settings: &AppSettings) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string_pretty(settings) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                debug!("Failed to write settings store: {}", e);
            }
        }
        Err(e) => debug!("Failed to serialize settings: {}", e),
    }
}
