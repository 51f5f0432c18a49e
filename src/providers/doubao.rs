//! Doubao (Volcano Ark) client: streaming vision analysis, image edit
//! generation, and asynchronous video generation tasks.

use crate::error::AiError;
use crate::models::{AiProviderKind, AnalysisRequest};
use crate::providers::{
    download_artifact, error_from_response, jpeg_data_uri, spawn_chunk_reader, AiProvider,
    AnalysisStream, VideoJobStatus,
};
use crate::settings::{effective_base_url, AppSettings};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Fixed generation parameters the video model expects appended to the
// prompt text.
const VIDEO_PROMPT_SUFFIX: &str = "--dur 10 --resolution 720p --camerafixed false";

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Serialize, Debug)]
struct ImageUrlPart {
    url: String,
}

impl ContentPart {
    fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    fn image(data_uri: String) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrlPart { url: data_uri },
        }
    }
}

#[derive(Serialize, Debug)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize, Debug)]
struct ThinkingPayload {
    /// "enabled" or "disabled"
    r#type: &'static str,
}

#[derive(Serialize, Debug)]
struct VlmStreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    thinking: ThinkingPayload,
}

#[derive(Serialize, Debug)]
struct ImageEditRequest {
    model: String,
    prompt: String,
    image: String,
    response_format: String,
}

#[derive(Deserialize, Debug)]
struct ImageEditResponse {
    data: Vec<ImageEditData>,
}

#[derive(Deserialize, Debug)]
struct ImageEditData {
    url: Option<String>,
}

#[derive(Serialize, Debug)]
struct VideoTaskRequest {
    model: String,
    content: Vec<ContentPart>,
}

#[derive(Deserialize, Debug)]
struct VideoTaskResponse {
    id: String,
}

#[derive(Deserialize, Debug)]
struct VideoPollResponse {
    id: String,
    status: String,
    error: Option<ErrorDetail>,
    content: Option<VideoContent>,
}

#[derive(Deserialize, Debug)]
struct VideoContent {
    video_url: String,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}

fn decode_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorDetail>(body)
        .ok()
        .map(|detail| detail.message)
}

pub struct DoubaoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vlm_model: String,
    image_edit_model: String,
    video_model: String,
}

impl DoubaoClient {
    pub fn from_settings(settings: &AppSettings) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        DoubaoClient {
            http,
            base_url: effective_base_url(AiProviderKind::Doubao, settings),
            api_key: settings.doubao_api_key.clone(),
            vlm_model: settings.vlm_model_id.clone(),
            image_edit_model: settings.image_edit_model_id.clone(),
            video_model: settings.video_gen_model_id.clone(),
        }
    }

    fn check_api_key(&self) -> Result<(), AiError> {
        if self.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }
        Ok(())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    fn video_prompt(prompt: &str) -> String {
        format!("{} {}", prompt, VIDEO_PROMPT_SUFFIX)
    }
}

#[async_trait]
impl AiProvider for DoubaoClient {
    fn kind(&self) -> AiProviderKind {
        AiProviderKind::Doubao
    }

    async fn stream_analysis(&self, request: AnalysisRequest) -> Result<AnalysisStream, AiError> {
        self.check_api_key()?;

        let mut content = vec![ContentPart::text(request.prompt)];
        for image in &request.images {
            content.push(ContentPart::image(jpeg_data_uri(image)));
        }

        let body = VlmStreamRequest {
            model: self.vlm_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            stream: true,
            thinking: ThinkingPayload {
                r#type: if request.options.deep_thinking {
                    "enabled"
                } else {
                    "disabled"
                },
            },
        };

        debug!(
            "Opening Doubao analysis stream (model: {}, images: {})",
            self.vlm_model,
            request.images.len()
        );

        let response = self.post("chat/completions").json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }
        Ok(spawn_chunk_reader(response))
    }

    async fn generate_edited_image(&self, image: &[u8], prompt: &str) -> Result<Vec<u8>, AiError> {
        self.check_api_key()?;

        let body = ImageEditRequest {
            model: self.image_edit_model.clone(),
            prompt: prompt.to_string(),
            image: jpeg_data_uri(image),
            response_format: "url".to_string(),
        };

        let response = self.post("images/generations").json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }

        let parsed: ImageEditResponse = response
            .json()
            .await
            .map_err(|e| AiError::Protocol(format!("image edit response did not decode: {}", e)))?;

        let url = parsed
            .data
            .into_iter()
            .next()
            .and_then(|entry| entry.url)
            .ok_or(AiError::MissingArtifact)?;

        debug!("Image edit ready, fetching artifact from {}", url);
        download_artifact(&self.http, &url).await
    }

    async fn submit_video_job(&self, image: &[u8], prompt: &str) -> Result<String, AiError> {
        self.check_api_key()?;

        let body = VideoTaskRequest {
            model: self.video_model.clone(),
            content: vec![
                ContentPart::text(Self::video_prompt(prompt)),
                ContentPart::image(jpeg_data_uri(image)),
            ],
        };

        let response = self
            .post("contents/generations/tasks")
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }

        let parsed: VideoTaskResponse = response
            .json()
            .await
            .map_err(|e| AiError::Protocol(format!("video task response did not decode: {}", e)))?;

        debug!("Submitted video generation task {}", parsed.id);
        Ok(parsed.id)
    }

    async fn poll_video_job(&self, job_id: &str) -> Result<VideoJobStatus, AiError> {
        self.check_api_key()?;

        let response = self
            .http
            .get(format!(
                "{}/contents/generations/tasks/{}",
                self.base_url, job_id
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }

        let parsed: VideoPollResponse = response
            .json()
            .await
            .map_err(|e| AiError::Protocol(format!("video poll response did not decode: {}", e)))?;

        Ok(VideoJobStatus {
            id: parsed.id,
            status: parsed.status,
            error_message: parsed.error.map(|detail| detail.message),
            video_url: parsed.content.map(|content| content.video_url),
        })
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, AiError> {
        download_artifact(&self.http, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_part_wire_shape() {
        let part = ContentPart::image("data:image/jpeg;base64,AAAA".to_string());
        let json = serde_json::to_value(&part).unwrap();
        assert_eq!(json["type"], "image_url");
        assert_eq!(json["image_url"]["url"], "data:image/jpeg;base64,AAAA");

        let text = ContentPart::text("hello");
        let json = serde_json::to_value(&text).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_thinking_payload_follows_option() {
        let body = VlmStreamRequest {
            model: "m".to_string(),
            messages: vec![],
            stream: true,
            thinking: ThinkingPayload { r#type: "enabled" },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["thinking"]["type"], "enabled");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_video_prompt_carries_generation_flags() {
        let prompt = DoubaoClient::video_prompt("a quiet harbor at dawn");
        assert!(prompt.starts_with("a quiet harbor at dawn"));
        assert!(prompt.ends_with("--dur 10 --resolution 720p --camerafixed false"));
    }

    #[test]
    fn test_decode_error_message() {
        assert_eq!(
            decode_error_message(r#"{"message":"quota exceeded","type":"rate"}"#),
            Some("quota exceeded".to_string())
        );
        assert_eq!(decode_error_message("not json"), None);
    }

    #[test]
    fn test_poll_response_decodes_optional_fields() {
        let raw = r#"{"id":"task-1","status":"succeeded","content":{"video_url":"https://cdn/v.mp4"}}"#;
        let parsed: VideoPollResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "succeeded");
        assert_eq!(parsed.content.unwrap().video_url, "https://cdn/v.mp4");
        assert!(parsed.error.is_none());
    }
}
