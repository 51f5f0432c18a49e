//! OpenAI client: streaming vision analysis and one-shot image generation.
//! Video generation has no public API surface yet and reports as
//! unsupported; the job tracker turns that into a failed job.

use crate::error::AiError;
use crate::models::{AiProviderKind, AnalysisRequest};
use crate::providers::{
    download_artifact, error_from_response, jpeg_data_uri, spawn_chunk_reader, AiProvider,
    AnalysisStream, VideoJobStatus,
};
use crate::settings::{effective_base_url, AppSettings};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MAX_COMPLETION_TOKENS: u32 = 4096;

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
}

#[derive(Serialize, Debug)]
struct ImageUrlPart {
    url: String,
    detail: &'static str,
}

impl ContentPart {
    fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    fn image(data_uri: String) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrlPart {
                url: data_uri,
                detail: "auto",
            },
        }
    }
}

#[derive(Serialize, Debug)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Serialize, Debug)]
struct VisionStreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_completion_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Debug)]
struct ImageGenerationRequest {
    model: String,
    prompt: String,
    n: u32,
    size: String,
    response_format: String,
}

#[derive(Deserialize, Debug)]
struct ImageGenerationResponse {
    data: Vec<ImageGenerationData>,
}

#[derive(Deserialize, Debug)]
struct ImageGenerationData {
    b64_json: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize, Debug)]
struct ErrorDetail {
    message: String,
}

fn decode_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .map(|response| response.error.message)
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    vlm_model: String,
    image_model: String,
}

impl OpenAiClient {
    pub fn from_settings(settings: &AppSettings) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        OpenAiClient {
            http,
            base_url: effective_base_url(AiProviderKind::OpenAi, settings),
            api_key: settings.openai_api_key.clone(),
            vlm_model: settings.openai_vlm_model_id.clone(),
            image_model: settings.openai_image_model_id.clone(),
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
}

#[async_trait]
impl AiProvider for OpenAiClient {
    fn kind(&self) -> AiProviderKind {
        AiProviderKind::OpenAi
    }

    async fn stream_analysis(&self, request: AnalysisRequest) -> Result<AnalysisStream, AiError> {
        self.check_api_key()?;

        let mut content = vec![ContentPart::text(request.prompt)];
        for image in &request.images {
            content.push(ContentPart::image(jpeg_data_uri(image)));
        }

        // No reasoning phase on this endpoint; deep_thinking is ignored.
        let body = VisionStreamRequest {
            model: self.vlm_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
            stream: true,
        };

        debug!(
            "Opening OpenAI analysis stream (model: {}, images: {})",
            self.vlm_model,
            request.images.len()
        );

        let response = self.post("chat/completions").json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }
        Ok(spawn_chunk_reader(response))
    }

    async fn generate_edited_image(&self, _image: &[u8], prompt: &str) -> Result<Vec<u8>, AiError> {
        self.check_api_key()?;

        // The images endpoint is text-to-image; the prompt alone drives the
        // stylized rendition.
        let body = ImageGenerationRequest {
            model: self.image_model.clone(),
            prompt: prompt.to_string(),
            n: 1,
            size: "1024x1024".to_string(),
            response_format: "b64_json".to_string(),
        };

        let response = self.post("images/generations").json(&body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response, decode_error_message).await);
        }

        let parsed: ImageGenerationResponse = response.json().await.map_err(|e| {
            AiError::Protocol(format!("image generation response did not decode: {}", e))
        })?;

        let entry = parsed
            .data
            .into_iter()
            .next()
            .ok_or(AiError::MissingArtifact)?;

        if let Some(b64) = entry.b64_json {
            return STANDARD
                .decode(b64.as_bytes())
                .map_err(|e| AiError::Protocol(format!("image payload base64 decode: {}", e)));
        }
        if let Some(url) = entry.url {
            debug!("Image generation returned a URL, fetching artifact");
            return download_artifact(&self.http, &url).await;
        }
        Err(AiError::MissingArtifact)
    }

    async fn submit_video_job(&self, _image: &[u8], _prompt: &str) -> Result<String, AiError> {
        self.check_api_key()?;
        Err(AiError::Unsupported("video generation"))
    }

    async fn poll_video_job(&self, _job_id: &str) -> Result<VideoJobStatus, AiError> {
        Err(AiError::Unsupported("video generation"))
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, AiError> {
        download_artifact(&self.http, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_request_wire_shape() {
        let body = VisionStreamRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::text("describe"),
                    ContentPart::image("data:image/jpeg;base64,AA==".to_string()),
                ],
            }],
            max_completion_tokens: MAX_COMPLETION_TOKENS,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["max_completion_tokens"], 4096);
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["detail"],
            "auto"
        );
    }

    #[test]
    fn test_decode_error_message() {
        assert_eq!(
            decode_error_message(r#"{"error":{"message":"invalid api key","type":"auth"}}"#),
            Some("invalid api key".to_string())
        );
        assert_eq!(decode_error_message(r#"{"message":"flat"}"#), None);
    }
}
