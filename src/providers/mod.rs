//! Remote AI provider clients.
//!
//! `AiProvider` is the uniform seam the managers talk to: streaming scene
//! analysis, one-shot image edits, and asynchronous video generation jobs
//! (submit + one-shot poll). Concrete clients build provider-specific wire
//! payloads but share the SSE decoding and artifact download plumbing here.

pub mod doubao;
pub mod openai;
pub mod sse;

use crate::error::AiError;
use crate::models::{AiProviderKind, AnalysisRequest};
use crate::settings::AppSettings;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::StreamExt;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use doubao::DoubaoClient;
pub use openai::OpenAiClient;
pub use sse::{ChunkDecoder, LineBuffer, StreamChunk};

/// One-shot snapshot of a provider-side video generation task. The raw
/// status string is classified by the job tracker, not here.
#[derive(Debug, Clone)]
pub struct VideoJobStatus {
    pub id: String,
    pub status: String,
    pub error_message: Option<String>,
    pub video_url: Option<String>,
}

/// A live analysis stream. Chunks arrive in network order; dropping the
/// stream cancels the background reader and releases the connection.
pub struct AnalysisStream {
    rx: mpsc::Receiver<Result<StreamChunk, AiError>>,
}

impl AnalysisStream {
    /// Next chunk, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<Result<StreamChunk, AiError>> {
        self.rx.recv().await
    }

    /// Build a stream from an already-scripted chunk sequence (tests).
    #[cfg(test)]
    pub(crate) fn from_chunks(chunks: Vec<Result<StreamChunk, AiError>>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });
        AnalysisStream { rx }
    }

    /// Wrap a hand-fed receiver (tests).
    #[cfg(test)]
    pub(crate) fn from_receiver(rx: mpsc::Receiver<Result<StreamChunk, AiError>>) -> Self {
        AnalysisStream { rx }
    }
}

/// Uniform interface over the concrete provider clients.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn kind(&self) -> AiProviderKind;

    /// Open the streaming chat-completions call for a scene analysis.
    /// Returns once the response headers have been validated; chunks then
    /// arrive lazily through the stream.
    async fn stream_analysis(&self, request: AnalysisRequest) -> Result<AnalysisStream, AiError>;

    /// Single synchronous image-edit generation. No polling, no retries.
    async fn generate_edited_image(&self, image: &[u8], prompt: &str) -> Result<Vec<u8>, AiError>;

    /// Submit an asynchronous video generation task, returning its id.
    async fn submit_video_job(&self, image: &[u8], prompt: &str) -> Result<String, AiError>;

    /// One status check for a submitted video task. Never sleeps.
    async fn poll_video_job(&self, job_id: &str) -> Result<VideoJobStatus, AiError>;

    /// Fetch terminal artifact bytes from the reference a job reported.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, AiError>;
}

/// Select the client for the configured provider.
pub fn make_provider(settings: &AppSettings) -> Arc<dyn AiProvider> {
    match settings.ai_provider {
        AiProviderKind::Doubao => Arc::new(DoubaoClient::from_settings(settings)),
        AiProviderKind::OpenAi => Arc::new(OpenAiClient::from_settings(settings)),
    }
}

pub(crate) fn jpeg_data_uri(bytes: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(bytes))
}

/// Pump a validated streaming response through the SSE decoder on a
/// background task. The bounded channel keeps a slow consumer from
/// buffering the whole response; a dropped receiver stops the reader at
/// its next send, which drops the HTTP body and frees the connection.
pub(crate) fn spawn_chunk_reader(response: reqwest::Response) -> AnalysisStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut decoder = ChunkDecoder::new();

        while let Some(item) = byte_stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    let _ = tx.send(Err(AiError::Request(e))).await;
                    return;
                }
            };

            for line in lines.feed(&bytes) {
                match decoder.decode_line(&line) {
                    Ok(chunks) => {
                        for chunk in chunks {
                            let is_done = chunk == StreamChunk::Done;
                            if tx.send(Ok(chunk)).await.is_err() {
                                debug!("Analysis stream receiver dropped, aborting read");
                                return;
                            }
                            if is_done {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        // Connection closed without the terminal marker; treat it as one.
        let _ = tx.send(Ok(StreamChunk::Done)).await;
    });

    AnalysisStream { rx }
}

/// Read a non-2xx response into a typed error, preferring the message the
/// provider put in the body over the bare status code.
pub(crate) async fn error_from_response(
    response: reqwest::Response,
    decode_message: fn(&str) -> Option<String>,
) -> AiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = decode_message(&body).or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    });
    AiError::from_status(status, message)
}

/// Plain GET for artifact bytes (generated image or video URL).
pub(crate) async fn download_artifact(
    http: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, AiError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AiError::from_status(status.as_u16(), None));
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_data_uri_prefix() {
        let uri = jpeg_data_uri(&[0xFF, 0xD8, 0xFF]);
        assert!(uri.starts_with("data:image/jpeg;base64,"));
        assert!(uri.len() > "data:image/jpeg;base64,".len());
    }
}
