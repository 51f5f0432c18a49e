//! Server-sent-event decoding for streaming chat completions.
//!
//! Both providers speak the same framing: `data: <json>` lines terminated
//! by `data: [DONE]`, each payload carrying `choices[0].delta` with an
//! optional `content` and an optional provider-specific `reasoning_content`
//! field. The decoder is a plain line-in/chunks-out machine so it can be
//! tested without a network or a runtime.

use crate::error::AiError;
use serde::Deserialize;

const EVENT_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// One decoded unit of a streaming analysis response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Provider "thinking" text, emitted before user-visible content.
    Reasoning(String),
    /// User-visible commentary text.
    Content(String),
    /// Terminal marker; nothing follows.
    Done,
}

#[derive(Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
}

/// Splits a live byte stream into complete text lines, carrying any
/// partial tail between feeds. Handles `\n` and `\r\n` endings.
#[derive(Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop(); // the \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Turns event lines into [`StreamChunk`]s. Non-restartable: after `Done`
/// or a protocol error the decoder stays finished and ignores further
/// input.
pub struct ChunkDecoder {
    finished: bool,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        ChunkDecoder { finished: false }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one line. Lines outside the `data:` convention yield nothing;
    /// a payload may carry reasoning, content, both (reasoning first), or
    /// neither.
    pub fn decode_line(&mut self, line: &str) -> Result<Vec<StreamChunk>, AiError> {
        if self.finished {
            return Ok(Vec::new());
        }

        let trimmed = line.trim();
        let payload = match trimmed.strip_prefix(EVENT_PREFIX) {
            Some(rest) => rest.trim(),
            None => return Ok(Vec::new()),
        };

        if payload == DONE_MARKER {
            self.finished = true;
            return Ok(vec![StreamChunk::Done]);
        }

        let response: StreamResponse = match serde_json::from_str(payload) {
            Ok(res) => res,
            Err(e) => {
                self.finished = true;
                return Err(AiError::Protocol(format!(
                    "stream payload did not decode: {}",
                    e
                )));
            }
        };

        let mut chunks = Vec::new();
        if let Some(choice) = response.choices.into_iter().next() {
            if let Some(reasoning) = choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    chunks.push(StreamChunk::Reasoning(reasoning));
                }
            }
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    chunks.push(StreamChunk::Content(content));
                }
            }
        }
        Ok(chunks)
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}
