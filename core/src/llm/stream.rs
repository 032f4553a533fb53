//! Buffering for streamed model responses
//!
//! Chunks arrive split at arbitrary byte offsets. Only complete lines are
//! decoded, and the assembled text is released once the stream says it is
//! finished.

use crate::error::ModelError;
use serde::Deserialize;

/// Splits a byte stream into complete UTF-8 lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and drain every complete line (without the newline).
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1])
                .trim_end_matches('\r')
                .to_string();
            lines.push(text);
        }
        lines
    }

    /// Whatever is left after the last newline.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaMessage>,
    /// `/api/generate` puts text here instead of `message`
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

/// Accumulates an Ollama NDJSON stream.
#[derive(Debug, Default)]
pub struct NdjsonBuffer {
    lines: LineBuffer,
    content: String,
    done: bool,
}

impl NdjsonBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes. Returns the text deltas of the complete lines seen.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, ModelError> {
        let lines = self.lines.push(bytes);
        let mut deltas = Vec::new();
        for line in lines {
            if let Some(delta) = self.accept_line(&line)? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    fn accept_line(&mut self, line: &str) -> Result<Option<String>, ModelError> {
        let line = line.trim();
        if line.is_empty() || self.done {
            return Ok(None);
        }
        let chunk: OllamaChunk = serde_json::from_str(line)
            .map_err(|e| ModelError::protocol(format!("malformed stream line: {}", e)))?;
        if let Some(error) = chunk.error {
            return Err(ModelError::protocol(error));
        }
        let delta = chunk
            .message
            .map(|m| m.content)
            .or(chunk.response)
            .unwrap_or_default();
        self.content.push_str(&delta);
        if chunk.done {
            self.done = true;
        }
        Ok((!delta.is_empty()).then_some(delta))
    }

    /// Complete text, or an error if the stream never signalled `done`.
    pub fn finish(mut self) -> Result<String, ModelError> {
        if let Some(rest) = self.lines.take_remainder() {
            self.accept_line(&rest)?;
        }
        if !self.done {
            return Err(ModelError::protocol("incomplete stream: ended before done"));
        }
        Ok(self.content)
    }
}
