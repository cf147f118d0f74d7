//! Incremental decoder for SSE chat-completion streams.
//!
//! The transport delivers arbitrary byte chunks; event boundaries are lines
//! prefixed with `data: ` carrying a JSON delta, terminated by a `[DONE]`
//! sentinel. A delta has two independent channels: `reasoning_content`
//! (counted, never appended) and `content` (appended in strict arrival
//! order). The decoder consumes raw bytes and carries the trailing,
//! possibly-incomplete line across chunk boundaries, so the assembled output
//! is identical no matter how the transport splits the stream — including
//! splits in the middle of a multi-byte UTF-8 character.

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// One parsed event from the stream, with both delta channels flattened out
/// of the `choices` array.
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream completed without a single output token. Distinct from an
    /// empty string so callers cannot mistake a reasoning-only stream for a
    /// real artifact.
    #[error("Stream produced no output tokens ({reasoning_tokens} reasoning tokens seen)")]
    EmptyArtifact { reasoning_tokens: u64 },
}

/// Fully assembled stream output.
#[derive(Debug)]
pub struct DecodedArtifact {
    pub content: String,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
}

/// Accumulator for one streaming request. Feed chunks with [`push_chunk`],
/// then call [`finish`] exactly once.
///
/// [`push_chunk`]: StreamDecoder::push_chunk
/// [`finish`]: StreamDecoder::finish
#[derive(Debug, Default)]
pub struct StreamDecoder {
    content: String,
    output_tokens: u64,
    reasoning_tokens: u64,
    carry: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one transport chunk. Bytes after the last newline are
    /// retained as the carry buffer since the line may be incomplete — and a
    /// multi-byte character split across chunks stays byte-accurate, since
    /// conversion happens per complete line, never per chunk.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.carry.extend_from_slice(chunk);
        // Split off complete lines, keep the remainder.
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.process_line(line.trim_end_matches('\n'));
        }
    }

    /// Flush the carry buffer and return the assembled artifact.
    pub fn finish(mut self) -> Result<DecodedArtifact, StreamError> {
        let rest = std::mem::take(&mut self.carry);
        let rest = String::from_utf8_lossy(&rest);
        if !rest.trim().is_empty() {
            self.process_line(&rest);
        }
        if self.output_tokens == 0 {
            return Err(StreamError::EmptyArtifact {
                reasoning_tokens: self.reasoning_tokens,
            });
        }
        Ok(DecodedArtifact {
            content: self.content,
            output_tokens: self.output_tokens,
            reasoning_tokens: self.reasoning_tokens,
        })
    }

    /// Output accumulated so far. Used by callers that accept a partial
    /// artifact after a transport failure.
    pub fn partial_content(&self) -> &str {
        &self.content
    }

    pub fn has_output(&self) -> bool {
        self.output_tokens > 0
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return;
        };
        if payload == DONE_SENTINEL {
            return;
        }

        // A single unparseable line is protocol noise, never fatal.
        let Ok(chunk) = serde_json::from_str::<ChatChunk>(payload) else {
            debug!("skipping unparseable stream line ({} bytes)", payload.len());
            return;
        };

        for choice in &chunk.choices {
            // The same delta may carry both channels; count reasoning first,
            // then append output.
            if let Some(reasoning) = &choice.delta.reasoning_content
                && !reasoning.is_empty()
            {
                self.reasoning_tokens += 1;
            }
            if let Some(content) = &choice.delta.content
                && !content.is_empty()
            {
                self.content.push_str(content);
                self.output_tokens += 1;
            }
        }
    }
}

/// Decode a complete SSE response body delivered in one piece. Used by the
/// non-incremental fallback transport.
pub fn decode_full(text: &str) -> Result<DecodedArtifact, StreamError> {
    let mut decoder = StreamDecoder::new();
    decoder.push_chunk(text.as_bytes());
    decoder.finish()
}
