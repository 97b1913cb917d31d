//! Incremental decoding of the chat-completions SSE stream.

use bytes::{Buf, Bytes, BytesMut};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ModelDelta, ModelError};
use crate::models::ToolCall;

/// Splits a byte stream into SSE `data` payloads.
///
/// Handles records split across network chunks, CRLF line endings, comment
/// lines and multi-line data fields. Bytes are buffered until a full line is
/// available, so a UTF-8 sequence split between chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every payload completed by them.
    pub fn push(&mut self, chunk: &Bytes) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(newline);
            self.buffer.advance(1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches('\r');

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
            // event:, id:, retry: carry nothing we use
        }
        payloads
    }

    /// Flush a trailing record that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let raw = self.buffer.split();
        let rest = String::from_utf8_lossy(&raw);
        if let Some(value) = rest.trim_end_matches(['\r', '\n']).strip_prefix("data:") {
            self.data.push(value.trim_start().to_string());
        }
        if self.data.is_empty() {
            None
        } else {
            let payload = self.data.join("\n");
            self.data.clear();
            Some(payload)
        }
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns decoded chat-completion chunks into [`ModelDelta`]s.
///
/// Text is passed through immediately; tool-call fragments are merged by
/// index and released once the choice reports a finish reason (or the stream
/// ends).
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    tool_calls: BTreeMap<u64, PartialToolCall>,
    done: bool,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `[DONE]` was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn accept(&mut self, payload: &str) -> Result<Vec<ModelDelta>, ModelError> {
        let payload = payload.trim();
        if payload == "[DONE]" {
            self.done = true;
            return Ok(self.drain_tool_calls());
        }

        let chunk: Value = serde_json::from_str(payload)
            .map_err(|e| ModelError::InvalidResponse(format!("bad stream chunk: {}", e)))?;

        if let Some(error) = chunk.get("error") {
            let message = error["message"]
                .as_str()
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            return Err(ModelError::Stream(message));
        }

        let mut deltas = Vec::new();
        let Some(choice) = chunk["choices"].get(0) else {
            return Ok(deltas);
        };

        let delta = &choice["delta"];
        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                deltas.push(ModelDelta::Text(text.to_string()));
            }
        }

        if let Some(fragments) = delta["tool_calls"].as_array() {
            for fragment in fragments {
                let index = fragment["index"].as_u64().unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = fragment["id"].as_str() {
                    partial.id = id.to_string();
                }
                if let Some(name) = fragment["function"]["name"].as_str() {
                    partial.name.push_str(name);
                }
                if let Some(arguments) = fragment["function"]["arguments"].as_str() {
                    partial.arguments.push_str(arguments);
                }
            }
        }

        if choice["finish_reason"].is_string() {
            deltas.extend(self.drain_tool_calls());
        }

        Ok(deltas)
    }

    /// Release any tool calls still pending.
    pub fn finish(&mut self) -> Vec<ModelDelta> {
        self.drain_tool_calls()
    }

    fn drain_tool_calls(&mut self) -> Vec<ModelDelta> {
        std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, partial)| {
                let args = parse_arguments(&partial.arguments);
                let id = if partial.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    partial.id
                };
                ModelDelta::ToolCall(ToolCall {
                    id,
                    name: partial.name,
                    args,
                })
            })
            .collect()
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, arguments = raw, "Tool arguments are not valid JSON");
            Value::String(raw.to_string())
        }
    }
}
