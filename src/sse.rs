use serde::Deserialize;
use serde_json::Value;

use crate::events::StreamEvent;

pub const DATA_PREFIX: &str = "data: ";
pub const ERROR_PREFIX: &str = "error: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Incremental line splitter for SSE byte streams.
///
/// Bytes are buffered until a `\n` arrives; only then is the line decoded, so
/// multi-byte characters split across chunks survive intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed arbitrary bytes and drain every complete line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }

        self.buffer.drain(..start);
        lines
    }

    /// Take the trailing unterminated fragment, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(decode_line(&rest))
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Map one line to an event. Unrecognized framing yields `None`.
pub fn classify_line(line: &str) -> Option<StreamEvent> {
    if let Some(payload) = line.strip_prefix(DATA_PREFIX) {
        if payload == DONE_SENTINEL {
            return Some(StreamEvent::Done);
        }
        return Some(classify_data(payload));
    }

    line.strip_prefix(ERROR_PREFIX).map(|message| StreamEvent::Error {
        message: message.to_owned(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ToolFrame {
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(alias = "tool_use_id")]
        id: String,
        #[serde(alias = "content", default)]
        result: Value,
        #[serde(default)]
        is_error: bool,
    },
}

fn classify_data(payload: &str) -> StreamEvent {
    if !payload.trim_start().starts_with('{') {
        return StreamEvent::content(payload);
    }

    match serde_json::from_str::<ToolFrame>(payload) {
        Ok(ToolFrame::ToolUse { id, name, input }) => StreamEvent::ToolUse { id, name, input },
        Ok(ToolFrame::ToolResult {
            id,
            result,
            is_error,
        }) => StreamEvent::ToolResult {
            id,
            result,
            is_error,
        },
        Err(_) => StreamEvent::content(payload),
    }
}
