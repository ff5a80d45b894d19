use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event emitted by the `/run/stream` decoder, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Text carried by a `data:` line.
    Content { text: String },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        id: String,
        result: Value,
        is_error: bool,
    },
    /// Server-reported error line; the stream keeps going.
    Error { message: String },
    /// Terminal event: the `[DONE]` sentinel or end of body.
    Done,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
