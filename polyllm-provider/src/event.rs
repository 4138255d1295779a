use crate::error::LlmError;
use crate::tool::{ToolCall, ToolOutput};
use crate::usage::Usage;
use serde_json::Value;

/// The neutral streaming event. Every vendor stream encoding is
/// normalized into this sequence.
///
/// Sequence invariants: `Start` is always first; exactly one terminal
/// event (`Finish` or `Error`) is last; concatenating `TextDelta` texts in
/// emission order reproduces the final assistant text; each `ToolCall` is
/// emitted once, only after its arguments are fully accumulated.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream is open.
    Start,
    /// An increment of assistant text.
    TextDelta { text: String },
    /// A fully accumulated tool call.
    ToolCall(ToolCall),
    /// The outcome of executing a tool call (agentic streams only).
    ToolResult(ToolOutput),
    /// Normal termination, with usage when the vendor reported it.
    Finish { usage: Option<Usage> },
    /// Abnormal termination.
    Error(LlmError),
    /// Raw vendor payload passthrough (structured-object delivery).
    Raw(Value),
}

impl StreamEvent {
    pub fn text_delta(text: impl Into<String>) -> Self {
        StreamEvent::TextDelta { text: text.into() }
    }

    pub fn finish(usage: Option<Usage>) -> Self {
        StreamEvent::Finish { usage }
    }

    /// Terminal events end the stream; the channel closes after one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Finish { .. } | StreamEvent::Error(_))
    }

    pub fn is_text_delta(&self) -> bool {
        matches!(self, StreamEvent::TextDelta { .. })
    }

    /// The delta text, when this is a text delta.
    pub fn delta(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { text } => Some(text),
            _ => None,
        }
    }
}
