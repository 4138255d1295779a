use crate::tool::ToolCall;
use crate::usage::Usage;
use serde_json::Value;

/// One piece of assistant output, in vendor emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseContent {
    Text(String),
    ToolCall(ToolCall),
}

/// A completed (non-streaming) vendor response, translated back into the
/// neutral model.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    /// Assistant content in emission order.
    pub content: Vec<ResponseContent>,
    /// Token usage for this single call.
    pub usage: Usage,
    /// The raw vendor response body.
    pub raw: Value,
}

impl ProviderResponse {
    /// Every text fragment concatenated, fragments joined with a newline.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ResponseContent::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Every tool call, in emission order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ResponseContent::ToolCall(call) => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}
