use serde::Deserialize;
use serde_json::Value;

/// One response object, shared by both endpoints and by streaming and
/// non-streaming calls: the chat endpoint fills `message`, the generate
/// endpoint fills `response`; streams send one of these per line with
/// the final line carrying `done = true` and the token counts.
#[derive(Debug, Deserialize)]
pub struct ResponseLine {
    pub message: Option<ChatMessage>,
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ApiToolCall>>,
}

/// Tool calls arrive with complete arguments and no vendor id.
#[derive(Debug, Deserialize)]
pub struct ApiToolCall {
    pub function: ApiFunction,
}

#[derive(Debug, Deserialize)]
pub struct ApiFunction {
    pub name: String,
    pub arguments: Value,
}

/// `GET /api/tags` listing, used by the capability probe.
#[derive(Debug, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TagEntry {
    pub name: String,
}

impl ResponseLine {
    /// The text carried by this line, from whichever endpoint shape.
    pub fn text(&self) -> Option<&str> {
        self.message
            .as_ref()
            .and_then(|m| m.content.as_deref())
            .or(self.response.as_deref())
    }
}
