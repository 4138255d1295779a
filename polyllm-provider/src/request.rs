use crate::message::Message;
use crate::tool::{ToolChoice, ToolDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Requested output shape for the assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text (the default).
    Text,
    /// Any syntactically valid JSON object.
    JsonObject,
    /// JSON conforming to the given schema.
    JsonSchema { schema: Value, strict: bool },
}

/// Per-provider option bags, keyed by provider tag ("openai",
/// "anthropic", "ollama", ...). Dialects copy the keys they recognize and
/// silently drop the rest.
pub type ProviderOptions = HashMap<String, HashMap<String, Value>>;

/// A neutral chat request, translated by each dialect into its vendor
/// wire schema. Immutable once handed to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Model id; `None` selects the provider's configured default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// The conversation. Must be non-empty.
    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools advertised to the model for this call.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<ToolDef>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,

    /// Whether the vendor should stream the response.
    #[serde(default)]
    pub stream: bool,

    /// Extra HTTP headers for this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Per-provider option bags; unrecognized keys are dropped.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub provider_options: ProviderOptions,

    /// Cancellation/deadline token, observed at every suspension point.
    #[serde(skip)]
    pub abort: Option<CancellationToken>,
}

impl Request {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            response_format: None,
            stream: false,
            headers: None,
            provider_options: HashMap::new(),
            abort: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDef>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_provider_options(mut self, options: ProviderOptions) -> Self {
        self.provider_options = options;
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = Some(abort);
        self
    }

    /// The option bag for one provider tag, if the caller supplied one.
    pub fn options_for(&self, provider_tag: &str) -> Option<&HashMap<String, Value>> {
        self.provider_options.get(provider_tag)
    }
}
