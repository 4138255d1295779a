use crate::api_types::{ChatResponse, ModelsResponse};
use crate::convert::build_request_body;
use crate::stream::run_sse_stream;
use async_trait::async_trait;
use polyllm_provider::{
    Capabilities, ChatModel, ChatStream, Collector, LlmError, NoopCollector, ProviderResponse,
    QuirkFlags, Request, ResponseContent, ResponseFormat, ToolCall, Usage,
};
use polyllm_provider_utils::{
    AuthScheme, CapabilityCache, HttpTransport, link_abort, simulated_events, spawn_event_stream,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_TAG: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Builder for [`OpenAiProvider`].
pub struct OpenAiBuilder {
    base_url: String,
    api_key: Option<String>,
    default_model: Option<String>,
    client: Option<reqwest::Client>,
    headers: HashMap<String, String>,
    max_retries: u32,
    base_delay: Duration,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    collector: Arc<dyn Collector>,
}

impl OpenAiBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            default_model: None,
            client: None,
            headers: HashMap::new(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            strip_params: HashSet::new(),
            flags: QuirkFlags::default(),
            collector: Arc::new(NoopCollector),
        }
    }

    /// Point the provider at a compatible endpoint (Azure, vLLM, ...).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Remove a request parameter the endpoint does not understand.
    pub fn strip_param(mut self, name: impl Into<String>) -> Self {
        self.strip_params.insert(name.into());
        self
    }

    pub fn quirks(mut self, flags: QuirkFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn build(self) -> Result<OpenAiProvider, LlmError> {
        let default_model = self
            .default_model
            .ok_or_else(|| LlmError::invalid_request("a default model is required"))?;
        let mut transport = HttpTransport::new(PROVIDER_TAG, &self.base_url)?
            .with_headers(self.headers)
            .with_max_retries(self.max_retries)
            .with_base_delay(self.base_delay)
            .with_default_retry_after(Duration::from_secs(20));
        if let Some(api_key) = self.api_key {
            transport = transport.with_auth(AuthScheme::Bearer(api_key));
        }
        if let Some(client) = self.client {
            transport = transport.with_client(client);
        }
        Ok(OpenAiProvider {
            transport,
            default_model,
            strip_params: self.strip_params,
            flags: self.flags,
            collector: self.collector,
            capabilities: CapabilityCache::new(),
        })
    }
}

impl Default for OpenAiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An OpenAI-style chat-completions backend.
pub struct OpenAiProvider {
    transport: HttpTransport,
    default_model: String,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    collector: Arc<dyn Collector>,
    capabilities: CapabilityCache,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl OpenAiProvider {
    pub fn builder() -> OpenAiBuilder {
        OpenAiBuilder::new()
    }

    fn request_model(&self, request: &Request) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn baseline_capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::text_only();
        caps.supports_tools = true;
        caps.supports_json_mode = true;
        caps.supports_json_schema = true;
        caps.supports_vision = true;
        caps
    }

    async fn probe_models(&self) -> Option<Capabilities> {
        let raw = self.transport.get_json("models", None).await.ok()?;
        let listing: ModelsResponse = serde_json::from_value(raw).ok()?;
        let models = listing.data.into_iter().map(|m| m.id).collect();
        Some(self.baseline_capabilities().with_models(models).probed_now())
    }

    fn response_from_raw(&self, raw: serde_json::Value) -> Result<ProviderResponse, LlmError> {
        let parsed: ChatResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            LlmError::internal(format!("unexpected chat-completions response shape: {e}"))
                .with_provider(PROVIDER_TAG)
        })?;
        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            LlmError::internal("response contained no choices").with_provider(PROVIDER_TAG)
        })?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ResponseContent::Text(text));
            }
        }
        if let Some(calls) = choice.message.tool_calls {
            for call in calls {
                content.push(ResponseContent::ToolCall(ToolCall::new(
                    call.id.unwrap_or_default(),
                    call.function.name,
                    call.function.arguments,
                )));
            }
        }

        let usage = parsed
            .usage
            .map(|u| {
                Usage::with_total(
                    u.prompt_tokens.unwrap_or(0),
                    u.completion_tokens.unwrap_or(0),
                    u.total_tokens,
                )
            })
            .unwrap_or_default();

        Ok(ProviderResponse {
            content,
            usage,
            raw,
        })
    }

    /// Whether this request must take the simulated-stream path.
    fn needs_simulated_stream(&self, request: &Request) -> bool {
        self.flags.disable_json_streaming
            && matches!(
                request.response_format,
                Some(ResponseFormat::JsonObject) | Some(ResponseFormat::JsonSchema { .. })
            )
    }
}

#[async_trait]
impl ChatModel for OpenAiProvider {
    fn provider_tag(&self) -> &str {
        PROVIDER_TAG
    }

    fn model_id(&self) -> &str {
        &self.default_model
    }

    async fn capabilities(&self) -> Capabilities {
        self.capabilities
            .get_or_probe(self.baseline_capabilities(), || self.probe_models())
            .await
    }

    async fn generate(&self, request: Request) -> Result<ProviderResponse, LlmError> {
        let model = self.request_model(&request);
        let mut request = request;
        request.stream = false;
        let body = build_request_body(
            &request,
            &model,
            PROVIDER_TAG,
            &self.flags,
            &self.strip_params,
        )?;
        let raw = self
            .transport
            .post_json(
                "chat/completions",
                &body,
                request.headers.as_ref(),
                request.abort.as_ref(),
            )
            .await
            .map_err(|e| e.with_model(model))?;
        self.response_from_raw(raw)
    }

    async fn stream(&self, request: Request) -> Result<ChatStream, LlmError> {
        if self.needs_simulated_stream(&request) {
            let response = self.generate(request).await?;
            let collector = Arc::clone(&self.collector);
            return Ok(spawn_event_stream(move |sender, _cancel| async move {
                for event in simulated_events(&response) {
                    if event.is_terminal() {
                        sender.finish(event).await;
                    } else {
                        sender.emit(event);
                    }
                }
                collector.on_stream_closed(PROVIDER_TAG, sender.sent_count());
            }));
        }

        let model = self.request_model(&request);
        let mut request = request;
        request.stream = true;
        let body = build_request_body(
            &request,
            &model,
            PROVIDER_TAG,
            &self.flags,
            &self.strip_params,
        )?;
        let byte_stream = self
            .transport
            .post_stream(
                "chat/completions",
                &body,
                request.headers.as_ref(),
                request.abort.as_ref(),
            )
            .await
            .map_err(|e| e.with_model(model))?;

        let abort = request.abort.clone();
        let collector = Arc::clone(&self.collector);
        Ok(spawn_event_stream(move |sender, cancel| async move {
            link_abort(&cancel, abort);
            run_sse_stream(byte_stream, sender.clone(), cancel).await;
            collector.on_stream_closed(PROVIDER_TAG, sender.sent_count());
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyllm_provider::Message;
    use serde_json::json;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::builder()
            .api_key("sk-test")
            .default_model("gpt-4o-mini")
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_default_model() {
        let err = OpenAiProvider::builder().api_key("sk-test").build().unwrap_err();
        assert_eq!(err.kind, polyllm_provider::ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_request_model_falls_back_to_default() {
        let provider = provider();
        let request = Request::new(vec![Message::user("hi")]);
        assert_eq!(provider.request_model(&request), "gpt-4o-mini");
        let request = request.with_model("gpt-4o");
        assert_eq!(provider.request_model(&request), "gpt-4o");
    }

    #[test]
    fn test_response_parsing() {
        let provider = provider();
        let raw = json!({
            "choices": [{
                "message": {"content": "Hello there"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13}
        });
        let response = provider.response_from_raw(raw).unwrap();
        assert_eq!(response.text(), "Hello there");
        assert_eq!(response.usage.total_tokens, 13);
        assert!(response.tool_calls().is_empty());
    }

    #[test]
    fn test_response_parsing_with_tool_calls() {
        let provider = provider();
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "calculator", "arguments": "{\"expression\":\"1+1\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let response = provider.response_from_raw(raw).unwrap();
        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].id, "call_1");
    }

    #[test]
    fn test_simulated_stream_gate() {
        let mut flags = QuirkFlags::default();
        flags.disable_json_streaming = true;
        let provider = OpenAiProvider::builder()
            .api_key("sk-test")
            .default_model("gpt-4o-mini")
            .quirks(flags)
            .build()
            .unwrap();

        let plain = Request::new(vec![Message::user("hi")]);
        assert!(!provider.needs_simulated_stream(&plain));

        let json_mode = Request::new(vec![Message::user("hi")])
            .with_response_format(ResponseFormat::JsonObject);
        assert!(provider.needs_simulated_stream(&json_mode));
    }
}
