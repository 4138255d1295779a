use crate::api_types::{ContentBlock, MessagesResponse, ModelsResponse};
use crate::convert::build_request_body;
use crate::stream::run_sse_stream;
use async_trait::async_trait;
use polyllm_provider::{
    Capabilities, ChatModel, ChatStream, Collector, LlmError, NoopCollector, ProviderResponse,
    QuirkFlags, Request, ResponseContent, ToolCall, Usage,
};
use polyllm_provider_utils::{
    AuthScheme, CapabilityCache, HttpTransport, link_abort, simulated_events, spawn_event_stream,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_TAG: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Builder for [`AnthropicProvider`].
pub struct AnthropicBuilder {
    base_url: String,
    api_key: Option<String>,
    version: String,
    default_model: Option<String>,
    client: Option<reqwest::Client>,
    headers: HashMap<String, String>,
    max_retries: u32,
    base_delay: Duration,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    collector: Arc<dyn Collector>,
}

impl AnthropicBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            version: DEFAULT_API_VERSION.to_string(),
            default_model: None,
            client: None,
            headers: HashMap::new(),
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            strip_params: HashSet::new(),
            flags: QuirkFlags::default(),
            collector: Arc::new(NoopCollector),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Override the `anthropic-version` header.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
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

    pub fn build(self) -> Result<AnthropicProvider, LlmError> {
        let default_model = self
            .default_model
            .ok_or_else(|| LlmError::invalid_request("a default model is required"))?;
        let mut headers = self.headers;
        headers.insert("anthropic-version".to_string(), self.version);

        let mut transport = HttpTransport::new(PROVIDER_TAG, &self.base_url)?
            .with_headers(headers)
            .with_max_retries(self.max_retries)
            .with_base_delay(self.base_delay)
            .with_default_retry_after(Duration::from_secs(60));
        if let Some(api_key) = self.api_key {
            transport = transport.with_auth(AuthScheme::Header {
                name: "x-api-key".to_string(),
                value: api_key,
            });
        }
        if let Some(client) = self.client {
            transport = transport.with_client(client);
        }
        Ok(AnthropicProvider {
            transport,
            default_model,
            strip_params: self.strip_params,
            flags: self.flags,
            collector: self.collector,
            capabilities: CapabilityCache::new(),
        })
    }
}

impl Default for AnthropicBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// An Anthropic-style messages backend.
pub struct AnthropicProvider {
    transport: HttpTransport,
    default_model: String,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    collector: Arc<dyn Collector>,
    capabilities: CapabilityCache,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    pub fn builder() -> AnthropicBuilder {
        AnthropicBuilder::new()
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
        caps.supports_vision = true;
        // No native JSON mode or JSON-Schema response format: structured
        // output rides on schema-in-prompt coercion.
        caps
    }

    async fn probe_models(&self) -> Option<Capabilities> {
        let raw = self.transport.get_json("models", None).await.ok()?;
        let listing: ModelsResponse = serde_json::from_value(raw).ok()?;
        let models = listing.data.into_iter().map(|m| m.id).collect();
        Some(self.baseline_capabilities().with_models(models).probed_now())
    }

    fn response_from_raw(&self, raw: serde_json::Value) -> Result<ProviderResponse, LlmError> {
        let parsed: MessagesResponse = serde_json::from_value(raw.clone()).map_err(|e| {
            LlmError::internal(format!("unexpected messages response shape: {e}"))
                .with_provider(PROVIDER_TAG)
        })?;

        let mut content = Vec::new();
        for block in parsed.content {
            match block {
                ContentBlock::Text { text } => {
                    if !text.is_empty() {
                        content.push(ResponseContent::Text(text));
                    }
                }
                ContentBlock::ToolUse { id, name, input } => {
                    content.push(ResponseContent::ToolCall(ToolCall::new(
                        id,
                        name,
                        input.to_string(),
                    )));
                }
            }
        }

        let usage = Usage::new(parsed.usage.input_tokens, parsed.usage.output_tokens);
        Ok(ProviderResponse {
            content,
            usage,
            raw,
        })
    }
}

#[async_trait]
impl ChatModel for AnthropicProvider {
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
                "messages",
                &body,
                request.headers.as_ref(),
                request.abort.as_ref(),
            )
            .await
            .map_err(|e| e.with_model(model))?;
        self.response_from_raw(raw)
    }

    async fn stream(&self, request: Request) -> Result<ChatStream, LlmError> {
        if self.flags.disable_json_streaming && request.response_format.is_some() {
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
                "messages",
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
