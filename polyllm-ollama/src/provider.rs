use crate::api_types::{ResponseLine, TagsResponse};
use crate::convert::{LocalSettings, build_chat_body, build_generate_body};
use crate::stream::run_ndjson_stream;
use async_trait::async_trait;
use polyllm_provider::{
    Capabilities, ChatModel, ChatStream, Collector, LlmError, NoopCollector, ProviderResponse,
    QuirkFlags, Request, ResponseContent, ToolCall, Usage,
};
use polyllm_provider_utils::{
    CapabilityCache, HttpTransport, link_abort, simulated_events, spawn_event_stream,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

const PROVIDER_TAG: &str = "ollama";
const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Builder for [`OllamaProvider`].
pub struct OllamaBuilder {
    base_url: String,
    default_model: Option<String>,
    client: Option<reqwest::Client>,
    headers: HashMap<String, String>,
    max_retries: u32,
    base_delay: Duration,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    settings: LocalSettings,
    collector: Arc<dyn Collector>,
}

impl OllamaBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: None,
            client: None,
            headers: HashMap::new(),
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            strip_params: HashSet::new(),
            flags: QuirkFlags::default(),
            settings: LocalSettings::default(),
            collector: Arc::new(NoopCollector),
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
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

    /// Server-side model residency ("5m", "-1", ...).
    pub fn keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.settings.keep_alive = Some(keep_alive.into());
        self
    }

    /// Prompt template override for the generate endpoint.
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.settings.template = Some(template.into());
        self
    }

    /// Use `/api/generate` with a flattened prompt instead of the chat
    /// endpoint.
    pub fn use_generate_endpoint(mut self, use_generate: bool) -> Self {
        self.settings.use_generate_endpoint = use_generate;
        self
    }

    pub fn collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn build(self) -> Result<OllamaProvider, LlmError> {
        let default_model = self
            .default_model
            .ok_or_else(|| LlmError::invalid_request("a default model is required"))?;
        let mut transport = HttpTransport::new(PROVIDER_TAG, &self.base_url)?
            .with_headers(self.headers)
            .with_max_retries(self.max_retries)
            .with_base_delay(self.base_delay)
            .with_default_retry_after(Duration::from_secs(10));
        if let Some(client) = self.client {
            transport = transport.with_client(client);
        }
        Ok(OllamaProvider {
            transport,
            default_model,
            strip_params: self.strip_params,
            flags: self.flags,
            settings: self.settings,
            collector: self.collector,
            capabilities: CapabilityCache::new(),
        })
    }
}

impl Default for OllamaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A local Ollama-style backend: chat and generate endpoints speaking
/// newline-delimited JSON, no authentication.
pub struct OllamaProvider {
    transport: HttpTransport,
    default_model: String,
    strip_params: HashSet<String>,
    flags: QuirkFlags,
    settings: LocalSettings,
    collector: Arc<dyn Collector>,
    capabilities: CapabilityCache,
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl OllamaProvider {
    pub fn builder() -> OllamaBuilder {
        OllamaBuilder::new()
    }

    fn request_model(&self, request: &Request) -> String {
        request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn baseline_capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::text_only();
        caps.supports_tools = !self.settings.use_generate_endpoint;
        caps.supports_json_mode = true;
        caps.supports_vision = true;
        caps
    }

    async fn probe_models(&self) -> Option<Capabilities> {
        let raw = self.transport.get_json("api/tags", None).await.ok()?;
        let listing: TagsResponse = serde_json::from_value(raw).ok()?;
        let models = listing.models.into_iter().map(|m| m.name).collect();
        Some(self.baseline_capabilities().with_models(models).probed_now())
    }

    fn endpoint(&self) -> &'static str {
        if self.settings.use_generate_endpoint {
            "api/generate"
        } else {
            "api/chat"
        }
    }

    fn build_body(&self, request: &Request, model: &str) -> Result<serde_json::Value, LlmError> {
        if self.settings.use_generate_endpoint {
            build_generate_body(request, model, PROVIDER_TAG, &self.settings, &self.strip_params)
        } else {
            build_chat_body(request, model, PROVIDER_TAG, &self.settings, &self.strip_params)
        }
    }

    fn response_from_raw(&self, raw: serde_json::Value) -> Result<ProviderResponse, LlmError> {
        let parsed: ResponseLine = serde_json::from_value(raw.clone()).map_err(|e| {
            LlmError::internal(format!("unexpected response shape: {e}"))
                .with_provider(PROVIDER_TAG)
        })?;

        let mut content = Vec::new();
        if let Some(text) = parsed.text() {
            if !text.is_empty() {
                content.push(ResponseContent::Text(text.to_string()));
            }
        }
        if let Some(message) = &parsed.message {
            if let Some(calls) = &message.tool_calls {
                for call in calls {
                    content.push(ResponseContent::ToolCall(ToolCall::new(
                        format!("call_{}", uuid::Uuid::new_v4()),
                        call.function.name.clone(),
                        call.function.arguments.to_string(),
                    )));
                }
            }
        }

        let usage = Usage::new(
            parsed.prompt_eval_count.unwrap_or(0),
            parsed.eval_count.unwrap_or(0),
        );
        Ok(ProviderResponse {
            content,
            usage,
            raw,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaProvider {
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
        let body = self.build_body(&request, &model)?;
        let raw = self
            .transport
            .post_json(
                self.endpoint(),
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
        let body = self.build_body(&request, &model)?;
        let byte_stream = self
            .transport
            .post_stream(
                self.endpoint(),
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
            run_ndjson_stream(byte_stream, sender.clone(), cancel).await;
            collector.on_stream_closed(PROVIDER_TAG, sender.sent_count());
        }))
    }
}
