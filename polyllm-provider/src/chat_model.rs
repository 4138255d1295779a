use crate::capabilities::Capabilities;
use crate::error::LlmError;
use crate::request::Request;
use crate::response::ProviderResponse;
use crate::stream::ChatStream;
use async_trait::async_trait;

/// The contract every chat backend implements.
///
/// One implementation per wire dialect; the agent loop and the public
/// operations are written against this trait only, so dialect variation
/// stays orthogonal to orchestration. Implementations are created once
/// and are safe for concurrent use.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Stable tag naming the provider ("openai", "anthropic", "ollama").
    /// Also the key under which [`Request::provider_options`] are read.
    fn provider_tag(&self) -> &str;

    /// The model used when a request does not name one.
    fn model_id(&self) -> &str;

    /// A snapshot of the endpoint's capabilities, probed lazily and
    /// cached. Probe failures are non-fatal; the baseline is returned.
    async fn capabilities(&self) -> Capabilities;

    /// Issue one completed (non-streaming) chat request.
    async fn generate(&self, request: Request) -> Result<ProviderResponse, LlmError>;

    /// Issue one streaming chat request, returning the normalized event
    /// stream. When the endpoint (or its configuration) cannot stream,
    /// implementations simulate the stream from a single-shot call; the
    /// two paths are indistinguishable by event types.
    async fn stream(&self, request: Request) -> Result<ChatStream, LlmError>;
}
