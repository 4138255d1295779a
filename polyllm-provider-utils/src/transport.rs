use crate::classify::{classify_response, parse_retry_after};
use bytes::Bytes;
use futures::Stream;
use polyllm_provider::{ErrorKind, LlmError};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A byte stream from a vendor response body, with errors already
/// classified.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// How a provider authenticates its requests.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>` — most cloud vendors.
    Bearer(String),
    /// A custom header, e.g. `x-api-key`.
    Header { name: String, value: String },
    /// No authentication — local endpoints.
    None,
}

/// One vendor HTTP connection: base URL, credentials, default headers,
/// and the retry policy. Shared by every request on a provider instance;
/// the inner `reqwest::Client` pools idle connections per host.
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    auth: AuthScheme,
    provider_tag: String,
    default_headers: HashMap<String, String>,
    user_agent: String,
    max_retries: u32,
    base_delay: Duration,
    default_retry_after: Duration,
}

impl HttpTransport {
    /// Create a transport for one provider endpoint. Fails with
    /// `InvalidRequest` when the base URL does not parse.
    pub fn new(provider_tag: impl Into<String>, base_url: &str) -> Result<Self, LlmError> {
        let provider_tag = provider_tag.into();
        let mut base_url = Url::parse(base_url)
            .map_err(|e| LlmError::invalid_request(format!("invalid base url: {e}")))?;
        // Url::join treats a base without a trailing slash as a file path
        // and would drop its last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(8)
                .build()
                .map_err(|e| LlmError::internal(format!("failed to build http client: {e}")))?,
            base_url,
            auth: AuthScheme::None,
            provider_tag,
            default_headers: HashMap::new(),
            user_agent: concat!("polyllm/", env!("CARGO_PKG_VERSION")).to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            default_retry_after: Duration::from_secs(30),
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_auth(mut self, auth: AuthScheme) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.default_headers.extend(headers);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_default_retry_after(mut self, default_retry_after: Duration) -> Self {
        self.default_retry_after = default_retry_after;
        self
    }

    pub fn provider_tag(&self) -> &str {
        &self.provider_tag
    }

    fn endpoint(&self, path: &str) -> Result<Url, LlmError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| LlmError::invalid_request(format!("invalid endpoint path {path:?}: {e}")))
    }

    fn apply_headers(
        &self,
        mut builder: reqwest::RequestBuilder,
        extra: Option<&HashMap<String, String>>,
    ) -> reqwest::RequestBuilder {
        builder = builder
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json");
        match &self.auth {
            AuthScheme::Bearer(token) => {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }
            AuthScheme::Header { name, value } => {
                builder = builder.header(name.as_str(), value.as_str());
            }
            AuthScheme::None => {}
        }
        for (name, value) in &self.default_headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(extra) = extra {
            for (name, value) in extra {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        builder
    }

    fn classify_send_error(&self, error: reqwest::Error) -> LlmError {
        let err = if error.is_timeout() {
            LlmError::timeout(error.to_string())
        } else {
            LlmError::network(error.to_string())
        };
        err.with_provider(&self.provider_tag)
    }

    async fn error_from_response(&self, response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        classify_response(
            &self.provider_tag,
            status,
            retry_after,
            &body,
            self.default_retry_after,
        )
    }

    /// Send one attempt, racing the cancellation token.
    async fn send_once(
        &self,
        builder: reqwest::RequestBuilder,
        abort: &CancellationToken,
    ) -> Result<reqwest::Response, LlmError> {
        tokio::select! {
            _ = abort.cancelled() => Err(LlmError::canceled().with_provider(&self.provider_tag)),
            result = builder.send() => match result {
                Ok(response) if response.status().is_success() => Ok(response),
                Ok(response) => Err(self.error_from_response(response).await),
                Err(error) => Err(self.classify_send_error(error)),
            },
        }
    }

    /// Jittered exponential backoff: `base_delay * 2^attempt`, ±10%,
    /// overridden by a vendor Retry-After when present.
    fn backoff_delay(&self, attempt: u32, error: &LlmError) -> Duration {
        if let Some(retry_after) = error.retry_after {
            return retry_after;
        }
        let exp = self.base_delay.saturating_mul(1 << attempt.min(16));
        let jitter = rand::thread_rng().gen_range(0.9..1.1);
        exp.mul_f64(jitter)
    }

    /// Execute with retries. `build` recreates the request for every
    /// attempt so the body is re-serialized verbatim each time.
    async fn execute<F>(
        &self,
        build: F,
        abort: &CancellationToken,
    ) -> Result<reqwest::Response, LlmError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            match self.send_once(build(), abort).await {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if attempt >= self.max_retries || !error.is_retryable() {
                        return Err(error);
                    }
                    let delay = self.backoff_delay(attempt, &error);
                    log::debug!(
                        "{}: retrying after {:?} ({}), attempt {}/{}",
                        self.provider_tag,
                        delay,
                        error.kind,
                        attempt + 1,
                        self.max_retries
                    );
                    tokio::select! {
                        _ = abort.cancelled() => {
                            return Err(LlmError::canceled().with_provider(&self.provider_tag));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json(
        &self,
        path: &str,
        body: &Value,
        headers: Option<&HashMap<String, String>>,
        abort: Option<&CancellationToken>,
    ) -> Result<Value, LlmError> {
        let url = self.endpoint(path)?;
        let abort = abort.cloned().unwrap_or_default();
        let response = self
            .execute(
                || {
                    self.apply_headers(self.client.post(url.clone()), headers)
                        .json(body)
                },
                &abort,
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| {
                LlmError::internal(format!("failed to decode response body: {e}"))
                    .with_provider(&self.provider_tag)
            })
    }

    /// GET a JSON document (capability probes).
    pub async fn get_json(
        &self,
        path: &str,
        abort: Option<&CancellationToken>,
    ) -> Result<Value, LlmError> {
        let url = self.endpoint(path)?;
        let abort = abort.cloned().unwrap_or_default();
        let response = self
            .execute(|| self.apply_headers(self.client.get(url.clone()), None), &abort)
            .await?;
        response
            .json()
            .await
            .map_err(|e| {
                LlmError::internal(format!("failed to decode response body: {e}"))
                    .with_provider(&self.provider_tag)
            })
    }

    /// POST a JSON body and return the raw response byte stream.
    ///
    /// Retries apply to establishing the stream; body read failures after
    /// that are stream-terminal and surface as classified errors on the
    /// stream itself.
    pub async fn post_stream(
        &self,
        path: &str,
        body: &Value,
        headers: Option<&HashMap<String, String>>,
        abort: Option<&CancellationToken>,
    ) -> Result<ByteStream, LlmError> {
        use futures_util::StreamExt;

        let url = self.endpoint(path)?;
        let abort = abort.cloned().unwrap_or_default();
        let response = self
            .execute(
                || {
                    self.apply_headers(self.client.post(url.clone()), headers)
                        .json(body)
                },
                &abort,
            )
            .await?;
        let provider_tag = self.provider_tag.clone();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                let err = if e.is_timeout() {
                    LlmError::timeout(e.to_string())
                } else {
                    LlmError::network(e.to_string())
                };
                err.with_provider(provider_tag.clone())
            })
        });
        Ok(Box::pin(stream))
    }
}
