use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A snapshot of what a provider endpoint can do.
///
/// Cached per provider instance and refreshed lazily by a best-effort
/// models-endpoint probe; the value is only guaranteed to have been true
/// at some recent point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Model ids the endpoint advertised, empty when never probed.
    pub models: Vec<String>,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    pub supports_json_schema: bool,
    pub supports_vision: bool,
    /// Largest context window across advertised models, when known.
    pub max_context_window: Option<u64>,
    /// When the models endpoint was last probed successfully.
    pub last_probed_at: Option<DateTime<Utc>>,
}

impl Capabilities {
    /// A conservative baseline: streaming text only, nothing probed.
    pub fn text_only() -> Self {
        Self {
            models: Vec::new(),
            supports_tools: false,
            supports_streaming: true,
            supports_json_mode: false,
            supports_json_schema: false,
            supports_vision: false,
            max_context_window: None,
            last_probed_at: None,
        }
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn probed_now(mut self) -> Self {
        self.last_probed_at = Some(Utc::now());
        self
    }
}
