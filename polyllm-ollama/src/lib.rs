//! Local NDJSON dialect for polyllm.
//!
//! Speaks the Ollama wire protocol: a chat endpoint loosely mirroring
//! the OpenAI shape, a simpler generate endpoint consuming one prompt
//! string, per-model sampling options in a nested bag, base64 image
//! arrays on messages, and newline-delimited JSON streaming. Local
//! endpoints need no authentication.

/// Wire schemas shared by both endpoints.
mod api_types;
/// Neutral request → chat/generate body translation.
mod convert;
/// The provider and its builder.
mod provider;
/// NDJSON stream normalization.
mod stream;

pub use convert::LocalSettings;
pub use polyllm_provider::QuirkFlags;
pub use provider::{OllamaBuilder, OllamaProvider};
