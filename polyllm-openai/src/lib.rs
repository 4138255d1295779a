//! OpenAI-style chat-completions dialect for polyllm.
//!
//! Covers the OpenAI API and the many endpoints that mirror it (Azure
//! OpenAI, vLLM, LM Studio, ...): flat message arrays, function tools,
//! `tool_call_id` correlation, SSE streaming with positional tool-call
//! fragments, and `json_object`/`json_schema` response formats.

/// Wire schemas for responses and stream chunks.
mod api_types;
/// Neutral request → chat-completions body translation.
mod convert;
/// The provider and its builder.
mod provider;
/// SSE stream normalization.
mod stream;

pub use polyllm_provider::QuirkFlags;
pub use provider::{OpenAiBuilder, OpenAiProvider};
