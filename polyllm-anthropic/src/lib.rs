//! Anthropic-style messages dialect for polyllm.
//!
//! The distinguishing wire conventions: the system prompt is a top-level
//! field hoisted out of the conversation, content is typed block arrays,
//! tool results travel as `tool_result` blocks inside user messages, and
//! streaming uses typed events addressed by content-block index.
//! Authentication is `x-api-key` plus a required `anthropic-version`
//! header.

/// Wire schemas for responses and typed stream events.
mod api_types;
/// Neutral request → messages-endpoint body translation.
mod convert;
/// The provider and its builder.
mod provider;
/// Typed-event stream normalization.
mod stream;

pub use polyllm_provider::QuirkFlags;
pub use provider::{AnthropicBuilder, AnthropicProvider};
