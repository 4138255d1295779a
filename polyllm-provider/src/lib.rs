//! Neutral provider contract for the polyllm runtime.
//!
//! This crate defines the data model shared by every chat backend — the
//! message/part/request shapes, the normalized stream event sequence, the
//! closed error taxonomy — and the [`ChatModel`] trait dialect crates
//! implement. It contains no HTTP or vendor logic.

/// Capability snapshot cached per provider.
pub mod capabilities;
/// The `ChatModel` trait implemented by every dialect.
pub mod chat_model;
/// Observability hook points.
pub mod collector;
/// Closed error taxonomy with retry semantics.
pub mod error;
/// Neutral streaming events.
pub mod event;
/// Roles, parts, and messages.
pub mod message;
/// Endpoint feature-disable switches.
pub mod quirks;
/// The neutral request and response-format types.
pub mod request;
/// Completed-response shapes.
pub mod response;
/// The caller-facing event stream and its close handle.
pub mod stream;
/// Tool declarations, calls, and outputs.
pub mod tool;
/// Token usage accounting.
pub mod usage;

pub use capabilities::Capabilities;
pub use chat_model::ChatModel;
pub use collector::{Collector, NoopCollector};
pub use error::{ErrorKind, LlmError};
pub use event::StreamEvent;
pub use message::{ImageSource, Message, Part, Role};
pub use quirks::QuirkFlags;
pub use request::{ProviderOptions, Request, ResponseFormat};
pub use response::{ProviderResponse, ResponseContent};
pub use stream::{ChatStream, StreamHandle};
pub use tool::{ToolCall, ToolChoice, ToolDef, ToolOutput};
pub use usage::Usage;
