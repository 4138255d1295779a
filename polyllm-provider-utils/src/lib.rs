//! Shared plumbing for polyllm provider implementations: the HTTP
//! transport with retry/backoff/cancellation, the error classifier, the
//! SSE and NDJSON frame decoders, the bounded event channel, the
//! capability cache, and the simulated-stream fallback.

/// Lazily probed capability snapshots.
pub mod capability_cache;
/// Vendor error classification into the closed taxonomy.
pub mod classify;
/// Bounded event channel + worker spawning.
pub mod event_stream;
/// Newline-delimited JSON framing.
pub mod ndjson;
/// Server-Sent-Events framing.
pub mod sse;
/// Single-shot replay for non-streaming endpoints.
pub mod simulate;
/// HTTP request execution.
pub mod transport;

pub use capability_cache::CapabilityCache;
pub use classify::{classify_response, parse_retry_after};
pub use event_stream::{EVENT_CHANNEL_CAPACITY, EventSender, link_abort, spawn_event_stream};
pub use ndjson::ndjson_lines;
pub use simulate::simulated_events;
pub use sse::sse_data_lines;
pub use transport::{AuthScheme, ByteStream, HttpTransport};
