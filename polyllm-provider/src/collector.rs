use crate::error::LlmError;
use crate::usage::Usage;

/// Observability hook points.
///
/// Providers and the agent loop call these around vendor requests, tool
/// executions, and stream lifecycles. The default implementation does
/// nothing; the runtime never depends on a collector being installed.
pub trait Collector: Send + Sync {
    /// A vendor request is about to be issued.
    fn on_request(&self, _provider: &str, _model: &str) {}

    /// A vendor request completed successfully.
    fn on_response(&self, _provider: &str, _model: &str, _usage: &Usage) {}

    /// A vendor request failed after retries.
    fn on_error(&self, _provider: &str, _error: &LlmError) {}

    /// A tool is about to be executed.
    fn on_tool_call(&self, _tool: &str, _call_id: &str) {}

    /// A tool execution finished; `ok` is false for error outputs.
    fn on_tool_result(&self, _tool: &str, _call_id: &str, _ok: bool) {}

    /// A stream closed after delivering `events` events.
    fn on_stream_closed(&self, _provider: &str, _events: u64) {}
}

/// The collector used when none is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCollector;

impl Collector for NoopCollector {}
