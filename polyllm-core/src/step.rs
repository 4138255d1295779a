use chrono::{DateTime, Utc};
use polyllm_provider::{ToolCall, ToolOutput};

/// One full iteration of the agent loop: one model call plus any tool
/// executions it triggered.
///
/// Invariant: `tool_results` is either empty (single-shot surfacing) or
/// pairs with `tool_calls` index-by-index, sharing ids. Steps are
/// appended once and never mutated.
#[derive(Debug, Clone)]
pub struct Step {
    /// Zero-based position in the loop.
    pub step_number: usize,
    /// The assistant text of this step; fragments joined with a newline.
    pub text: String,
    /// Tool calls in the order the model returned them.
    pub tool_calls: Vec<ToolCall>,
    /// Outcomes, committed in call order.
    pub tool_results: Vec<ToolOutput>,
    /// When the step was assembled.
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(
        step_number: usize,
        text: String,
        tool_calls: Vec<ToolCall>,
        tool_results: Vec<ToolOutput>,
    ) -> Self {
        debug_assert!(
            tool_results.is_empty() || tool_results.len() == tool_calls.len(),
            "tool results must be empty or pair with tool calls"
        );
        Self {
            step_number,
            text,
            tool_calls,
            tool_results,
            timestamp: Utc::now(),
        }
    }

    /// True when the model produced no tool calls in this step.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}
