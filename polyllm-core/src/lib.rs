//! Core operations of the polyllm runtime.
//!
//! Four operations over any [`polyllm_provider::ChatModel`]: synchronous
//! and streaming text generation, synchronous and streaming
//! structured-object generation — each with optional multi-step tool
//! execution driven by the agent loop.
//!
//! ```no_run
//! use polyllm_core::{GenerateText, no_more_tools};
//! use polyllm_provider::{ChatModel, Message};
//! use std::sync::Arc;
//!
//! # async fn example(model: Arc<dyn ChatModel>, tools: polyllm_core::ToolSet)
//! #     -> Result<(), polyllm_provider::LlmError> {
//! let result = GenerateText::new(model, vec![Message::user("What is 15+27?")])
//!     .tools(tools)
//!     .stop_when(no_more_tools())
//!     .execute()
//!     .await?;
//! println!("{}", result.text);
//! # Ok(())
//! # }
//! ```

/// Synchronous structured-object generation.
pub mod generate_object;
/// Synchronous text generation and the agent loop.
pub mod generate_text;
/// Step records produced by the loop.
pub mod step;
/// Stop-condition predicates for the loop.
pub mod stop_condition;
/// Streaming structured-object generation.
pub mod stream_object;
/// Streaming text generation.
pub mod stream_text;
/// Structured-output coercion shared by the object operations.
mod structured;
/// The tool runtime contract.
pub mod tool;

pub use generate_object::{GenerateObject, ObjectResult};
pub use generate_text::{GenerateText, MAX_LOOP_STEPS, TextResult};
pub use step::Step;
pub use stop_condition::{
    AnyOf, MaxSteps, NoMoreTools, StopCondition, UntilToolSeen, any_of, max_steps, no_more_tools,
    until_tool_seen,
};
pub use stream_object::{ObjectStream, StreamObject};
pub use stream_text::StreamText;
pub use tool::{Tool, ToolCallContext, ToolSet, tool};

/// The most commonly used surface in one import.
pub mod prelude {
    pub use crate::{
        GenerateObject, GenerateText, ObjectResult, ObjectStream, Step, StopCondition, StreamObject,
        StreamText, TextResult, Tool, ToolSet, any_of, max_steps, no_more_tools, tool,
        until_tool_seen,
    };
    pub use polyllm_provider::{
        Capabilities, ChatModel, ChatStream, ErrorKind, LlmError, Message, Part, Request, Role,
        StreamEvent, ToolCall, ToolChoice, ToolDef, ToolOutput, Usage,
    };
}
