use crate::api_types::{ApiUsage, ChatChunk};
use futures_util::StreamExt;
use polyllm_provider::{LlmError, StreamEvent, ToolCall, Usage};
use polyllm_provider_utils::transport::ByteStream;
use polyllm_provider_utils::{EventSender, sse_data_lines};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Accumulates one tool call's fragments across chunks at a fixed index.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_call(self) -> ToolCall {
        let arguments = if self.arguments.is_empty() {
            "{}".to_string()
        } else {
            self.arguments
        };
        ToolCall::new(self.id, self.name, arguments)
    }
}

fn usage_from_api(usage: &ApiUsage) -> Usage {
    Usage::with_total(
        usage.prompt_tokens.unwrap_or(0),
        usage.completion_tokens.unwrap_or(0),
        usage.total_tokens,
    )
}

/// Normalize an OpenAI-style SSE stream into the neutral event sequence.
///
/// Emits `Start` immediately, text deltas as they arrive, and each tool
/// call once its fragments (indexed by position) are complete — flushed
/// when a `finish_reason` is observed. A trailing usage-only chunk is
/// honored. Malformed chunks are skipped; a body read failure terminates
/// the stream with a single `Error`.
pub(crate) async fn run_sse_stream(
    byte_stream: ByteStream,
    sender: EventSender,
    cancel: CancellationToken,
) {
    sender.emit(StreamEvent::Start);

    let mut lines = Box::pin(sse_data_lines(byte_stream));
    let mut tool_calls: BTreeMap<usize, ToolCallAccumulator> = BTreeMap::new();
    let mut flushed = false;
    let mut usage: Option<Usage> = None;

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                sender.finish(StreamEvent::Error(LlmError::canceled())).await;
                return;
            }
            line = lines.next() => line,
        };
        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(error)) => {
                sender.finish(StreamEvent::Error(error)).await;
                return;
            }
            None => break,
        };

        let chunk: ChatChunk = match serde_json::from_str(&line) {
            Ok(chunk) => chunk,
            Err(error) => {
                log::debug!("skipping malformed stream chunk: {error}");
                continue;
            }
        };

        if let Some(api_usage) = &chunk.usage {
            usage = Some(usage_from_api(api_usage));
        }

        let Some(choice) = chunk.choices.first() else {
            continue;
        };

        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                sender.emit(StreamEvent::text_delta(content.clone()));
            }
        }

        if let Some(calls) = &choice.delta.tool_calls {
            for call in calls {
                let index = call.index.unwrap_or(0) as usize;
                let accumulator = tool_calls.entry(index).or_default();
                if let Some(id) = &call.id {
                    accumulator.id.push_str(id);
                }
                if let Some(function) = &call.function {
                    if let Some(name) = &function.name {
                        accumulator.name.push_str(name);
                    }
                    if let Some(arguments) = &function.arguments {
                        accumulator.arguments.push_str(arguments);
                    }
                }
            }
        }

        if choice.finish_reason.is_some() && !flushed {
            for (_, accumulator) in std::mem::take(&mut tool_calls) {
                sender.emit(StreamEvent::ToolCall(accumulator.into_call()));
            }
            flushed = true;
        }
    }

    // A stream that ended without a finish_reason still flushes whatever
    // accumulated completely.
    if !flushed {
        for (_, accumulator) in std::mem::take(&mut tool_calls) {
            sender.emit(StreamEvent::ToolCall(accumulator.into_call()));
        }
    }

    sender.finish(StreamEvent::finish(usage)).await;
}
