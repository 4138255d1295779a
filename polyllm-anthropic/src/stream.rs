use crate::api_types::{BlockDelta, BlockStart, StreamChunk, StreamError};
use futures_util::StreamExt;
use polyllm_provider::{ErrorKind, LlmError, StreamEvent, ToolCall, Usage};
use polyllm_provider_utils::transport::ByteStream;
use polyllm_provider_utils::{EventSender, sse_data_lines};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Per-index accumulator for an open content block.
enum BlockAccumulator {
    Text,
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

fn error_from_stream(error: StreamError) -> LlmError {
    let kind = match error.error_type.as_str() {
        "rate_limit_error" => ErrorKind::RateLimited,
        "overloaded_error" => ErrorKind::Overloaded,
        "invalid_request_error" => ErrorKind::InvalidRequest,
        "authentication_error" => ErrorKind::Unauthorized,
        _ => ErrorKind::Internal,
    };
    LlmError::new(kind, error.message)
}

/// Normalize a typed-event SSE stream into the neutral event sequence.
///
/// Text deltas are forwarded immediately; `input_json_delta` fragments
/// accumulate silently per content-block index and become one `ToolCall`
/// at `content_block_stop` (with `{}` substituted when the accumulated
/// JSON does not parse). Usage merges input tokens from `message_start`
/// with output tokens from `message_delta`.
pub(crate) async fn run_sse_stream(
    byte_stream: ByteStream,
    sender: EventSender,
    cancel: CancellationToken,
) {
    sender.emit(StreamEvent::Start);

    let mut lines = Box::pin(sse_data_lines(byte_stream));
    let mut blocks: HashMap<u32, BlockAccumulator> = HashMap::new();
    let mut input_tokens = 0u64;
    let mut output_tokens = 0u64;
    let mut saw_usage = false;

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

        let chunk: StreamChunk = match serde_json::from_str(&line) {
            Ok(chunk) => chunk,
            Err(error) => {
                log::debug!("skipping malformed stream event: {error}");
                continue;
            }
        };

        match chunk {
            StreamChunk::Ping => {}
            StreamChunk::MessageStart { message } => {
                input_tokens = message.usage.input_tokens;
                output_tokens = message.usage.output_tokens;
                saw_usage = true;
            }
            StreamChunk::ContentBlockStart {
                index,
                content_block,
            } => {
                let accumulator = match content_block {
                    BlockStart::Text { text } => {
                        if !text.is_empty() {
                            sender.emit(StreamEvent::text_delta(text));
                        }
                        BlockAccumulator::Text
                    }
                    BlockStart::ToolUse { id, name } => BlockAccumulator::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    },
                };
                blocks.insert(index, accumulator);
            }
            StreamChunk::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => {
                    if !text.is_empty() {
                        sender.emit(StreamEvent::text_delta(text));
                    }
                }
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(BlockAccumulator::ToolUse { input_json, .. }) =
                        blocks.get_mut(&index)
                    {
                        input_json.push_str(&partial_json);
                    }
                }
            },
            StreamChunk::ContentBlockStop { index } => {
                if let Some(BlockAccumulator::ToolUse {
                    id,
                    name,
                    input_json,
                }) = blocks.remove(&index)
                {
                    // Substitute an empty object when the accumulated
                    // fragments do not form valid JSON.
                    let input = if serde_json::from_str::<serde_json::Value>(&input_json).is_ok() {
                        input_json
                    } else {
                        "{}".to_string()
                    };
                    sender.emit(StreamEvent::ToolCall(ToolCall::new(id, name, input)));
                }
            }
            StreamChunk::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    output_tokens = usage.output_tokens;
                    saw_usage = true;
                }
            }
            StreamChunk::MessageStop => break,
            StreamChunk::Error { error } => {
                sender
                    .finish(StreamEvent::Error(error_from_stream(error)))
                    .await;
                return;
            }
        }
    }

    let usage = saw_usage.then(|| Usage::new(input_tokens, output_tokens));
    sender.finish(StreamEvent::finish(usage)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use polyllm_provider_utils::spawn_event_stream;

    fn byte_stream(events: &[&str]) -> ByteStream {
        let chunks: Vec<Result<Bytes, LlmError>> = events
            .iter()
            .map(|e| Ok(Bytes::from(format!("data: {e}\n\n"))))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    async fn collect_events(stream: ByteStream) -> Vec<StreamEvent> {
        let mut chat_stream =
            spawn_event_stream(move |sender, cancel| run_sse_stream(stream, sender, cancel));
        let mut events = Vec::new();
        while let Some(event) = chat_stream.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        chat_stream.close().await;
        events
    }

    #[tokio::test]
    async fn test_text_stream() {
        let events = collect_events(byte_stream(&[
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":10,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" world"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            r#"{"type":"message_stop"}"#,
        ]))
        .await;

        assert!(matches!(events[0], StreamEvent::Start));
        let text: String = events.iter().filter_map(|e| e.delta()).collect();
        assert_eq!(text, "Hello world");
        match events.last().unwrap() {
            StreamEvent::Finish { usage } => {
                let usage = usage.unwrap();
                assert_eq!(usage.input_tokens, 10);
                assert_eq!(usage.output_tokens, 3);
                assert_eq!(usage.total_tokens, 13);
            }
            other => panic!("expected finish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_use_block_accumulates_silently() {
        let events = collect_events(byte_stream(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":5,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"calculator","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"expre"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"ssion\":\"15+27\"}"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_stop"}"#,
        ]))
        .await;

        // No text deltas; one complete tool call.
        assert!(events.iter().all(|e| !e.is_text_delta()));
        let calls: Vec<&ToolCall> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(
            calls[0].input_json(),
            serde_json::json!({"expression": "15+27"})
        );
    }

    #[tokio::test]
    async fn test_unparseable_tool_input_becomes_empty_object() {
        let events = collect_events(byte_stream(&[
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"calculator","input":{}}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"truncated"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_stop"}"#,
        ]))
        .await;

        let call = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::ToolCall(call) => Some(call),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.input, "{}");
    }

    #[tokio::test]
    async fn test_interleaved_text_and_tool_blocks() {
        let events = collect_events(byte_stream(&[
            r#"{"type":"message_start","message":{"usage":{"input_tokens":8,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"I'll compute that."}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"calculator","input":{}}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"expression\":\"15+27\"}"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":12}}"#,
            r#"{"type":"message_stop"}"#,
        ]))
        .await;

        let text: String = events.iter().filter_map(|e| e.delta()).collect();
        assert_eq!(text, "I'll compute that.");
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ToolCall(call) if call.name == "calculator")));
    }

    #[tokio::test]
    async fn test_ping_is_ignored_and_error_terminates() {
        let events = collect_events(byte_stream(&[
            r#"{"type":"ping"}"#,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ]))
        .await;

        assert_eq!(events.len(), 2);
        match events.last().unwrap() {
            StreamEvent::Error(error) => assert_eq!(error.kind, ErrorKind::Overloaded),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
