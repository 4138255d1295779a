use crate::api_types::ResponseLine;
use futures_util::StreamExt;
use polyllm_provider::{LlmError, StreamEvent, ToolCall, Usage};
use polyllm_provider_utils::transport::ByteStream;
use polyllm_provider_utils::{EventSender, ndjson_lines};
use tokio_util::sync::CancellationToken;

/// Normalize an NDJSON body into the neutral event sequence.
///
/// Each line is one response-shaped object: text becomes a delta, tool
/// calls arrive with complete arguments per line, and the `done = true`
/// line carries the token counts for the `Finish` event.
pub(crate) async fn run_ndjson_stream(
    byte_stream: ByteStream,
    sender: EventSender,
    cancel: CancellationToken,
) {
    sender.emit(StreamEvent::Start);

    let mut lines = Box::pin(ndjson_lines(byte_stream));
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

        let parsed: ResponseLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(error) => {
                log::debug!("skipping malformed stream line: {error}");
                continue;
            }
        };

        if let Some(text) = parsed.text() {
            if !text.is_empty() {
                sender.emit(StreamEvent::text_delta(text));
            }
        }

        if let Some(message) = &parsed.message {
            if let Some(calls) = &message.tool_calls {
                for call in calls {
                    // No vendor-assigned id on this dialect; synthesize
                    // the correlation key.
                    sender.emit(StreamEvent::ToolCall(ToolCall::new(
                        format!("call_{}", uuid::Uuid::new_v4()),
                        call.function.name.clone(),
                        call.function.arguments.to_string(),
                    )));
                }
            }
        }

        if parsed.done {
            usage = Some(Usage::new(
                parsed.prompt_eval_count.unwrap_or(0),
                parsed.eval_count.unwrap_or(0),
            ));
            break;
        }
    }

    sender.finish(StreamEvent::finish(usage)).await;
}
