use crate::transport::ByteStream;
use futures::Stream;
use futures_util::StreamExt;
use polyllm_provider::LlmError;

/// Decode a Server-Sent-Events body into its `data:` payloads.
///
/// Non-`data:` lines (event names, comments, ids) and empty data payloads
/// (heartbeats) are skipped. The stream ends after a `[DONE]` sentinel or
/// when the body is exhausted. Byte-level read failures are forwarded
/// once; a partially buffered final line without a newline is delivered
/// if it is a complete `data:` line.
pub fn sse_data_lines(byte_stream: ByteStream) -> impl Stream<Item = Result<String, LlmError>> {
    async_stream::stream! {
        let mut byte_stream = byte_stream;
        let mut buffer = String::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);

                if let Some(data) = parse_data_line(&line) {
                    if data == "[DONE]" {
                        return;
                    }
                    yield Ok(data.to_string());
                }
            }
        }

        let trailing = buffer.trim_end_matches('\r').to_string();
        if let Some(data) = parse_data_line(&trailing) {
            if data != "[DONE]" {
                yield Ok(data.to_string());
            }
        }
    }
}

/// Extract the payload of a `data:` line; `None` for anything else or for
/// heartbeat (empty) payloads.
fn parse_data_line(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() { None } else { Some(data) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn byte_stream(chunks: Vec<&str>) -> ByteStream {
        let chunks: Vec<Result<Bytes, LlmError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        Box::pin(futures::stream::iter(chunks))
    }

    async fn collect(stream: ByteStream) -> Vec<String> {
        sse_data_lines(stream)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_basic_frames() {
        let lines = collect(byte_stream(vec![
            "data: {\"a\":1}\n\ndata: {\"b\":2}\n\n",
            "data: [DONE]\n\n",
        ]))
        .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_payload_split_across_chunks() {
        let lines = collect(byte_stream(vec!["data: {\"par", "tial\":true}\n\n"])).await;
        assert_eq!(lines, vec!["{\"partial\":true}"]);
    }

    #[tokio::test]
    async fn test_ignores_comments_events_and_heartbeats() {
        let lines = collect(byte_stream(vec![
            ": heartbeat\nevent: message_start\ndata:\ndata: {\"ok\":1}\n\n",
        ]))
        .await;
        assert_eq!(lines, vec!["{\"ok\":1}"]);
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let lines = collect(byte_stream(vec!["data: {\"x\":1}\r\n\r\ndata: [DONE]\r\n"])).await;
        assert_eq!(lines, vec!["{\"x\":1}"]);
    }

    #[tokio::test]
    async fn test_stops_at_done_even_with_trailing_frames() {
        let lines = collect(byte_stream(vec![
            "data: {\"x\":1}\n\ndata: [DONE]\n\ndata: {\"y\":2}\n\n",
        ]))
        .await;
        assert_eq!(lines, vec!["{\"x\":1}"]);
    }

    #[tokio::test]
    async fn test_read_error_is_forwarded() {
        let chunks: Vec<Result<Bytes, LlmError>> = vec![
            Ok(Bytes::from_static(b"data: {\"x\":1}\n\n")),
            Err(LlmError::network("connection reset")),
        ];
        let stream: ByteStream = Box::pin(futures::stream::iter(chunks));
        let collected: Vec<_> = sse_data_lines(stream).collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected[0].is_ok());
        assert!(collected[1].is_err());
    }
}
