use crate::transport::ByteStream;
use futures::Stream;
use futures_util::StreamExt;
use polyllm_provider::LlmError;

/// Decode a newline-delimited-JSON body into one line per item.
///
/// Blank lines are skipped; a trailing line without a newline is
/// delivered. Byte-level read failures are forwarded once and end the
/// stream.
pub fn ndjson_lines(byte_stream: ByteStream) -> impl Stream<Item = Result<String, LlmError>> {
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
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if !line.is_empty() {
                    yield Ok(line);
                }
            }
        }

        let trailing = buffer.trim().to_string();
        if !trailing.is_empty() {
            yield Ok(trailing);
        }
    }
}
