use crate::event::StreamEvent;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `close()` waits for the stream worker before giving up on it.
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the background resources of an open stream: the cancellation
/// token shared with the worker and the worker task itself.
///
/// The worker and the event channel reference each other only through
/// this handle, so teardown is a plain ordered sequence rather than a
/// reference cycle.
pub struct StreamHandle {
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamHandle {
    pub fn new(cancel: CancellationToken, worker: JoinHandle<()>) -> Self {
        Self {
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The token the worker selects against at every suspension point.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Release the stream: signal cancellation, then wait for the worker
    /// with a bounded timeout. Idempotent; later calls are no-ops.
    pub async fn close(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().map_or(None, |mut guard| guard.take());
        if let Some(worker) = worker {
            if tokio::time::timeout(WORKER_JOIN_TIMEOUT, worker).await.is_err() {
                log::warn!("stream worker did not stop within {:?}", WORKER_JOIN_TIMEOUT);
            }
        }
    }
}

/// The caller-facing side of a normalized event stream: a bounded channel
/// of [`StreamEvent`]s plus the close handle releasing the HTTP body,
/// worker, and channel.
pub struct ChatStream {
    rx: mpsc::Receiver<StreamEvent>,
    handle: Arc<StreamHandle>,
}

impl ChatStream {
    pub fn new(rx: mpsc::Receiver<StreamEvent>, handle: Arc<StreamHandle>) -> Self {
        Self { rx, handle }
    }

    /// The next event, or `None` once the channel has closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// The close handle, shareable independently of the event receiver.
    pub fn handle(&self) -> Arc<StreamHandle> {
        Arc::clone(&self.handle)
    }

    /// Release all stream resources. Idempotent. The channel is guaranteed
    /// drained-and-closed afterwards.
    pub async fn close(&mut self) {
        self.handle.close().await;
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }

    /// Drain the stream to completion, concatenating text deltas.
    /// Returns the stream's error when it terminates abnormally.
    pub async fn collect_text(&mut self) -> Result<String, crate::error::LlmError> {
        let mut text = String::new();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::TextDelta { text: delta } => text.push_str(&delta),
                StreamEvent::Finish { .. } => break,
                StreamEvent::Error(error) => return Err(error),
                _ => {}
            }
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_idle_stream() -> (mpsc::Sender<StreamEvent>, ChatStream) {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let worker = tokio::spawn(async move {
            worker_cancel.cancelled().await;
        });
        let handle = Arc::new(StreamHandle::new(cancel, worker));
        (tx, ChatStream::new(rx, handle))
    }

    #[tokio::test]
    async fn test_events_flow_in_order() {
        let (tx, mut stream) = spawn_idle_stream();
        tx.send(StreamEvent::Start).await.unwrap();
        tx.send(StreamEvent::text_delta("hi")).await.unwrap();
        tx.send(StreamEvent::finish(None)).await.unwrap();
        drop(tx);

        assert!(matches!(stream.next_event().await, Some(StreamEvent::Start)));
        assert_eq!(stream.next_event().await.unwrap().delta(), Some("hi"));
        assert!(stream.next_event().await.unwrap().is_terminal());
        assert!(stream.next_event().await.is_none());
        stream.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_tx, mut stream) = spawn_idle_stream();
        stream.close().await;
        stream.close().await;
        assert!(stream.next_event().await.is_none());
    }
}
