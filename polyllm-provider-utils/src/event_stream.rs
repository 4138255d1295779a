use polyllm_provider::{ChatStream, StreamEvent, StreamHandle};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffered capacity of the neutral event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The producing side of a normalized event stream.
///
/// Non-terminal events are delivered best-effort: when the buffer is full
/// the newest event is dropped (and logged). Terminal events use an
/// awaited send so a `Finish` or `Error` is never lost to backpressure.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StreamEvent>,
    sent: Arc<std::sync::atomic::AtomicU64>,
}

impl EventSender {
    /// Emit a non-terminal event. Dropped (with a warning) when the
    /// caller is not keeping up; never blocks the worker.
    pub fn emit(&self, event: StreamEvent) {
        debug_assert!(!event.is_terminal(), "terminal events go through finish()");
        match self.tx.try_send(event) {
            Ok(()) => {
                self.sent
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("event channel full, dropping stream event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Emit a terminal event, waiting for channel space if needed. The
    /// send fails silently only when the caller already closed the
    /// channel.
    pub async fn finish(&self, event: StreamEvent) {
        debug_assert!(event.is_terminal(), "finish() requires a terminal event");
        if self.tx.send(event).await.is_ok() {
            self.sent
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Number of events delivered so far (drops excluded).
    pub fn sent_count(&self) -> u64 {
        self.sent.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Forward a caller-supplied abort token into a stream's own token so
/// either of them stops the worker. The forwarding task exits as soon as
/// one side fires.
pub fn link_abort(cancel: &CancellationToken, user_abort: Option<CancellationToken>) {
    if let Some(user_abort) = user_abort {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = user_abort.cancelled() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        });
    }
}

/// Spawn a stream worker and wire it to a [`ChatStream`].
///
/// The worker receives the sender and a cancellation token; it must emit
/// `StreamEvent::Start` first and exactly one terminal event last, and is
/// expected to select against the token at every suspension point.
pub fn spawn_event_stream<F, Fut>(run: F) -> ChatStream
where
    F: FnOnce(EventSender, CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let sender = EventSender {
        tx,
        sent: Arc::new(std::sync::atomic::AtomicU64::new(0)),
    };
    let worker = tokio::spawn(run(sender, cancel.clone()));
    ChatStream::new(rx, Arc::new(StreamHandle::new(cancel, worker)))
}
