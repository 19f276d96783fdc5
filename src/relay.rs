//! Relay channel between a producing exchange and its consumer.
//!
//! A bounded, closeable queue of text fragments. The producer either waits
//! for capacity (`send`) or drops the fragment when the queue is full
//! (`try_send`, usable from threads outside the runtime). Closing is
//! idempotent and visible to both sides:
//!
//! - a producer-side close lets the consumer drain what was queued, then
//!   reports end-of-stream;
//! - a consumer-side close (or dropping the receiver) discards queued items,
//!   ends the stream immediately and tells the producer to stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use log::{trace, warn};
use tokio::sync::{mpsc, Notify};

/// One item delivered to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayItem {
    /// A decoded body fragment.
    Fragment(String),
    /// The terminal error of the exchange; the channel closes after it.
    Error(String),
}

impl RelayItem {
    pub fn is_error(&self) -> bool {
        matches!(self, RelayItem::Error(_))
    }
}

#[derive(Debug)]
struct Shared {
    closed: AtomicBool,
    notify: Notify,
}

impl Shared {
    /// Returns `true` if this call performed the close.
    fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::AcqRel);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Creates a relay channel holding at most `capacity` queued items.
///
/// A `capacity` of zero is treated as one.
pub fn channel(capacity: usize) -> (RelaySender, RelayReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        closed: AtomicBool::new(false),
        notify: Notify::new(),
    });
    (
        RelaySender {
            tx,
            shared: shared.clone(),
        },
        RelayReceiver {
            rx,
            shared,
            terminated: false,
        },
    )
}

/// Producer half. Cheap to clone; all clones share the closed flag.
#[derive(Debug, Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayItem>,
    shared: Arc<Shared>,
}

impl RelaySender {
    /// Queues a fragment, waiting for capacity. A no-op once the channel is closed.
    pub async fn send(&self, text: impl Into<String>) {
        self.deliver(RelayItem::Fragment(text.into())).await;
    }

    /// Queues the terminal error item, waiting for capacity.
    pub async fn send_error(&self, message: impl Into<String>) {
        self.deliver(RelayItem::Error(message.into())).await;
    }

    async fn deliver(&self, item: RelayItem) {
        // Registered before the check so a concurrent close cannot be missed
        let notified = self.shared.notify.notified();
        if self.shared.is_closed() {
            trace!("Relay closed, discarding {item:?}");
            return;
        }
        tokio::select! {
            biased;
            _ = notified => {}
            res = self.tx.send(item) => {
                if res.is_err() {
                    trace!("Relay receiver gone, item discarded");
                }
            }
        }
    }

    /// Queues a fragment without waiting.
    ///
    /// Returns `false` and drops the fragment if the queue is full or the
    /// channel is closed. Safe to call from any thread.
    pub fn try_send(&self, text: impl Into<String>) -> bool {
        if self.shared.is_closed() {
            return false;
        }
        match self.tx.try_send(RelayItem::Fragment(text.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Relay channel full, fragment dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Closes the channel. Idempotent.
    pub fn close(&self) {
        if self.shared.close() {
            trace!("Relay closed by producer");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed() || self.tx.is_closed()
    }

    /// Resolves once the channel is closed from either side.
    pub async fn closed(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_closed() {
                return;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.tx.closed() => return,
            }
        }
    }

    /// Returns a guard that closes the channel when dropped.
    pub fn close_guard(&self) -> CloseGuard {
        CloseGuard {
            shared: self.shared.clone(),
        }
    }
}

/// Closes its channel on drop, covering every exit path of a producer.
#[derive(Debug)]
pub struct CloseGuard {
    shared: Arc<Shared>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.shared.close();
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct RelayReceiver {
    rx: mpsc::Receiver<RelayItem>,
    shared: Arc<Shared>,
    terminated: bool,
}

impl RelayReceiver {
    /// Receives the next item, or `None` at end-of-stream.
    ///
    /// After a producer-side close, items queued before the close are still
    /// returned.
    pub async fn recv(&mut self) -> Option<RelayItem> {
        loop {
            if self.terminated {
                return None;
            }
            if self.shared.is_closed() {
                return match self.rx.try_recv() {
                    Ok(item) => Some(item),
                    Err(_) => {
                        self.terminated = true;
                        None
                    }
                };
            }

            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.is_closed() {
                continue;
            }
            tokio::select! {
                biased;
                item = self.rx.recv() => match item {
                    Some(item) => return Some(item),
                    None => {
                        self.terminated = true;
                        return None;
                    }
                },
                _ = &mut notified => {}
            }
        }
    }

    /// Closes the channel from the consumer side, discarding queued items.
    pub fn close(&mut self) {
        self.shared.close();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
        self.terminated = true;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Adapts the receiver into a `Stream` of items.
    pub fn into_stream(self) -> impl Stream<Item = RelayItem> + Send + 'static {
        futures::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
    }

    /// Receives every item until end-of-stream.
    pub async fn collect(mut self) -> Vec<RelayItem> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }
}

impl Drop for RelayReceiver {
    fn drop(&mut self) {
        self.shared.close();
    }
}
