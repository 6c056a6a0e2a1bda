//! Ordered fan-out of kernel push events.
//!
//! All events are dispatched from the channel reader task, so every
//! listener and every stream subscriber observes the same order the
//! kernel emitted. Listener callbacks run on the reader task and must
//! not block.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::protocol::AsyncEvent;

/// A registered event listener.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &AsyncEvent);
}

/// Handle identifying a registered listener for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerToken(u64);

/// Fans events out to listeners and stream subscribers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

#[derive(Default)]
struct DispatcherInner {
    next_token: AtomicU64,
    listeners: Mutex<Vec<(u64, Arc<dyn EventListener>)>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AsyncEvent>>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Registration may happen concurrently with
    /// dispatch; dispatch iterates a snapshot.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerToken {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("listener registry lock poisoned")
            .push((token, listener));
        ListenerToken(token)
    }

    /// Remove a previously registered listener.
    pub fn remove_listener(&self, token: ListenerToken) {
        self.inner
            .listeners
            .lock()
            .expect("listener registry lock poisoned")
            .retain(|(t, _)| *t != token.0);
    }

    /// Subscribe to the raw event stream.
    ///
    /// Events already dispatched before the subscription are not
    /// replayed; everything after arrives in emission order.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("subscriber registry lock poisoned")
            .push(tx);
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Drop every stream subscriber, ending their streams.
    ///
    /// Called once after the termination event has been delivered, so
    /// termination is always the last item of every subscription.
    pub(crate) fn close_subscribers(&self) {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber registry lock poisoned")
            .clear();
    }

    /// Deliver one event to every listener, then to every subscriber.
    ///
    /// Called only from the channel reader task.
    pub(crate) fn dispatch(&self, event: &AsyncEvent) {
        let snapshot: Vec<Arc<dyn EventListener>> = self
            .inner
            .listeners
            .lock()
            .expect("listener registry lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener.on_event(event);
        }

        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber registry lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Ordered stream of kernel events, ending when the session is dropped.
pub struct EventStream {
    inner: UnboundedReceiverStream<AsyncEvent>,
}

impl futures_core::Stream for EventStream {
    type Item = AsyncEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<AsyncEvent>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
