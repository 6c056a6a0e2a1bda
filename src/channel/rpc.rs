//! Multiplexed request/response channel to the kernel.
//!
//! One connection carries correlated call/response pairs and the push
//! event stream. A single reader task demultiplexes incoming frames:
//! responses resolve their pending call, events go to the dispatcher,
//! both in strict arrival order. A writer task drains an unbounded
//! outbound queue so frames can be enqueued from non-async contexts
//! (reference disposal on drop).

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::channel::dispatch::EventDispatcher;
use crate::protocol::{AsyncEvent, Frame, FrameSink, FrameSource, Method};

/// Error type for kernel calls.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The session is terminated; nothing was sent.
    #[error("Kernel session terminated")]
    Terminated,
    /// The call was cancelled locally before a response arrived.
    #[error("Call cancelled")]
    Cancelled,
    /// The kernel reported a failure for this method.
    #[error("Kernel call {method} failed: {message}")]
    Remote {
        method: &'static str,
        message: String,
    },
    /// The kernel's response did not match the expected shape.
    #[error("Malformed response for {method}: {reason}")]
    Decode {
        method: &'static str,
        reason: String,
    },
}

type CallResult = Result<serde_json::Value, CallError>;

struct PendingSlot {
    method: &'static str,
    tx: oneshot::Sender<CallResult>,
}

pub(crate) struct ChannelShared {
    next_id: AtomicU64,
    alive: AtomicBool,
    /// Pending slots; also serializes liveness flips against new calls.
    pending: Mutex<HashMap<u64, PendingSlot>>,
    outbound: mpsc::UnboundedSender<Frame>,
    dispatcher: EventDispatcher,
    shutdown: CancellationToken,
}

impl ChannelShared {
    /// Flip liveness exactly once: fail every pending call with
    /// `Terminated`, emit the termination event, stop both tasks.
    fn terminate(&self) {
        let drained: Vec<PendingSlot> = {
            let mut pending = self.pending.lock().expect("pending registry lock poisoned");
            if !self.alive.swap(false, Ordering::SeqCst) {
                return;
            }
            pending.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            let _ = slot.tx.send(Err(CallError::Terminated));
        }
        self.dispatcher.dispatch(&AsyncEvent::Termination);
        self.dispatcher.close_subscribers();
        self.shutdown.cancel();
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Response { id, result, error } => {
                let slot = self
                    .pending
                    .lock()
                    .expect("pending registry lock poisoned")
                    .remove(&id);
                match slot {
                    Some(slot) => {
                        let outcome = match error {
                            Some(message) => Err(CallError::Remote {
                                method: slot.method,
                                message,
                            }),
                            None => Ok(result.unwrap_or(serde_json::Value::Null)),
                        };
                        let _ = slot.tx.send(outcome);
                    }
                    // Cancelled or fire-and-forget call; the response is
                    // dropped, never surfaced as an event.
                    None => tracing::debug!(id, "Discarding response without a pending call"),
                }
            }
            Frame::Event { event } => {
                if event.is_termination() {
                    self.terminate();
                } else {
                    self.dispatcher.dispatch(&event);
                }
            }
            Frame::Call { id, method, .. } => {
                tracing::warn!(id, method = %method, "Ignoring unexpected call frame from kernel");
            }
        }
    }
}

/// Handle to the multiplexed kernel channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcChannel {
    shared: Arc<ChannelShared>,
}

impl RpcChannel {
    /// Start the channel over the given transport halves.
    ///
    /// Spawns the reader and writer tasks; they stop when the transport
    /// closes or [`RpcChannel::shutdown`] is called.
    #[must_use]
    pub fn start(source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            next_id: AtomicU64::new(0),
            alive: AtomicBool::new(true),
            pending: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            dispatcher: EventDispatcher::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_writer(Arc::clone(&shared), sink, outbound_rx));
        tokio::spawn(run_reader(Arc::clone(&shared), source));

        Self { shared }
    }

    /// Whether the kernel connection is still usable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Issue a call and return a handle to its future response.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` without sending anything if the
    /// session is already terminated.
    pub fn call<T>(
        &self,
        method: Method,
        payload: &impl Serialize,
    ) -> Result<PendingCall<T>, CallError>
    where
        T: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload).map_err(|e| CallError::Decode {
            method: method.as_str(),
            reason: e.to_string(),
        })?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self
                .shared
                .pending
                .lock()
                .expect("pending registry lock poisoned");
            if !self.shared.alive.load(Ordering::SeqCst) {
                return Err(CallError::Terminated);
            }
            pending.insert(
                id,
                PendingSlot {
                    method: method.as_str(),
                    tx,
                },
            );
        }

        let frame = Frame::Call {
            id,
            method: method.as_str().to_string(),
            payload,
        };
        if self.shared.outbound.send(frame).is_err() {
            self.shared
                .pending
                .lock()
                .expect("pending registry lock poisoned")
                .remove(&id);
            return Err(CallError::Terminated);
        }

        tracing::trace!(id, method = method.as_str(), "Call issued");
        Ok(PendingCall {
            id,
            method,
            rx,
            shared: Arc::downgrade(&self.shared),
            _marker: PhantomData,
        })
    }

    /// Issue a call whose response is intentionally discarded.
    ///
    /// Used for one-way requests (interrupt, reference disposal) that can
    /// be enqueued from any context, including `Drop` implementations.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is already terminated.
    pub fn notify(&self, method: Method, payload: &impl Serialize) -> Result<(), CallError> {
        if !self.is_alive() {
            return Err(CallError::Terminated);
        }
        let payload = serde_json::to_value(payload).map_err(|e| CallError::Decode {
            method: method.as_str(),
            reason: e.to_string(),
        })?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = Frame::Call {
            id,
            method: method.as_str().to_string(),
            payload,
        };
        self.shared
            .outbound
            .send(frame)
            .map_err(|_| CallError::Terminated)
    }

    /// Close the channel locally: fail pending calls, emit one
    /// termination event, stop both tasks. Idempotent.
    pub fn shutdown(&self) {
        self.shared.terminate();
    }
}

/// A single in-flight request.
///
/// Await [`PendingCall::recv`] for the response, or [`PendingCall::cancel`]
/// to stop waiting: the pending slot is removed immediately and a late
/// response is discarded. Exactly one resolution is ever observed.
#[derive(Debug)]
pub struct PendingCall<T> {
    id: u64,
    method: Method,
    rx: oneshot::Receiver<CallResult>,
    shared: Weak<ChannelShared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> PendingCall<T> {
    /// Request id of this call.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// `Terminated` if the session died first, `Cancelled` if the call was
    /// cancelled, `Remote`/`Decode` for kernel-side failures.
    pub async fn recv(self) -> Result<T, CallError> {
        match self.rx.await {
            Ok(Ok(value)) => serde_json::from_value(value).map_err(|e| CallError::Decode {
                method: self.method.as_str(),
                reason: e.to_string(),
            }),
            Ok(Err(err)) => Err(err),
            // Slot dropped without an explicit resolution: cancelled.
            Err(_) => Err(CallError::Cancelled),
        }
    }

    /// Abandon the call. The kernel may still produce a response; it
    /// will be discarded on arrival.
    pub fn cancel(self) {
        if let Some(shared) = self.shared.upgrade() {
            let removed = shared
                .pending
                .lock()
                .expect("pending registry lock poisoned")
                .remove(&self.id)
                .is_some();
            if removed {
                tracing::debug!(id = self.id, method = self.method.as_str(), "Call cancelled");
            }
        }
    }
}

async fn run_writer(
    shared: Arc<ChannelShared>,
    mut sink: Box<dyn FrameSink>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.cancelled() => break,

            maybe = outbound.recv() => {
                let Some(frame) = maybe else { break };
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "Failed to write frame; terminating session");
                    shared.terminate();
                    break;
                }
            }
        }
    }
}

async fn run_reader(shared: Arc<ChannelShared>, mut source: Box<dyn FrameSource>) {
    loop {
        tokio::select! {
            biased;

            _ = shared.shutdown.cancelled() => break,

            result = source.recv() => match result {
                Ok(Some(frame)) => shared.handle_frame(frame),
                Ok(None) => {
                    tracing::info!("Kernel connection closed");
                    shared.terminate();
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Transport error; treating as termination");
                    shared.terminate();
                    break;
                }
            }
        }
    }
}
