//! Interactive console over one kernel session.
//!
//! The console subscribes to session events, drives the execution state
//! machine, prints output through a [`ConsoleOutput`] sink and fires the
//! four console hooks. State is published through a watch channel: the
//! event task writes it, any thread reads it, tests await transitions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::channel::{CallError, EventListener, ListenerToken, PendingCall};
use crate::protocol::{AsyncEvent, ExecutionOutcome, OutputStream};
use crate::repl::state::{self, Effect, ExecutionState, StateEvent};
use crate::session::Session;

/// Error type for console operations. All variants are local and
/// synchronous; nothing has been sent when they are returned.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("The previous command is still running")]
    Busy,
    #[error("The kernel has been terminated")]
    Terminated,
    #[error("No read-line request is pending")]
    NotReadingLine,
}

/// Sink for console output. Implementations must be non-blocking; they
/// are invoked on the channel reader task.
pub trait ConsoleOutput: Send + Sync {
    fn print(&self, text: &str, stream: OutputStream);
}

/// Hooks into the console lifecycle, fired in causal order:
/// before-execution, busy, command-executed; reset on console clear.
pub trait ConsoleListener: Send + Sync {
    fn before_execution(&self) {}
    fn on_command_executed(&self) {}
    fn on_busy(&self) {}
    fn on_reset(&self) {}
}

struct ConsoleShared {
    state_tx: watch::Sender<ExecutionState>,
    output: Arc<dyn ConsoleOutput>,
    listeners: Mutex<Vec<(u64, Arc<dyn ConsoleListener>)>>,
    next_token: AtomicU64,
}

impl ConsoleShared {
    fn apply(&self, event: StateEvent) {
        let current = *self.state_tx.borrow();
        let transition = state::apply(current, event);
        if transition.next != current {
            tracing::debug!(from = ?current, to = ?transition.next, "Console state transition");
            self.state_tx.send_replace(transition.next);
        }
        for effect in transition.effects {
            match effect {
                Effect::CommandExecuted => self.for_each_listener(|l| l.on_command_executed()),
                Effect::EnteredBusy => self.for_each_listener(|l| l.on_busy()),
            }
        }
    }

    fn for_each_listener(&self, f: impl Fn(&dyn ConsoleListener)) {
        let snapshot: Vec<Arc<dyn ConsoleListener>> = self
            .listeners
            .lock()
            .expect("console listener lock poisoned")
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }
}

impl EventListener for ConsoleShared {
    fn on_event(&self, event: &AsyncEvent) {
        match event {
            AsyncEvent::Text { stream, text } => self.output.print(text, *stream),
            AsyncEvent::Prompt => self.apply(StateEvent::PromptReady { debug: false }),
            AsyncEvent::DebugPrompt { .. } => self.apply(StateEvent::PromptReady { debug: true }),
            AsyncEvent::Busy => self.apply(StateEvent::Busy),
            AsyncEvent::ReadLineRequest { prompt } => {
                if !prompt.is_empty() {
                    self.output.print(prompt, OutputStream::Stdout);
                }
                self.apply(StateEvent::ReadLineRequested);
            }
            AsyncEvent::Termination => {
                self.apply(StateEvent::Terminated);
                self.output
                    .print("Kernel process terminated\n", OutputStream::System);
            }
            _ => {}
        }
    }
}

/// Handle for a console lifecycle listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleListenerToken(u64);

/// One interactive console bound to a kernel session.
pub struct Console {
    session: Session,
    shared: Arc<ConsoleShared>,
    state_rx: watch::Receiver<ExecutionState>,
    event_token: ListenerToken,
}

impl Console {
    /// Create a console over `session`, printing through `output`.
    ///
    /// The console starts in `Busy` until the kernel's first prompt.
    #[must_use]
    pub fn new(session: Session, output: Arc<dyn ConsoleOutput>) -> Self {
        let initial = if session.is_alive() {
            ExecutionState::default()
        } else {
            ExecutionState::Terminated
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let shared = Arc::new(ConsoleShared {
            state_tx,
            output,
            listeners: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
        });
        let event_token = session.add_listener(shared.clone());
        Self {
            session,
            shared,
            state_rx,
            event_token,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current execution state.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions (UI prompt text, test synchronization).
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ExecutionState> {
        self.state_rx.clone()
    }

    /// Submit code for execution.
    ///
    /// Accepted only from `Prompt` or `DebugPrompt`; otherwise the request
    /// is rejected locally and never queued.
    ///
    /// # Errors
    ///
    /// `ConsoleError::Busy` while a command is running or input is being
    /// read, `ConsoleError::Terminated` after termination.
    pub fn execute_text(&self, code: &str) -> Result<PendingCall<ExecutionOutcome>, ConsoleError> {
        match self.state() {
            ExecutionState::Prompt | ExecutionState::DebugPrompt => {}
            ExecutionState::Busy | ExecutionState::ReadLine => return Err(ConsoleError::Busy),
            ExecutionState::Terminated => return Err(ConsoleError::Terminated),
        }

        self.shared.for_each_listener(|l| l.before_execution());
        let pending = self
            .session
            .execute_code(code, true, false)
            .map_err(map_call_error)?;
        self.shared.state_tx.send_replace(ExecutionState::Busy);
        Ok(pending)
    }

    /// Interrupt the running computation.
    ///
    /// Accepted only from `Busy` or `ReadLine`; a no-op (returning
    /// `false`) otherwise. The interrupt is best-effort: the console may
    /// still observe output or a busy event before the next prompt.
    ///
    /// # Errors
    ///
    /// `ConsoleError::Terminated` if the session died under the request.
    pub fn interrupt(&self) -> Result<bool, ConsoleError> {
        if !self.state().accepts_interrupt() {
            return Ok(false);
        }
        self.session.interrupt().map_err(map_call_error)?;
        Ok(true)
    }

    /// Answer the pending read-line request with `text`, verbatim.
    ///
    /// # Errors
    ///
    /// `ConsoleError::NotReadingLine` unless the console is in `ReadLine`.
    pub fn read_line_reply(&self, text: &str) -> Result<(), ConsoleError> {
        if self.state() != ExecutionState::ReadLine {
            return Err(ConsoleError::NotReadingLine);
        }
        self.session.send_read_line(text).map_err(map_call_error)?;
        self.shared.state_tx.send_replace(ExecutionState::Busy);
        Ok(())
    }

    /// Notify listeners that the console was cleared.
    pub fn reset(&self) {
        self.shared.for_each_listener(|l| l.on_reset());
    }

    /// Register a console lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn ConsoleListener>) -> ConsoleListenerToken {
        let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .lock()
            .expect("console listener lock poisoned")
            .push((token, listener));
        ConsoleListenerToken(token)
    }

    pub fn remove_listener(&self, token: ConsoleListenerToken) {
        self.shared
            .listeners
            .lock()
            .expect("console listener lock poisoned")
            .retain(|(t, _)| *t != token.0);
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.session.remove_listener(self.event_token);
    }
}

fn map_call_error(err: CallError) -> ConsoleError {
    match err {
        CallError::Terminated => ConsoleError::Terminated,
        // The remaining variants cannot occur before a frame is sent.
        other => {
            tracing::warn!(error = %other, "Unexpected call error from console request");
            ConsoleError::Terminated
        }
    }
}
