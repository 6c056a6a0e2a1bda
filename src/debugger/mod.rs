//! Stepping/breakpoint debugger over the kernel protocol.
//!
//! Commands are plain calls; the matching stop is delivered as a
//! debug-prompt event carrying the full stack. The session's next plain
//! prompt implies a resume. Stacks are replaced wholesale so readers
//! always see a consistent snapshot.

mod breakpoint;
mod stack;

pub use breakpoint::BreakpointRequest;
pub use stack::DebugStackFrame;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::channel::{CallError, EventListener, ListenerToken};
use crate::debugger::breakpoint::BreakpointRegistry;
use crate::protocol::{AsyncEvent, BreakpointSpec, Method};
use crate::session::Session;

struct DebugShared {
    debugging: AtomicBool,
    stack: Mutex<Arc<Vec<DebugStackFrame>>>,
    last_error_stack: Mutex<Arc<Vec<DebugStackFrame>>>,
    breakpoints: BreakpointRegistry,
    /// Bumped on every debug stop; `wait_for_stop` awaits the change.
    stop_tx: watch::Sender<u64>,
}

impl EventListener for DebugShared {
    fn on_event(&self, event: &AsyncEvent) {
        match event {
            AsyncEvent::DebugPrompt { stack } => {
                self.debugging.store(true, Ordering::SeqCst);
                if let Some(frames) = stack {
                    let snapshot = Arc::new(stack::stack_from_wire(frames, false));
                    *self.stack.lock().expect("debug stack lock poisoned") = snapshot;
                }
                self.stop_tx.send_modify(|gen| *gen += 1);
            }
            AsyncEvent::Prompt => {
                // Resume-implied: execution left the debugger.
                self.debugging.store(false, Ordering::SeqCst);
                *self.stack.lock().expect("debug stack lock poisoned") = Arc::new(Vec::new());
            }
            AsyncEvent::Exception {
                stack, interrupted, ..
            } => {
                if !*interrupted {
                    let snapshot = Arc::new(stack::stack_from_wire(stack, true));
                    *self
                        .last_error_stack
                        .lock()
                        .expect("error stack lock poisoned") = snapshot;
                }
            }
            AsyncEvent::RemoveBreakpoint { id } => {
                if self.breakpoints.remove(*id) {
                    tracing::debug!(id, "Kernel removed one-shot breakpoint");
                }
            }
            AsyncEvent::Termination => {
                self.debugging.store(false, Ordering::SeqCst);
                *self.stack.lock().expect("debug stack lock poisoned") = Arc::new(Vec::new());
                // Wake stop waiters so they observe the dead session.
                self.stop_tx.send_modify(|gen| *gen += 1);
            }
            _ => {}
        }
    }
}

/// Debugger facade for one session.
pub struct DebugSession {
    session: Session,
    shared: Arc<DebugShared>,
    event_token: ListenerToken,
}

impl DebugSession {
    #[must_use]
    pub fn new(session: Session) -> Self {
        let (stop_tx, _) = watch::channel(0);
        let shared = Arc::new(DebugShared {
            debugging: AtomicBool::new(false),
            stack: Mutex::new(Arc::new(Vec::new())),
            last_error_stack: Mutex::new(Arc::new(Vec::new())),
            breakpoints: BreakpointRegistry::default(),
            stop_tx,
        });
        let event_token = session.add_listener(shared.clone());
        Self {
            session,
            shared,
            event_token,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether execution is currently suspended in the debugger.
    #[must_use]
    pub fn is_debugging(&self) -> bool {
        self.shared.debugging.load(Ordering::SeqCst)
    }

    /// Current debug stack, outermost frame first. Empty outside a stop.
    #[must_use]
    pub fn stack(&self) -> Arc<Vec<DebugStackFrame>> {
        Arc::clone(&self.shared.stack.lock().expect("debug stack lock poisoned"))
    }

    /// Stack captured at the last evaluation error, retained after
    /// execution has moved on so it can still be displayed later.
    #[must_use]
    pub fn last_error_stack(&self) -> Arc<Vec<DebugStackFrame>> {
        Arc::clone(
            &self
                .shared
                .last_error_stack
                .lock()
                .expect("error stack lock poisoned"),
        )
    }

    /// Suspend until the next debug stop after this call.
    ///
    /// Used after issuing a step command; there is no polling. Callers
    /// that need a bound wrap this in `tokio::time::timeout`.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session ends first.
    pub async fn wait_for_stop(&self) -> Result<(), CallError> {
        let mut rx = self.shared.stop_tx.subscribe();
        if rx.changed().await.is_err() || !self.session.is_alive() {
            return Err(CallError::Terminated);
        }
        Ok(())
    }

    // ---- stepping commands ------------------------------------------------

    /// Resume execution until the next breakpoint or completion.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn continue_execution(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugContinue).await
    }

    /// Step to the next statement without descending into callees.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn step_over(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugStepOver).await
    }

    /// Step one call level down, including into library and native code.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn step_into(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugStepInto).await
    }

    /// Step down but auto-continue while the current frame's source is
    /// library code, stopping at the first user-authored frame or
    /// top-level statement. The kernel applies the user-code policy.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn step_into_my_code(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugStepIntoMyCode).await
    }

    /// Run until the current function returns.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn step_out(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugStepOut).await
    }

    /// Run to a position: a transient one-shot breakpoint, cleared by the
    /// kernel after it fires once.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn run_to_position(&self, file: &str, line: u32) -> Result<(), CallError> {
        self.session.debug_run_to_position(file, line).await
    }

    /// Suspend at the next possible statement.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn pause(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugPause).await
    }

    /// Leave the debugger, abandoning the executing function.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn stop(&self) -> Result<(), CallError> {
        self.session.debug_command(Method::DebugStop).await
    }

    // ---- breakpoints -------------------------------------------------------

    /// Register a breakpoint and mirror it to the kernel.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated; the breakpoint
    /// is not retained client-side in that case.
    pub async fn set_breakpoint(&self, request: BreakpointRequest) -> Result<u32, CallError> {
        let spec = self.shared.breakpoints.register(&request);
        let id = spec.id;
        if let Err(e) = self.session.debug_set_breakpoint(&spec).await {
            self.shared.breakpoints.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Remove a breakpoint client-side and kernel-side.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn remove_breakpoint(&self, id: u32) -> Result<(), CallError> {
        self.shared.breakpoints.remove(id);
        self.session.debug_remove_breakpoint(id).await
    }

    /// Globally disable or re-enable all breakpoints without removing
    /// them.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn mute_breakpoints(&self, muted: bool) -> Result<(), CallError> {
        self.session.debug_mute_breakpoints(muted).await?;
        self.shared.breakpoints.set_muted(muted);
        Ok(())
    }

    /// Whether breakpoints are currently muted.
    #[must_use]
    pub fn breakpoints_muted(&self) -> bool {
        self.shared.breakpoints.muted()
    }

    /// All registered breakpoints, ordered by id.
    #[must_use]
    pub fn breakpoints(&self) -> Vec<BreakpointSpec> {
        self.shared.breakpoints.list()
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.session.remove_listener(self.event_token);
    }
}
