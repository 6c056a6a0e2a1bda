//! Pure execution state machine for one console.
//!
//! The transition function has no dependencies on the session or any UI:
//! it maps the current state and one observed event to the next state and
//! the hook notifications to fire. The [`Console`](crate::repl::Console)
//! applies transitions and performs the side effects.

/// Execution state of one console. The single source of truth for the
/// console's prompt text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionState {
    /// Ready for the next top-level input.
    Prompt,
    /// Suspended in the debugger, ready for input.
    DebugPrompt,
    /// The interpreter is waiting for one line of user input.
    ReadLine,
    /// A command is executing. Initial state, before the first prompt.
    #[default]
    Busy,
    /// The kernel is gone. Terminal; no further transitions.
    Terminated,
}

impl ExecutionState {
    /// Whether user code may be submitted for execution.
    #[must_use]
    pub fn accepts_execution(self) -> bool {
        matches!(self, Self::Prompt | Self::DebugPrompt)
    }

    /// Whether an interrupt request would reach running code.
    #[must_use]
    pub fn accepts_interrupt(self) -> bool {
        matches!(self, Self::Busy | Self::ReadLine)
    }
}

/// An observed event relevant to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// Prompt-ready; `debug` selects the debug prompt.
    PromptReady { debug: bool },
    /// The interpreter requested one line of input.
    ReadLineRequested,
    /// Execution started (user submission or a nested call).
    Busy,
    /// The kernel terminated.
    Terminated,
}

/// A hook notification produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A command finished; the console returned to a prompt.
    CommandExecuted,
    /// Execution started.
    EnteredBusy,
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ExecutionState,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn stay(state: ExecutionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
        }
    }

    fn to(next: ExecutionState, effects: Vec<Effect>) -> Self {
        Self { next, effects }
    }
}

/// Apply one event to the current state.
///
/// `Terminated` is absorbing; every event after it is ignored.
#[must_use]
pub fn apply(state: ExecutionState, event: StateEvent) -> Transition {
    if state == ExecutionState::Terminated {
        return Transition::stay(state);
    }
    match event {
        StateEvent::PromptReady { debug } => {
            let next = if debug {
                ExecutionState::DebugPrompt
            } else {
                ExecutionState::Prompt
            };
            Transition::to(next, vec![Effect::CommandExecuted])
        }
        StateEvent::ReadLineRequested => Transition::to(ExecutionState::ReadLine, Vec::new()),
        StateEvent::Busy => Transition::to(ExecutionState::Busy, vec![Effect::EnteredBusy]),
        StateEvent::Terminated => Transition::to(ExecutionState::Terminated, Vec::new()),
    }
}
