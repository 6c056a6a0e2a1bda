//! REPL execution state machine and console.

mod console;
mod state;

pub use console::{Console, ConsoleError, ConsoleListener, ConsoleListenerToken, ConsoleOutput};
pub use state::{apply, Effect, ExecutionState, StateEvent, Transition};
