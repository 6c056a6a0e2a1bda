//! Interop backend for an editor-embedded statistical-language kernel:
//! subprocess supervision, multiplexed call/event protocol, REPL state
//! machine, stepping debugger and remote table viewer.

pub mod channel;
pub mod config;
pub mod debugger;
pub mod display;
pub mod process;
pub mod protocol;
pub mod repl;
pub mod session;
pub mod table;
