//! Colored terminal rendering for the console CLI.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::protocol::{OutputStream, StackFrameInfo};
use crate::repl::ExecutionState;

/// Current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Print one output event to the terminal.
pub fn print_output(text: &str, stream: OutputStream) {
    match stream {
        OutputStream::Stdout => print!("{text}"),
        OutputStream::Stderr => eprint!("{}", text.red()),
        OutputStream::System => eprintln!("{} {}", timestamp().dimmed(), text.trim_end().dimmed()),
    }
    let _ = io::stdout().flush();
}

/// Prompt text for the current execution state.
#[must_use]
pub fn prompt_for(state: ExecutionState) -> &'static str {
    match state {
        ExecutionState::Prompt => "> ",
        ExecutionState::DebugPrompt => "debug> ",
        ExecutionState::ReadLine => "? ",
        ExecutionState::Busy | ExecutionState::Terminated => "",
    }
}

/// Print an evaluation error with its captured stack.
pub fn print_exception(message: &str, stack: &[StackFrameInfo]) {
    eprintln!("{} {}", "Error:".red().bold(), message.red());
    for frame in stack.iter().rev() {
        let name = frame.function.as_deref().unwrap_or("<top level>");
        match &frame.position {
            Some(pos) => eprintln!("    at {} ({}:{})", name, pos.file, pos.line + 1),
            None => eprintln!("    at {name}"),
        }
    }
}
