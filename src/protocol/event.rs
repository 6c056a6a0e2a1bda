//! Push events emitted by the kernel.
//!
//! Events arrive unsolicited on the same connection as call responses and
//! are delivered to listeners in the exact order the kernel emitted them.

use serde::{Deserialize, Serialize};

/// Stream tag for text output events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    /// Regular interpreter output.
    Stdout,
    /// Error and message output.
    Stderr,
    /// Messages produced by the interop layer itself.
    System,
}

/// A source location reported by the kernel. Lines are zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub file: String,
    pub line: u32,
}

/// One stack frame as reported by the kernel.
///
/// Frames are ordered outermost to innermost. The frame's position in the
/// list doubles as its sys-frame index for environment references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrameInfo {
    /// Function name, absent for top-level statements.
    #[serde(default)]
    pub function: Option<String>,
    /// Source position, absent for native frames.
    #[serde(default)]
    pub position: Option<SourcePosition>,
    /// True when the frame's source is library or generated code rather
    /// than code authored in the project or typed into the console.
    #[serde(default)]
    pub is_library: bool,
}

/// Events pushed by the kernel over the protocol connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AsyncEvent {
    /// Text output from the interpreter.
    Text {
        stream: OutputStream,
        text: String,
    },
    /// The interpreter is ready for the next top-level input.
    Prompt,
    /// The interpreter stopped inside the debugger.
    ///
    /// `stack` replaces the debug stack wholesale; `None` means the stack
    /// is unchanged since the previous debug prompt.
    DebugPrompt {
        #[serde(default)]
        stack: Option<Vec<StackFrameInfo>>,
    },
    /// Execution started (possibly triggered by a nested call).
    Busy,
    /// A subprocess spawned by the interpreter is reading from stdin.
    SubprocessInput,
    /// The interpreter requests one line of user input.
    ReadLineRequest {
        #[serde(default)]
        prompt: String,
    },
    /// An evaluation error was raised in the interpreter.
    Exception {
        message: String,
        #[serde(default)]
        stack: Vec<StackFrameInfo>,
        /// True when the "exception" is a user interrupt.
        #[serde(default)]
        interrupted: bool,
    },
    /// The interpreter asks the client to display a value.
    ViewRequest {
        ref_index: i32,
        title: String,
    },
    /// The interpreter asks the client to open a table viewer.
    ViewTableRequest {
        ref_index: i32,
        title: String,
    },
    /// Help content is available for display.
    ShowHelp {
        url: String,
        #[serde(default)]
        content: String,
    },
    /// The interpreter asks the client to open a file.
    ShowFile {
        path: String,
        title: String,
    },
    /// The interpreter asks the client to open a URL.
    BrowseUrl {
        url: String,
    },
    /// The kernel removed a one-shot breakpoint; the client should drop
    /// its registration too.
    RemoveBreakpoint {
        id: u32,
    },
    /// The kernel is shutting down. Always the last event of a session.
    Termination,
    /// Catch-all for events from newer kernel builds.
    #[serde(other)]
    Unknown,
}

impl AsyncEvent {
    /// Returns true if this is the terminal event of a session.
    #[must_use]
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Termination)
    }

    /// Returns true for prompt-ready events (plain or debug).
    #[must_use]
    pub fn is_prompt(&self) -> bool {
        matches!(self, Self::Prompt | Self::DebugPrompt { .. })
    }
}
