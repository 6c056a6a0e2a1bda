//! Debug stack snapshots.

use crate::protocol::{RefSpec, SourcePosition, StackFrameInfo};

/// One frame of a captured stack, outermost first.
///
/// Stacks are immutable snapshots: every debug stop replaces the whole
/// stack, individual frames are never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugStackFrame {
    /// Function name; `None` for top-level statements.
    pub function: Option<String>,
    /// Source position; `None` for native frames.
    pub position: Option<SourcePosition>,
    /// Reference to the frame's environment in the kernel.
    pub environment: RefSpec,
    /// True when the frame's source is library or generated code.
    pub is_library: bool,
}

/// Convert kernel frames into a stack snapshot.
///
/// The frame's list position doubles as its environment index:
/// `error_stack` selects error-stack frame references, which remain valid
/// after execution has moved on.
pub(crate) fn stack_from_wire(frames: &[StackFrameInfo], error_stack: bool) -> Vec<DebugStackFrame> {
    frames
        .iter()
        .enumerate()
        .map(|(index, frame)| {
            let index = i32::try_from(index).unwrap_or(i32::MAX);
            DebugStackFrame {
                function: frame.function.clone(),
                position: frame.position.clone(),
                environment: if error_stack {
                    RefSpec::ErrorFrame { index }
                } else {
                    RefSpec::SysFrame { index }
                },
                is_library: frame.is_library,
            }
        })
        .collect()
}
