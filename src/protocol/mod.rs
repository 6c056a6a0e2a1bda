//! Wire protocol spoken with the kernel subprocess.
//!
//! One duplex connection carries two message classes: correlated
//! call/response pairs and an unsolicited event stream. See [`frame`] for
//! the encoding, [`method`] for the request vocabulary and [`event`] for
//! the push events.

pub mod event;
pub mod frame;
pub mod method;

pub use event::{AsyncEvent, OutputStream, SourcePosition, StackFrameInfo};
pub use frame::{Frame, FrameCodec, FrameError, FrameSink, FrameSource, FramedSink, FramedSource};
pub use method::{
    BreakpointSpec, ColumnCondition, ColumnKind, ColumnMeta, ExecutionOutcome, FilterOp,
    FilterPredicate, Method, RefSpec, SortKey, TableDataResponse, TableInfo,
};
