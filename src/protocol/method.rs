//! Method ids and call payloads understood by the kernel.

use serde::{Deserialize, Serialize};

/// Every request method of the kernel protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Init,
    Quit,
    ExecuteCode,
    Interrupt,
    SendReadLine,
    SetWorkingDir,
    GetWorkingDir,
    SaveEnvironment,
    LoadEnvironment,
    DebugContinue,
    DebugStepOver,
    DebugStepInto,
    DebugStepIntoMyCode,
    DebugStepOut,
    DebugRunToPosition,
    DebugPause,
    DebugStop,
    DebugSetBreakpoint,
    DebugRemoveBreakpoint,
    DebugMuteBreakpoints,
    TableRegister,
    TableGetInfo,
    TableGetData,
    TableSort,
    TableFilter,
    TableRefresh,
    DisposeRefs,
    ClientRequestFinished,
}

impl Method {
    /// Wire name of the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Quit => "quit",
            Self::ExecuteCode => "execute_code",
            Self::Interrupt => "interrupt",
            Self::SendReadLine => "send_read_line",
            Self::SetWorkingDir => "set_working_dir",
            Self::GetWorkingDir => "get_working_dir",
            Self::SaveEnvironment => "save_environment",
            Self::LoadEnvironment => "load_environment",
            Self::DebugContinue => "debug_continue",
            Self::DebugStepOver => "debug_step_over",
            Self::DebugStepInto => "debug_step_into",
            Self::DebugStepIntoMyCode => "debug_step_into_my_code",
            Self::DebugStepOut => "debug_step_out",
            Self::DebugRunToPosition => "debug_run_to_position",
            Self::DebugPause => "debug_pause",
            Self::DebugStop => "debug_stop",
            Self::DebugSetBreakpoint => "debug_set_breakpoint",
            Self::DebugRemoveBreakpoint => "debug_remove_breakpoint",
            Self::DebugMuteBreakpoints => "debug_mute_breakpoints",
            Self::TableRegister => "table_register",
            Self::TableGetInfo => "table_get_info",
            Self::TableGetData => "table_get_data",
            Self::TableSort => "table_sort",
            Self::TableFilter => "table_filter",
            Self::TableRefresh => "table_refresh",
            Self::DisposeRefs => "dispose_refs",
            Self::ClientRequestFinished => "client_request_finished",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specification of a kernel-resident value.
///
/// A reference is only meaningful within the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ref", rename_all = "snake_case")]
pub enum RefSpec {
    /// The interpreter's global environment.
    GlobalEnv,
    /// The environment execution is currently suspended in.
    CurrentEnv,
    /// The value of an expression evaluated in the current environment.
    Expression { code: String },
    /// The environment of a live stack frame, by sys-frame index.
    SysFrame { index: i32 },
    /// The environment of a frame captured with the last error stack.
    ErrorFrame { index: i32 },
    /// A value pinned kernel-side behind a persistent index.
    Persistent { index: i32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub project_dir: String,
    #[serde(default)]
    pub snapshot_file: Option<String>,
    #[serde(default)]
    pub load_snapshot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteCodeRequest {
    pub code: String,
    /// Echo and record the input as a console statement.
    pub is_repl: bool,
    /// Stop at the first statement under the debugger.
    pub debug: bool,
}

/// Final status of one execution. Output itself arrives as text events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    #[serde(default)]
    pub exception: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLineReply {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingDirResponse {
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunToPositionRequest {
    pub file: String,
    pub line: u32,
}

/// Full description of one breakpoint, mirrored to the kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointSpec {
    pub id: u32,
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    /// Suspend execution on hit. With `false` the breakpoint only runs
    /// its `evaluate_and_log` expression and continues.
    pub suspend: bool,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub evaluate_and_log: Option<String>,
    #[serde(default)]
    pub remove_after_hit: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakpointIdRequest {
    pub id: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefRequest {
    pub target: RefSpec,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableIndexRequest {
    pub index: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableIndexResponse {
    pub index: i32,
}

/// Cell type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Integer,
    Double,
    Boolean,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
    #[serde(default = "default_true")]
    pub sortable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub row_count: usize,
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub can_refresh: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TableDataRequest {
    pub index: i32,
    /// First row of the range, inclusive.
    pub start: usize,
    /// End of the range, exclusive.
    pub end: usize,
}

/// Column-major cell values for one row range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDataResponse {
    pub columns: Vec<Vec<serde_json::Value>>,
}

/// One sort key; earlier keys take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: usize,
    pub descending: bool,
}

/// A per-column filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FilterOp {
    Equals { value: serde_json::Value },
    Contains { text: String },
    /// Regular-expression match; the pattern is validated client-side
    /// before the request is sent.
    Matches { pattern: String },
    Greater { value: f64 },
    Less { value: f64 },
    IsNa,
    NotNa,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCondition {
    pub column: usize,
    #[serde(flatten)]
    pub op: FilterOp,
}

/// Conjunction of column conditions applied by the kernel.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub conditions: Vec<ColumnCondition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSortRequest {
    pub index: i32,
    pub keys: Vec<SortKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFilterRequest {
    pub index: i32,
    pub predicate: FilterPredicate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChangedResponse {
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisposeRefsRequest {
    pub indices: Vec<i32>,
}
