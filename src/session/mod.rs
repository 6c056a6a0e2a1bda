//! One supervised kernel subprocess and its channel.
//!
//! A [`Session`] owns the process, the multiplexed channel and the event
//! dispatcher, and offers typed wrappers for every protocol method. The
//! REPL console, the debugger and table viewers are independent
//! subscribers; none of them owns another.

mod reference;
mod registry;

pub use reference::{PersistentRef, RemoteRef};
pub use registry::SessionRegistry;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::channel::{
    CallError, EventListener, EventStream, ListenerToken, PendingCall, RpcChannel,
};
use crate::config::KernelConfig;
use crate::process::{KernelProcess, KernelProcessBuilder, SpawnError};
use crate::protocol::method::{
    BreakpointIdRequest, BreakpointSpec, ChangedResponse, DisposeRefsRequest, ExecuteCodeRequest,
    FilterPredicate, InitRequest, MuteRequest, PathRequest, ReadLineReply, RefRequest,
    RunToPositionRequest, SortKey, TableDataRequest, TableFilterRequest, TableIndexRequest,
    TableIndexResponse, TableSortRequest, WorkingDirResponse,
};
use crate::protocol::{
    ExecutionOutcome, FrameSink, FrameSource, FramedSink, FramedSource, Method, RefSpec,
    TableDataResponse, TableInfo,
};

/// Error type for session launch.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("Kernel process did not expose stdio pipes")]
    MissingStdio,
    #[error("Failed to resolve working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
    #[error("Kernel init failed: {0}")]
    Init(#[source] CallError),
}

struct SessionInner {
    id: Uuid,
    channel: RpcChannel,
    process: tokio::sync::Mutex<Option<KernelProcess>>,
    working_dir: PathBuf,
    terminate_timeout: Duration,
}

/// Handle to one kernel session. Cheap to clone; the underlying process
/// is shared.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Launch a kernel subprocess and initialize the session.
    ///
    /// Launch failures are surfaced immediately and never retried.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError` if the process cannot be spawned or the
    /// init handshake fails.
    pub async fn launch(config: &KernelConfig) -> Result<Self, LaunchError> {
        let working_dir = match &config.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().map_err(LaunchError::WorkingDir)?,
        };

        let builder = KernelProcessBuilder::new(&config.interpreter)
            .args(config.args.iter().cloned())
            .working_dir(&working_dir);
        let mut process = KernelProcess::spawn(&builder)?;

        let stdin = process.take_stdin().ok_or(LaunchError::MissingStdio)?;
        let stdout = process.take_stdout().ok_or(LaunchError::MissingStdio)?;
        if let Some(stderr) = process.take_stderr() {
            crate::process::log_stderr(stderr);
        }

        let session = Self::attach_with_process(
            Box::new(FramedSource::new(stdout)),
            Box::new(FramedSink::new(stdin)),
            Some(process),
            working_dir.clone(),
            Duration::from_secs(config.timeouts.terminate_secs),
        );

        let request = InitRequest {
            project_dir: working_dir.to_string_lossy().into_owned(),
            snapshot_file: config
                .snapshot
                .file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            load_snapshot: config.snapshot.load_on_start,
        };
        session
            .call::<()>(Method::Init, &request)
            .map_err(LaunchError::Init)?
            .recv()
            .await
            .map_err(LaunchError::Init)?;

        tracing::info!(session = %session.id(), dir = %working_dir.display(), "Kernel session started");
        Ok(session)
    }

    /// Attach a session to an existing transport (tooling and tests).
    ///
    /// No process is supervised and no init handshake is performed.
    #[must_use]
    pub fn attach(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        working_dir: PathBuf,
    ) -> Self {
        Self::attach_with_process(source, sink, None, working_dir, Duration::from_secs(5))
    }

    fn attach_with_process(
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
        process: Option<KernelProcess>,
        working_dir: PathBuf,
        terminate_timeout: Duration,
    ) -> Self {
        let channel = RpcChannel::start(source, sink);
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                channel,
                process: tokio::sync::Mutex::new(process),
                working_dir,
                terminate_timeout,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Working directory the session was started in.
    #[must_use]
    pub fn initial_working_dir(&self) -> &Path {
        &self.inner.working_dir
    }

    /// Whether the kernel connection is still usable.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.channel.is_alive()
    }

    /// Register an event listener; callbacks run on the channel reader
    /// task and must not block.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> ListenerToken {
        self.inner.channel.dispatcher().add_listener(listener)
    }

    pub fn remove_listener(&self, token: ListenerToken) {
        self.inner.channel.dispatcher().remove_listener(token);
    }

    /// Ordered stream of every push event from the kernel.
    #[must_use]
    pub fn events(&self) -> EventStream {
        self.inner.channel.dispatcher().subscribe()
    }

    /// Shut the session down: ask the kernel to quit, terminate the
    /// process after a grace period, close the channel. Idempotent.
    pub async fn terminate(&self) {
        let _ = self.inner.channel.notify(Method::Quit, &());
        let process = self.inner.process.lock().await.take();
        if let Some(mut process) = process {
            if let Err(e) = process.graceful_terminate(self.inner.terminate_timeout).await {
                tracing::warn!(error = %e, "Failed to terminate kernel process");
            }
        }
        self.inner.channel.shutdown();
        tracing::info!(session = %self.id(), "Kernel session closed");
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        payload: &impl serde::Serialize,
    ) -> Result<PendingCall<T>, CallError> {
        self.inner.channel.call(method, payload)
    }

    // ---- console surface -------------------------------------------------

    /// Submit code for execution. Output arrives as text events; the
    /// returned call resolves when execution finishes.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is terminated.
    pub fn execute_code(
        &self,
        code: &str,
        is_repl: bool,
        debug: bool,
    ) -> Result<PendingCall<ExecutionOutcome>, CallError> {
        self.call(
            Method::ExecuteCode,
            &ExecuteCodeRequest {
                code: code.to_string(),
                is_repl,
                debug,
            },
        )
    }

    /// Ask the kernel to interrupt the running computation.
    ///
    /// Best-effort and asynchronous: output or a busy event may still
    /// arrive after the request.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is terminated.
    pub fn interrupt(&self) -> Result<(), CallError> {
        self.inner.channel.notify(Method::Interrupt, &())
    }

    /// Answer a pending read-line request verbatim.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is terminated.
    pub fn send_read_line(&self, text: &str) -> Result<(), CallError> {
        self.inner.channel.notify(
            Method::SendReadLine,
            &ReadLineReply {
                text: text.to_string(),
            },
        )
    }

    /// Change the interpreter's working directory.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated or the kernel
    /// rejects the directory.
    pub async fn set_working_dir(&self, dir: &Path) -> Result<(), CallError> {
        self.call::<()>(
            Method::SetWorkingDir,
            &PathRequest {
                path: dir.to_string_lossy().into_owned(),
            },
        )?
        .recv()
        .await
    }

    /// Query the interpreter's current working directory.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated.
    pub async fn working_dir(&self) -> Result<PathBuf, CallError> {
        let response: WorkingDirResponse = self.call(Method::GetWorkingDir, &())?.recv().await?;
        Ok(PathBuf::from(response.dir))
    }

    /// Write the global environment snapshot to `path`.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated or the kernel
    /// fails to write the file.
    pub async fn save_environment(&self, path: &Path) -> Result<(), CallError> {
        self.call::<()>(
            Method::SaveEnvironment,
            &PathRequest {
                path: path.to_string_lossy().into_owned(),
            },
        )?
        .recv()
        .await
    }

    /// Restore a previously saved environment snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `CallError` if the session is terminated or the kernel
    /// fails to read the file.
    pub async fn load_environment(&self, path: &Path) -> Result<(), CallError> {
        self.call::<()>(
            Method::LoadEnvironment,
            &PathRequest {
                path: path.to_string_lossy().into_owned(),
            },
        )?
        .recv()
        .await
    }

    /// Acknowledge a view/show-file request so the kernel can resume.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is terminated.
    pub fn client_request_finished(&self) -> Result<(), CallError> {
        self.inner.channel.notify(Method::ClientRequestFinished, &())
    }

    // ---- debug surface ---------------------------------------------------

    pub(crate) async fn debug_command(&self, method: Method) -> Result<(), CallError> {
        self.call::<()>(method, &())?.recv().await
    }

    pub(crate) async fn debug_run_to_position(
        &self,
        file: &str,
        line: u32,
    ) -> Result<(), CallError> {
        self.call::<()>(
            Method::DebugRunToPosition,
            &RunToPositionRequest {
                file: file.to_string(),
                line,
            },
        )?
        .recv()
        .await
    }

    pub(crate) async fn debug_set_breakpoint(&self, spec: &BreakpointSpec) -> Result<(), CallError> {
        self.call::<()>(Method::DebugSetBreakpoint, spec)?.recv().await
    }

    pub(crate) async fn debug_remove_breakpoint(&self, id: u32) -> Result<(), CallError> {
        self.call::<()>(Method::DebugRemoveBreakpoint, &BreakpointIdRequest { id })?
            .recv()
            .await
    }

    pub(crate) async fn debug_mute_breakpoints(&self, muted: bool) -> Result<(), CallError> {
        self.call::<()>(Method::DebugMuteBreakpoints, &MuteRequest { muted })?
            .recv()
            .await
    }

    // ---- table surface ---------------------------------------------------

    pub(crate) async fn table_register(&self, target: RefSpec) -> Result<i32, CallError> {
        let response: TableIndexResponse = self
            .call(Method::TableRegister, &RefRequest { target })?
            .recv()
            .await?;
        Ok(response.index)
    }

    pub(crate) async fn table_get_info(&self, index: i32) -> Result<TableInfo, CallError> {
        self.call(Method::TableGetInfo, &TableIndexRequest { index })?
            .recv()
            .await
    }

    pub(crate) fn table_get_data(
        &self,
        index: i32,
        start: usize,
        end: usize,
    ) -> Result<PendingCall<TableDataResponse>, CallError> {
        self.call(Method::TableGetData, &TableDataRequest { index, start, end })
    }

    pub(crate) async fn table_sort(&self, index: i32, keys: &[SortKey]) -> Result<i32, CallError> {
        let response: TableIndexResponse = self
            .call(
                Method::TableSort,
                &TableSortRequest {
                    index,
                    keys: keys.to_vec(),
                },
            )?
            .recv()
            .await?;
        Ok(response.index)
    }

    pub(crate) async fn table_filter(
        &self,
        index: i32,
        predicate: &FilterPredicate,
    ) -> Result<i32, CallError> {
        let response: TableIndexResponse = self
            .call(
                Method::TableFilter,
                &TableFilterRequest {
                    index,
                    predicate: predicate.clone(),
                },
            )?
            .recv()
            .await?;
        Ok(response.index)
    }

    pub(crate) async fn table_refresh(&self, index: i32) -> Result<bool, CallError> {
        let response: ChangedResponse = self
            .call(Method::TableRefresh, &TableIndexRequest { index })?
            .recv()
            .await?;
        Ok(response.changed)
    }

    /// Release kernel-side persistent references.
    ///
    /// # Errors
    ///
    /// Returns `CallError::Terminated` if the session is terminated.
    pub fn dispose_refs(&self, indices: &[i32]) -> Result<(), CallError> {
        self.inner.channel.notify(
            Method::DisposeRefs,
            &DisposeRefsRequest {
                indices: indices.to_vec(),
            },
        )
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
