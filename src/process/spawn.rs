//! Kernel process spawning and control.
//!
//! This module provides a builder for configuring and spawning the
//! kernel subprocess, along with control methods for managing the
//! running process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The interpreter binary was not found.
    #[error("Kernel binary not found: {0}")]
    NotFound(PathBuf),
    /// Permission denied when spawning.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builder for configuring the kernel process.
#[derive(Debug, Clone, Default)]
pub struct KernelProcessBuilder {
    interpreter: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl KernelProcessBuilder {
    /// Create a new builder for the given interpreter binary.
    #[must_use]
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            ..Default::default()
        }
    }

    /// Add extra command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory for the kernel process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Get the working directory, if set.
    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    /// Get the interpreter path.
    #[must_use]
    pub fn interpreter(&self) -> &PathBuf {
        &self.interpreter
    }

    /// Render the full command line, shell-escaped, for logging.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.interpreter.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().cloned());
        parts
            .into_iter()
            .map(|p| shell_escape::escape(p.into()).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running kernel process.
///
/// stdin and stdout carry the protocol stream; stderr is free-form
/// diagnostics from the interpreter wrapper.
#[derive(Debug)]
pub struct KernelProcess {
    child: Child,
}

impl KernelProcess {
    /// Spawn a kernel process with the given builder configuration.
    ///
    /// Launch failures are local and synchronous; they are never retried.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(builder: &KernelProcessBuilder) -> Result<Self, SpawnError> {
        let mut cmd = Command::new(&builder.interpreter);
        cmd.args(&builder.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref dir) = builder.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(command = %builder.command_line(), "Spawning kernel process");

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SpawnError::NotFound(builder.interpreter.clone()),
            std::io::ErrorKind::PermissionDenied => {
                SpawnError::PermissionDenied(builder.interpreter.clone())
            }
            _ => SpawnError::Io(e),
        })?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGTERM first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            let _ = kill(nix_pid, Signal::SIGTERM);

            let wait_result = tokio::time::timeout(timeout, self.child.wait()).await;

            match wait_result {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    // Timeout elapsed, force kill
                    self.child.kill().await
                }
            }
        } else {
            // Process already exited
            Ok(())
        }
    }
}
