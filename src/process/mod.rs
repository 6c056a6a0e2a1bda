//! Kernel subprocess supervision.

mod spawn;

pub use spawn::{KernelProcess, KernelProcessBuilder, SpawnError};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;

/// Forward kernel stderr lines to the log.
///
/// The protocol lives on stdin/stdout; stderr only carries wrapper
/// diagnostics and crash output, so it is logged rather than parsed.
pub(crate) fn log_stderr(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::warn!(target: "kernel_interop::kernel_stderr", "{line}");
        }
    });
}
