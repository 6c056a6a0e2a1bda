//! Explicit registry of kernel sessions keyed by project identity.
//!
//! Replaces per-window singletons: the owning layer creates the registry,
//! creates and closes sessions explicitly, and may relaunch a crashed
//! session restoring the saved environment snapshot.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::config::KernelConfig;
use crate::session::{LaunchError, Session};

/// Sessions keyed by project (or window) identity.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the live session for `key`, launching one if absent or dead.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError` if a new session has to be launched and fails.
    pub async fn open(&self, key: &str, config: &KernelConfig) -> Result<Session, LaunchError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(key) {
            if existing.is_alive() {
                return Ok(existing.clone());
            }
        }
        let session = Session::launch(config).await?;
        sessions.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Session registered for `key`, if any (possibly terminated).
    pub async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Terminate and drop the session for `key`.
    pub async fn close(&self, key: &str) {
        let removed = self.sessions.lock().await.remove(key);
        if let Some(session) = removed {
            session.terminate().await;
        }
    }

    /// Replace the session for `key` with a fresh kernel, restoring the
    /// saved environment snapshot if one exists.
    ///
    /// Nothing that was in flight in the old session is replayed; its
    /// pending calls have already failed with a termination error.
    ///
    /// # Errors
    ///
    /// Returns `LaunchError` if the new session cannot be launched.
    pub async fn relaunch(&self, key: &str, config: &KernelConfig) -> Result<Session, LaunchError> {
        self.close(key).await;

        let session = Session::launch(config).await?;
        if let Some(snapshot) = &config.snapshot.file {
            if snapshot.exists() && !config.snapshot.load_on_start {
                // With load_on_start the init handshake already restored it.
                if let Err(e) = session.load_environment(snapshot).await {
                    tracing::warn!(error = %e, file = %snapshot.display(), "Failed to restore environment snapshot");
                }
            }
        }

        self.sessions
            .lock()
            .await
            .insert(key.to_string(), session.clone());
        tracing::info!(key, session = %session.id(), "Session relaunched");
        Ok(session)
    }

    /// Terminate every registered session.
    pub async fn close_all(&self) {
        let sessions: Vec<Session> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.terminate().await;
        }
    }
}
