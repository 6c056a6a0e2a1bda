//! Opaque handles to kernel-resident values.
//!
//! A reference is only valid for the lifetime of the session that issued
//! it; it is never serialized outside the session and dereferencing after
//! termination fails with a `Terminated` call error.

use crate::protocol::RefSpec;
use crate::session::Session;

/// A reference to a value or environment inside the kernel.
#[derive(Clone)]
pub struct RemoteRef {
    spec: RefSpec,
    session: Session,
}

impl RemoteRef {
    pub(crate) fn from_spec(spec: RefSpec, session: Session) -> Self {
        Self { spec, session }
    }

    /// The interpreter's global environment.
    #[must_use]
    pub fn global_env(session: &Session) -> Self {
        Self::from_spec(RefSpec::GlobalEnv, session.clone())
    }

    /// The environment execution is currently suspended in.
    #[must_use]
    pub fn current_env(session: &Session) -> Self {
        Self::from_spec(RefSpec::CurrentEnv, session.clone())
    }

    /// The value of an expression evaluated in the current environment.
    #[must_use]
    pub fn expression(code: impl Into<String>, session: &Session) -> Self {
        Self::from_spec(RefSpec::Expression { code: code.into() }, session.clone())
    }

    #[must_use]
    pub fn spec(&self) -> &RefSpec {
        &self.spec
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for RemoteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteRef")
            .field("spec", &self.spec)
            .field("session", &self.session.id())
            .finish()
    }
}

/// A value pinned kernel-side behind a persistent index.
///
/// The kernel keeps the value alive until the index is disposed. Dropping
/// the handle enqueues the disposal; after termination it is skipped.
#[derive(Debug)]
pub struct PersistentRef {
    index: i32,
    session: Session,
}

impl PersistentRef {
    pub(crate) fn new(index: i32, session: Session) -> Self {
        Self { index, session }
    }

    #[must_use]
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Wire reference to the pinned value.
    #[must_use]
    pub fn as_ref_spec(&self) -> RefSpec {
        RefSpec::Persistent { index: self.index }
    }
}

impl Drop for PersistentRef {
    fn drop(&mut self) {
        // Best-effort: the queue accepts the frame from any context and
        // the call is meaningless once the kernel is gone.
        let _ = self.session.dispose_refs(&[self.index]);
    }
}
