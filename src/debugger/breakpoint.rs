//! Client-side breakpoint bookkeeping.
//!
//! Every breakpoint is mirrored to the kernel when set or changed; the
//! registry only tracks what was sent so the UI can list, update and
//! remove breakpoints, and so kernel-initiated removals (one-shot
//! breakpoints) can be applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::protocol::BreakpointSpec;

/// A breakpoint as requested by the caller; the registry assigns the id.
#[derive(Debug, Clone, Default)]
pub struct BreakpointRequest {
    pub file: String,
    pub line: u32,
    pub enabled: bool,
    /// Suspend execution on hit. With `false` the breakpoint only runs
    /// its `evaluate_and_log` expression and continues.
    pub suspend: bool,
    pub condition: Option<String>,
    pub evaluate_and_log: Option<String>,
    pub remove_after_hit: bool,
}

impl BreakpointRequest {
    /// A plain suspending breakpoint at a position.
    #[must_use]
    pub fn at(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
            enabled: true,
            suspend: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
pub(crate) struct BreakpointRegistry {
    next_id: AtomicU32,
    by_id: Mutex<HashMap<u32, BreakpointSpec>>,
    muted: AtomicBool,
}

impl BreakpointRegistry {
    /// Allocate an id and record the breakpoint.
    pub(crate) fn register(&self, request: &BreakpointRequest) -> BreakpointSpec {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let spec = BreakpointSpec {
            id,
            file: request.file.clone(),
            line: request.line,
            enabled: request.enabled,
            suspend: request.suspend,
            condition: request.condition.clone(),
            evaluate_and_log: request.evaluate_and_log.clone(),
            remove_after_hit: request.remove_after_hit,
        };
        self.by_id
            .lock()
            .expect("breakpoint registry lock poisoned")
            .insert(id, spec.clone());
        spec
    }

    pub(crate) fn remove(&self, id: u32) -> bool {
        self.by_id
            .lock()
            .expect("breakpoint registry lock poisoned")
            .remove(&id)
            .is_some()
    }

    pub(crate) fn list(&self) -> Vec<BreakpointSpec> {
        let mut all: Vec<BreakpointSpec> = self
            .by_id
            .lock()
            .expect("breakpoint registry lock poisoned")
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|bp| bp.id);
        all
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub(crate) fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}
