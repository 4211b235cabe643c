//! Resumable paused executions, one slot per workspace

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::engine::{Context, Location};
use crate::types::WorkspaceId;

/// Paused computation plus what is needed to continue it
#[derive(Debug)]
pub struct SuspendedExecution<S> {
    pub snapshot: S,
    /// Context the computation was running in
    pub context: Context,
    /// Prepend line count of the run that produced the snapshot
    pub prepend_lines: i32,
    /// Where the computation stopped, in composed-source coordinates
    pub location: Option<Location>,
}

pub struct DebuggerSession<S> {
    suspended: Mutex<HashMap<WorkspaceId, SuspendedExecution<S>>>,
}

impl<S> Default for DebuggerSession<S> {
    fn default() -> Self {
        Self {
            suspended: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> DebuggerSession<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot, replacing whatever the workspace held before
    pub fn store(&self, workspace: WorkspaceId, execution: SuspendedExecution<S>) {
        self.lock().insert(workspace, execution);
    }

    /// Remove and return the workspace's snapshot
    pub fn take(&self, workspace: &WorkspaceId) -> Option<SuspendedExecution<S>> {
        self.lock().remove(workspace)
    }

    pub fn contains(&self, workspace: &WorkspaceId) -> bool {
        self.lock().contains_key(workspace)
    }

    /// Drop the workspace's snapshot; returns whether one was stored
    pub fn clear(&self, workspace: &WorkspaceId) -> bool {
        self.lock().remove(workspace).is_some()
    }

    pub fn location(&self, workspace: &WorkspaceId) -> Option<Location> {
        self.lock()
            .get(workspace)
            .and_then(|execution| execution.location)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkspaceId, SuspendedExecution<S>>> {
        self.suspended.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
