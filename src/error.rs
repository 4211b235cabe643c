use thiserror::Error;

use crate::types::WorkspaceId;

/// Errors the coordinator returns to callers of the action surface.
///
/// Interpreter errors never appear here: they are remapped and recorded in
/// the workspace's output log instead.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("no suspended execution to resume in workspace {workspace}")]
    NoSuspendedExecution { workspace: WorkspaceId },

    #[error("workspace {0} is not open")]
    UnknownWorkspace(WorkspaceId),

    #[error("testcase {index} does not exist in workspace {workspace} ({len} testcases)")]
    TestcaseOutOfRange {
        workspace: WorkspaceId,
        index: usize,
        len: usize,
    },
}
