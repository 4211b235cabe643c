use serde::Serialize;

use crate::types::{BatchSummary, EvaluationMode, OutcomeKind, WorkspaceId};

/// State transitions observable by a UI or a test, in the order they happen
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkspaceEvent {
    OutputCleared {
        workspace: WorkspaceId,
    },
    ContextReset {
        workspace: WorkspaceId,
        chapter: u8,
    },
    RunStarted {
        workspace: WorkspaceId,
        mode: EvaluationMode,
    },
    RunCompleted {
        workspace: WorkspaceId,
        mode: EvaluationMode,
        outcome: OutcomeKind,
    },
    TestcaseReset {
        workspace: WorkspaceId,
        index: usize,
    },
    TestcaseSucceeded {
        workspace: WorkspaceId,
        index: usize,
    },
    TestcaseFailed {
        workspace: WorkspaceId,
        index: usize,
    },
    BatchStarted {
        workspace: WorkspaceId,
        total: usize,
    },
    BatchFinished {
        workspace: WorkspaceId,
        summary: BatchSummary,
    },
    DebuggerReset {
        workspace: WorkspaceId,
    },
}

impl WorkspaceEvent {
    pub fn workspace(&self) -> &WorkspaceId {
        match self {
            WorkspaceEvent::OutputCleared { workspace }
            | WorkspaceEvent::ContextReset { workspace, .. }
            | WorkspaceEvent::RunStarted { workspace, .. }
            | WorkspaceEvent::RunCompleted { workspace, .. }
            | WorkspaceEvent::TestcaseReset { workspace, .. }
            | WorkspaceEvent::TestcaseSucceeded { workspace, .. }
            | WorkspaceEvent::TestcaseFailed { workspace, .. }
            | WorkspaceEvent::BatchStarted { workspace, .. }
            | WorkspaceEvent::BatchFinished { workspace, .. }
            | WorkspaceEvent::DebuggerReset { workspace } => workspace,
        }
    }
}
