//! Testcase batch runner
//!
//! Runs every testcase of a workspace strictly in list order, each in a
//! freshly reset context, appending to the shared output log. A testcase
//! failure does not stop the batch; an interrupt does, leaving the testcases
//! after the interrupted one pending.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::collaborators::MessageKind;
use crate::coordinator::{Coordinator, WorkspaceEvent};
use crate::engine::Engine;
use crate::error::CoordinatorError;
use crate::signals::SignalReceiver;
use crate::types::{BatchSummary, EvaluationMode, RunOutcome, WorkspaceId};
use crate::workspace::{RunPermit, WorkspaceSlot};

#[cfg(test)]
mod tests;

impl<E: Engine> Coordinator<E> {
    /// Run all testcases of a workspace
    ///
    /// Waits for any evaluation already owning the workspace to finish.
    #[instrument(skip(self))]
    pub async fn run_all(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<BatchSummary, CoordinatorError> {
        let slot = self.workspace(workspace)?;
        let permit = slot.acquire().await;
        let mut signals = self.inner.signals.arm(workspace.clone(), false);
        Ok(self.run_batch_locked(&slot, &permit, &mut signals).await)
    }

    /// One listener covers the whole batch, so an interrupt between two
    /// testcases stops the next one
    pub(crate) async fn run_batch_locked(
        &self,
        slot: &Arc<WorkspaceSlot>,
        permit: &RunPermit,
        signals: &mut SignalReceiver,
    ) -> BatchSummary {
        let workspace = slot.id().clone();
        let total = slot.read(|state| state.testcases.len());

        // Nothing to run, nothing to announce
        if total == 0 {
            return BatchSummary::default();
        }

        let notifications = &self.config().notifications;
        self.notify("Running all testcases!", notifications.short(), MessageKind::Success);
        self.emit(WorkspaceEvent::BatchStarted {
            workspace: workspace.clone(),
            total,
        });

        let mut aborted = false;
        for index in 0..total {
            match self
                .execute(slot, permit, signals, EvaluationMode::TestcaseRun(index))
                .await
            {
                Ok(RunOutcome::Interrupted) => {
                    aborted = true;
                    break;
                }
                Ok(_) => {}
                // Testcases removed while the batch was running
                Err(_) => break,
            }
        }

        let summary = slot.read(|state| BatchSummary::from_testcases(&state.testcases, aborted));
        info!(%workspace, %summary, aborted, "testcase batch finished");

        if aborted {
            self.warn("Batch aborted");
        } else {
            let kind = if summary.failed == 0 {
                MessageKind::Success
            } else {
                MessageKind::Warning
            };
            self.notify(&summary.to_string(), notifications.short(), kind);
        }

        self.emit(WorkspaceEvent::BatchFinished { workspace, summary });
        summary
    }
}
