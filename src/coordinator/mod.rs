//! Execution coordinator
//!
//! Accepts evaluation requests, composes the program from workspace state,
//! hands it to the engine and races the engine call against the workspace's
//! interrupt and pause signals. Whatever resolves first decides the outcome,
//! which is then written back to the workspace as output entries, testcase
//! results and debugger state.
//!
//! Evaluations on one workspace are serialized through its run lock; a new
//! top-level request first interrupts whatever currently owns the workspace.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{
    MessageKind, NoVisualizer, Notifier, TracingNotifier, Visualizer, VisualizerUnavailable,
};
use crate::config::Config;
use crate::debugger::{DebuggerSession, SuspendedExecution};
use crate::engine::{
    Console, Context, Engine, Location, RunOptions, RunResult, SchedulingMode, SourceError,
};
use crate::error::CoordinatorError;
use crate::library::{
    wait_until_ready, BundledLibraries, ExternalLibraryName, LibraryConfig, LibraryLoader,
};
use crate::signals::{Signal, SignalBus, SignalReceiver};
use crate::types::{
    EvaluationMode, EvaluationRequest, RunOutcome, SideContentTab, TestcaseResult, WorkspaceId,
};
use crate::workspace::{Registry, RunPermit, WorkspaceSlot, WorkspaceState};

pub mod compose;
mod events;

pub use events::WorkspaceEvent;

use compose::{compose, compose_repl, highlight_for, shift_breakpoints};


/// Value shown when a run stops at a breakpoint
pub const BREAKPOINT_SENTINEL: &str = "Breakpoint hit!";

/* ===================== Coordinator ===================== */

pub struct Coordinator<E: Engine> {
    pub(crate) inner: Arc<Inner<E>>,
}

impl<E: Engine> Clone for Coordinator<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct Inner<E: Engine> {
    pub(crate) engine: E,
    pub(crate) registry: Registry,
    pub(crate) signals: SignalBus,
    pub(crate) debugger: DebuggerSession<E::Snapshot>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) visualizer: Arc<dyn Visualizer>,
    pub(crate) loader: Arc<dyn LibraryLoader>,
    pub(crate) events: broadcast::Sender<WorkspaceEvent>,
    pub(crate) config: Config,
}

/// Builder for a [`Coordinator`]
///
/// Collaborators default to tracing notifications, no visualizer and bundled
/// libraries. The playground and assessment workspaces are opened on build.
pub struct CoordinatorBuilder<E: Engine> {
    engine: E,
    config: Config,
    notifier: Arc<dyn Notifier>,
    visualizer: Arc<dyn Visualizer>,
    loader: Arc<dyn LibraryLoader>,
}

impl<E: Engine> CoordinatorBuilder<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            config: Config::default(),
            notifier: Arc::new(TracingNotifier),
            visualizer: Arc::new(NoVisualizer),
            loader: Arc::new(BundledLibraries),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.visualizer = visualizer;
        self
    }

    pub fn loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn build(self) -> Coordinator<E> {
        let (events, _) = broadcast::channel(self.config.events.capacity.max(1));

        let coordinator = Coordinator {
            inner: Arc::new(Inner {
                engine: self.engine,
                registry: Registry::new(),
                signals: SignalBus::new(),
                debugger: DebuggerSession::new(),
                notifier: self.notifier,
                visualizer: self.visualizer,
                loader: self.loader,
                events,
                config: self.config,
            }),
        };

        coordinator.open_workspace(WorkspaceId::Playground);
        coordinator.open_workspace(WorkspaceId::Assessment);
        coordinator
    }
}

/// Where an evaluation starts from
enum Start<S> {
    Source(String),
    Snapshot(S),
}

struct Prepared<S> {
    start: Start<S>,
    context: Context,
    prepend_lines: i32,
}

impl<E: Engine> Coordinator<E> {
    pub fn builder(engine: E) -> CoordinatorBuilder<E> {
        CoordinatorBuilder::new(engine)
    }

    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Open a workspace, or return the existing one
    ///
    /// New workspaces start with the configured default chapter, no external
    /// library and no host globals.
    pub fn open_workspace(&self, id: WorkspaceId) -> Arc<WorkspaceSlot> {
        let defaults = &self.inner.config.execution;
        self.inner.registry.open_with(id, || {
            let context = self
                .inner
                .engine
                .create_context(&LibraryConfig::new(defaults.chapter));
            WorkspaceState::new(defaults, context)
        })
    }

    pub fn workspace(&self, id: &WorkspaceId) -> Result<Arc<WorkspaceSlot>, CoordinatorError> {
        self.inner.registry.slot(id)
    }

    pub fn workspaces(&self) -> Vec<WorkspaceId> {
        self.inner.registry.ids()
    }

    /// Copy of a workspace's current state
    pub fn snapshot(&self, id: &WorkspaceId) -> Result<WorkspaceState, CoordinatorError> {
        Ok(self.workspace(id)?.snapshot())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a paused execution is waiting to be resumed
    pub fn has_suspended(&self, id: &WorkspaceId) -> bool {
        self.inner.debugger.contains(id)
    }

    /* ===================== Evaluation ===================== */

    /// Run one evaluation to its terminal state
    ///
    /// Interpreter errors and interruptions are outcomes, not errors: they
    /// are recorded in the workspace and reported through [`RunOutcome`].
    #[instrument(skip(self), fields(workspace = %request.workspace, mode = ?request.mode))]
    pub async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<RunOutcome, CoordinatorError> {
        let EvaluationRequest { workspace, mode } = request;
        let slot = self.inner.registry.slot(&workspace)?;

        match mode {
            EvaluationMode::DebugResume if !self.inner.debugger.contains(&workspace) => {
                return Err(CoordinatorError::NoSuspendedExecution { workspace });
            }
            EvaluationMode::TestcaseRun(index) => {
                let len = slot.read(|state| state.testcases.len());
                if index >= len {
                    return Err(CoordinatorError::TestcaseOutOfRange {
                        workspace,
                        index,
                        len,
                    });
                }
            }
            _ => {}
        }

        if mode.is_top_level() {
            self.inner.signals.fire(&workspace, Signal::Interrupt);
        }

        let permit = slot.acquire().await;
        // Armed for as long as the permit is held, preparation included
        let mut signals = self.inner.signals.arm(workspace, mode.accepts_pause());
        let outcome = self.execute(&slot, &permit, &mut signals, mode).await?;

        if mode == EvaluationMode::EditorRun
            && matches!(outcome, RunOutcome::Finished(_))
            && self.autograder_active(&slot)
        {
            signals.accept_pause(false);
            self.run_batch_locked(&slot, &permit, &mut signals).await;
        }

        Ok(outcome)
    }

    pub async fn evaluate_editor(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.evaluate(EvaluationRequest::editor(workspace)).await
    }

    pub async fn evaluate_repl(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.evaluate(EvaluationRequest::repl(workspace)).await
    }

    pub async fn evaluate_testcase(
        &self,
        workspace: WorkspaceId,
        index: usize,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.evaluate(EvaluationRequest::testcase(workspace, index)).await
    }

    pub async fn debug_resume(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.evaluate(EvaluationRequest::resume(workspace)).await
    }

    fn autograder_active(&self, slot: &WorkspaceSlot) -> bool {
        slot.id().is_graded() && slot.read(|state| state.active_tab == SideContentTab::Autograder)
    }

    /// Prepare, run and record one evaluation; the caller owns the workspace
    pub(crate) async fn execute(
        &self,
        slot: &Arc<WorkspaceSlot>,
        _permit: &RunPermit,
        signals: &mut SignalReceiver,
        mode: EvaluationMode,
    ) -> Result<RunOutcome, CoordinatorError> {
        let workspace = slot.id().clone();
        let Prepared {
            start,
            context,
            prepend_lines,
        } = self.prepare(slot, mode).await?;

        let execution = &self.inner.config.execution;
        let debugger_on = mode.accepts_pause() && context.chapter >= execution.debugger_chapter;
        if !debugger_on && context.chapter >= execution.debugger_chapter {
            swallow(self.inner.visualizer.update_context(None));
        }

        let (exec_time_ms, breakpoints) = slot.update(|state| {
            state.begin_run();
            (state.exec_time_ms, state.breakpoints.clone())
        });

        let console = {
            let slot = Arc::clone(slot);
            Console::new(move |line| slot.update(|state| state.append_log(line)))
        };
        let cancel = CancellationToken::new();
        let pause = CancellationToken::new();
        let options = RunOptions {
            scheduling: SchedulingMode::Preemptive,
            time_budget: Duration::from_millis(exec_time_ms),
            debugger_on,
            breakpoints: shift_breakpoints(&breakpoints, prepend_lines),
            cancel: cancel.clone(),
            pause: pause.clone(),
            console,
        };

        let run_id = Uuid::new_v4();
        debug!(%run_id, %workspace, ?mode, debugger_on, exec_time_ms, "run started");
        self.emit(WorkspaceEvent::RunStarted {
            workspace: workspace.clone(),
            mode,
        });

        // Signals that arrived while preparing
        let mut paused = false;
        while let Some(signal) = signals.try_recv() {
            match signal {
                Signal::Interrupt => {
                    info!(%run_id, %workspace, "run interrupted before the engine started");
                    return Ok(self.finish_interrupted(slot, mode));
                }
                Signal::Pause => {
                    debug!(%run_id, "pause requested");
                    paused = true;
                    pause.cancel();
                }
            }
        }

        let text: String;
        let mut run = match start {
            Start::Source(source) => {
                text = source;
                self.inner.engine.run(&text, &context, options)
            }
            Start::Snapshot(snapshot) => self.inner.engine.resume(snapshot, &context, options),
        };

        let mut listening = true;
        let result = loop {
            tokio::select! {
                biased;
                result = &mut run => break Some(result),
                signal = signals.recv(), if listening => match signal {
                    Some(Signal::Interrupt) => break None,
                    Some(Signal::Pause) => {
                        debug!(%run_id, "pause requested");
                        paused = true;
                        pause.cancel();
                    }
                    None => listening = false,
                },
            }
        };

        let Some(result) = result else {
            cancel.cancel();
            self.inner.engine.interrupt(&context);
            drop(run);
            info!(%run_id, %workspace, "run interrupted");
            return Ok(self.finish_interrupted(slot, mode));
        };
        drop(run);

        let outcome = match result {
            RunResult::Finished(value) => self.finish_value(slot, mode, value),
            RunResult::Error(errors) => self.finish_errors(slot, mode, errors, prepend_lines),
            RunResult::Suspended { .. } if matches!(mode, EvaluationMode::TestcaseRun(_)) => {
                // Testcases run without the debugger; a suspension is a failure
                self.finish_errors(slot, mode, Vec::new(), prepend_lines)
            }
            RunResult::Suspended { snapshot, location } => {
                self.present_location(slot, &context, location.as_ref(), prepend_lines);
                self.inner.debugger.store(
                    workspace.clone(),
                    SuspendedExecution {
                        snapshot,
                        context,
                        prepend_lines,
                        location,
                    },
                );

                if paused {
                    self.warn("Execution paused");
                    RunOutcome::Paused
                } else {
                    slot.update(|state| {
                        state.append_result(JsonValue::String(BREAKPOINT_SENTINEL.to_string()))
                    });
                    RunOutcome::BreakpointHit
                }
            }
        };

        debug!(%run_id, outcome = ?outcome.kind(), "run completed");
        self.emit(WorkspaceEvent::RunCompleted {
            workspace,
            mode,
            outcome: outcome.kind(),
        });
        Ok(outcome)
    }

    /// Per-mode preparation: output, context and the program to run
    async fn prepare(
        &self,
        slot: &WorkspaceSlot,
        mode: EvaluationMode,
    ) -> Result<Prepared<E::Snapshot>, CoordinatorError> {
        let workspace = slot.id();

        match mode {
            EvaluationMode::EditorRun => {
                // A new editor run supersedes any paused execution
                self.inner.debugger.clear(workspace);
                self.reset_context(slot).await;
                self.clear_output(slot);

                let (source, context) =
                    slot.read(|state| (compose(state, None), state.context.clone()));
                Ok(Prepared {
                    start: Start::Source(source.text),
                    context,
                    prepend_lines: source.prepend_lines,
                })
            }
            EvaluationMode::ReplRun => {
                let (source, context) = slot.update(|state| {
                    let input = std::mem::take(&mut state.repl_value);
                    state.push_code(input.clone());
                    (compose_repl(&input), state.context.clone())
                });
                Ok(Prepared {
                    start: Start::Source(source.text),
                    context,
                    prepend_lines: source.prepend_lines,
                })
            }
            EvaluationMode::DebugResume => {
                let suspended = self.inner.debugger.take(workspace).ok_or_else(|| {
                    CoordinatorError::NoSuspendedExecution {
                        workspace: workspace.clone(),
                    }
                })?;
                self.clear_output(slot);
                self.clear_highlight(slot);

                Ok(Prepared {
                    start: Start::Snapshot(suspended.snapshot),
                    context: suspended.context,
                    prepend_lines: suspended.prepend_lines,
                })
            }
            EvaluationMode::TestcaseRun(index) => {
                let program = slot
                    .update(|state| {
                        state.reset_testcase(index);
                        state.testcase(index).map(|testcase| testcase.program.clone())
                    })
                    .ok_or_else(|| CoordinatorError::TestcaseOutOfRange {
                        workspace: workspace.clone(),
                        index,
                        len: slot.read(|state| state.testcases.len()),
                    })?;
                self.emit(WorkspaceEvent::TestcaseReset {
                    workspace: workspace.clone(),
                    index,
                });
                self.reset_context(slot).await;

                let (source, context) =
                    slot.read(|state| (compose(state, Some(&program)), state.context.clone()));
                Ok(Prepared {
                    start: Start::Source(source.text),
                    context,
                    prepend_lines: source.prepend_lines,
                })
            }
        }
    }

    /* ===================== Outcomes ===================== */

    fn finish_interrupted(&self, slot: &WorkspaceSlot, mode: EvaluationMode) -> RunOutcome {
        let workspace = slot.id();
        let error = SourceError::interrupted(Location::default());

        slot.update(|state| {
            // Recorded even when the engine's abort path reported nothing
            state.context.errors.push(error.clone());
            if let EvaluationMode::TestcaseRun(index) = mode {
                state.set_testcase_result(index, TestcaseResult::Failure(vec![error.clone()]));
            }
        });

        match mode {
            EvaluationMode::TestcaseRun(index) => {
                self.emit(WorkspaceEvent::TestcaseFailed {
                    workspace: workspace.clone(),
                    index,
                });
                self.warn(&format!("Execution of testcase {} aborted", index));
            }
            _ => {
                self.inner.debugger.clear(workspace);
                self.clear_highlight(slot);
                self.warn("Execution aborted");
            }
        }

        self.emit(WorkspaceEvent::RunCompleted {
            workspace: workspace.clone(),
            mode,
            outcome: RunOutcome::Interrupted.kind(),
        });
        RunOutcome::Interrupted
    }

    fn finish_value(
        &self,
        slot: &WorkspaceSlot,
        mode: EvaluationMode,
        value: JsonValue,
    ) -> RunOutcome {
        slot.update(|state| {
            state.append_result(value.clone());
            if let EvaluationMode::TestcaseRun(index) = mode {
                state.set_testcase_result(index, TestcaseResult::Success(value.clone()));
            }
        });

        if let EvaluationMode::TestcaseRun(index) = mode {
            self.emit(WorkspaceEvent::TestcaseSucceeded {
                workspace: slot.id().clone(),
                index,
            });
        } else {
            if mode == EvaluationMode::EditorRun {
                self.inner.debugger.clear(slot.id());
            }
            self.clear_highlight(slot);
        }

        RunOutcome::Finished(value)
    }

    fn finish_errors(
        &self,
        slot: &WorkspaceSlot,
        mode: EvaluationMode,
        errors: Vec<SourceError>,
        prepend_lines: i32,
    ) -> RunOutcome {
        let remapped: Vec<SourceError> = errors
            .iter()
            .map(|error| error.remapped(prepend_lines))
            .collect();

        slot.update(|state| {
            state.context.errors.extend(errors);
            state.append_errors(remapped.clone());
            if let EvaluationMode::TestcaseRun(index) = mode {
                state.set_testcase_result(index, TestcaseResult::Failure(remapped.clone()));
            }
        });

        if let EvaluationMode::TestcaseRun(index) = mode {
            self.emit(WorkspaceEvent::TestcaseFailed {
                workspace: slot.id().clone(),
                index,
            });
        } else {
            if mode == EvaluationMode::EditorRun {
                self.inner.debugger.clear(slot.id());
            }
            self.clear_highlight(slot);
        }

        RunOutcome::Errored(remapped)
    }

    /// Show where a suspended computation stopped
    fn present_location(
        &self,
        slot: &WorkspaceSlot,
        context: &Context,
        location: Option<&Location>,
        prepend_lines: i32,
    ) {
        let range = location.map(|location| highlight_for(location, prepend_lines));
        slot.update(|state| state.highlighted_lines = range);

        let visualizer = &self.inner.visualizer;
        swallow(visualizer.highlight_lines(range));
        swallow(visualizer.update_context(Some(context)));
        swallow(visualizer.draw_environment(context, location));
    }

    /// A paused execution belongs to the context it was suspended in
    fn forget_suspended(&self, slot: &WorkspaceSlot) {
        if self.inner.debugger.clear(slot.id()) {
            self.clear_highlight(slot);
        }
    }

    fn clear_highlight(&self, slot: &WorkspaceSlot) {
        slot.update(|state| state.highlighted_lines = None);
        swallow(self.inner.visualizer.highlight_lines(None));
    }

    /* ===================== Signals ===================== */

    /// Abort the evaluation owning the workspace, if any
    pub fn interrupt(&self, workspace: &WorkspaceId) -> bool {
        self.inner.signals.fire(workspace, Signal::Interrupt)
    }

    /// Ask the running editor or resumed evaluation to suspend
    pub fn debug_pause(&self, workspace: &WorkspaceId) -> bool {
        self.inner.signals.fire(workspace, Signal::Pause)
    }

    /// Return the workspace to idle: abort, forget the paused execution,
    /// clear highlight, inspector and output
    pub async fn debug_reset(&self, workspace: &WorkspaceId) -> Result<(), CoordinatorError> {
        let slot = self.inner.registry.slot(workspace)?;
        self.inner.signals.fire(workspace, Signal::Interrupt);
        let _permit = slot.acquire().await;

        self.inner.debugger.clear(workspace);
        self.clear_highlight(&slot);
        swallow(self.inner.visualizer.update_context(None));
        self.clear_output(&slot);

        self.emit(WorkspaceEvent::DebuggerReset {
            workspace: workspace.clone(),
        });
        Ok(())
    }

    /* ===================== Library Selection ===================== */

    /// Switch the workspace's chapter; a no-op when it is already selected
    pub async fn select_chapter(
        &self,
        workspace: &WorkspaceId,
        chapter: u8,
    ) -> Result<bool, CoordinatorError> {
        let slot = self.inner.registry.slot(workspace)?;
        let _permit = slot.acquire().await;

        if slot.read(|state| state.chapter) == chapter {
            return Ok(false);
        }

        slot.update(|state| state.chapter = chapter);
        self.forget_suspended(&slot);
        self.reset_context(&slot).await;
        self.clear_output(&slot);
        self.notify(
            &format!("Switched to Source \u{a7}{}", chapter),
            self.inner.config.notifications.long(),
            MessageKind::Success,
        );
        Ok(true)
    }

    /// Switch the workspace's external library; a no-op when it is already selected
    pub async fn select_external_library(
        &self,
        workspace: &WorkspaceId,
        library: ExternalLibraryName,
    ) -> Result<bool, CoordinatorError> {
        let slot = self.inner.registry.slot(workspace)?;
        let _permit = slot.acquire().await;

        if slot.read(|state| state.external_library) == library {
            return Ok(false);
        }

        slot.update(|state| state.external_library = library);
        self.forget_suspended(&slot);
        self.reset_context(&slot).await;
        self.clear_output(&slot);
        self.notify(
            &format!("Switched to {} library", library),
            self.inner.config.notifications.long(),
            MessageKind::Success,
        );
        Ok(true)
    }

    /// Replace the host globals injected into future contexts
    pub fn set_globals(
        &self,
        workspace: &WorkspaceId,
        globals: Vec<(String, JsonValue)>,
    ) -> Result<(), CoordinatorError> {
        self.inner
            .registry
            .slot(workspace)?
            .update(|state| state.globals = globals);
        Ok(())
    }

    /// Replace the breakpoint lines, in user coordinates
    pub fn set_breakpoints(
        &self,
        workspace: &WorkspaceId,
        lines: impl IntoIterator<Item = i32>,
    ) -> Result<(), CoordinatorError> {
        let lines = lines.into_iter().collect();
        self.inner
            .registry
            .slot(workspace)?
            .update(|state| state.breakpoints = lines);
        Ok(())
    }

    /* ===================== Helpers ===================== */

    /// Rebuild the workspace's context from its library configuration
    pub(crate) async fn reset_context(&self, slot: &WorkspaceSlot) {
        let libraries = &self.inner.config.libraries;
        if let Err(err) = wait_until_ready(
            self.inner.loader.as_ref(),
            libraries.poll_interval(),
            libraries.ready_timeout(),
        )
        .await
        {
            warn!(workspace = %slot.id(), %err, "resetting context before libraries loaded");
            self.warn("Error loading libraries");
        }

        let library = slot.read(WorkspaceState::library);
        self.inner.loader.load(library.external.name);
        let context = self.inner.engine.create_context(&library);
        let chapter = context.chapter;
        slot.update(|state| state.context = context);

        self.emit(WorkspaceEvent::ContextReset {
            workspace: slot.id().clone(),
            chapter,
        });
    }

    pub(crate) fn clear_output(&self, slot: &WorkspaceSlot) {
        slot.update(WorkspaceState::clear_output);
        self.emit(WorkspaceEvent::OutputCleared {
            workspace: slot.id().clone(),
        });
    }

    pub(crate) fn emit(&self, event: WorkspaceEvent) {
        // Nobody subscribed is fine
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn notify(&self, text: &str, duration: Duration, kind: MessageKind) {
        self.inner.notifier.show_message(text, duration, kind);
    }

    pub(crate) fn warn(&self, text: &str) {
        self.notify(
            text,
            self.inner.config.notifications.short(),
            MessageKind::Warning,
        );
    }
}

fn swallow(result: Result<(), VisualizerUnavailable>) {
    if let Err(err) = result {
        debug!(%err, "visualizer call skipped");
    }
}
