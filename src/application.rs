//! Application entry point
//!
//! Bundles a loaded [`Config`] with a [`Coordinator`] and exposes the action
//! surface a front end drives: evaluation requests, debugger controls,
//! library selection and the plain workspace state setters.

use anyhow::Result;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;

use crate::collaborators::{Notifier, Visualizer};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorBuilder};
use crate::engine::{Engine, ScriptEngine};
use crate::error::CoordinatorError;
use crate::library::{ExternalLibraryName, LibraryLoader};
use crate::types::{BatchSummary, RunOutcome, SideContentTab, Testcase, WorkspaceId};
use crate::workspace::WorkspaceState;

/// The evalpad application instance
pub struct Application<E: Engine = ScriptEngine> {
    pub config: Config,
    pub coordinator: Coordinator<E>,
}

impl<E: Engine> Application<E> {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, coordinator: Coordinator<E>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &Coordinator<E> {
        &self.coordinator
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /* ===================== Actions ===================== */

    pub async fn evaluate_editor(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.coordinator.evaluate_editor(workspace).await
    }

    pub async fn evaluate_repl(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.coordinator.evaluate_repl(workspace).await
    }

    pub async fn evaluate_testcase(
        &self,
        workspace: WorkspaceId,
        index: usize,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.coordinator.evaluate_testcase(workspace, index).await
    }

    pub async fn run_all_testcases(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<BatchSummary, CoordinatorError> {
        self.coordinator.run_all(workspace).await
    }

    pub async fn debug_resume(
        &self,
        workspace: WorkspaceId,
    ) -> Result<RunOutcome, CoordinatorError> {
        self.coordinator.debug_resume(workspace).await
    }

    pub fn debug_pause(&self, workspace: &WorkspaceId) -> bool {
        self.coordinator.debug_pause(workspace)
    }

    pub async fn debug_reset(&self, workspace: &WorkspaceId) -> Result<(), CoordinatorError> {
        self.coordinator.debug_reset(workspace).await
    }

    pub fn interrupt(&self, workspace: &WorkspaceId) -> bool {
        self.coordinator.interrupt(workspace)
    }

    pub async fn select_chapter(
        &self,
        workspace: &WorkspaceId,
        chapter: u8,
    ) -> Result<bool, CoordinatorError> {
        self.coordinator.select_chapter(workspace, chapter).await
    }

    pub async fn select_external_library(
        &self,
        workspace: &WorkspaceId,
        library: ExternalLibraryName,
    ) -> Result<bool, CoordinatorError> {
        self.coordinator
            .select_external_library(workspace, library)
            .await
    }

    pub fn set_globals(
        &self,
        workspace: &WorkspaceId,
        globals: Vec<(String, JsonValue)>,
    ) -> Result<(), CoordinatorError> {
        self.coordinator.set_globals(workspace, globals)
    }

    pub fn set_breakpoints(
        &self,
        workspace: &WorkspaceId,
        lines: impl IntoIterator<Item = i32>,
    ) -> Result<(), CoordinatorError> {
        self.coordinator.set_breakpoints(workspace, lines)
    }

    /* ===================== Setters ===================== */

    pub fn update_editor_value(
        &self,
        workspace: &WorkspaceId,
        value: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let value = value.into();
        self.update(workspace, |state| state.editor_value = value)
    }

    pub fn update_editor_prepend(
        &self,
        workspace: &WorkspaceId,
        prepend: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let prepend = prepend.into();
        self.update(workspace, |state| state.editor_prepend = prepend)
    }

    pub fn update_editor_postpend(
        &self,
        workspace: &WorkspaceId,
        postpend: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let postpend = postpend.into();
        self.update(workspace, |state| state.editor_postpend = postpend)
    }

    pub fn update_repl_value(
        &self,
        workspace: &WorkspaceId,
        value: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let value = value.into();
        self.update(workspace, |state| state.repl_value = value)
    }

    /// Change the time budget used by subsequent evaluations
    pub fn change_exec_time(
        &self,
        workspace: &WorkspaceId,
        exec_time_ms: u64,
    ) -> Result<(), CoordinatorError> {
        self.update(workspace, |state| state.exec_time_ms = exec_time_ms)
    }

    pub fn update_active_tab(
        &self,
        workspace: &WorkspaceId,
        tab: SideContentTab,
    ) -> Result<(), CoordinatorError> {
        self.update(workspace, |state| state.active_tab = tab)
    }

    pub fn set_testcases(
        &self,
        workspace: &WorkspaceId,
        testcases: Vec<Testcase>,
    ) -> Result<(), CoordinatorError> {
        self.update(workspace, |state| state.testcases = testcases)
    }

    pub fn clear_output(&self, workspace: &WorkspaceId) -> Result<(), CoordinatorError> {
        let slot = self.coordinator.workspace(workspace)?;
        self.coordinator.clear_output(&slot);
        Ok(())
    }

    pub fn workspace_state(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<WorkspaceState, CoordinatorError> {
        self.coordinator.snapshot(workspace)
    }

    fn update(
        &self,
        workspace: &WorkspaceId,
        f: impl FnOnce(&mut WorkspaceState),
    ) -> Result<(), CoordinatorError> {
        self.coordinator.workspace(workspace)?.update(f);
        Ok(())
    }
}

/// Options for initializing evalpad
#[derive(Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Default execution-time budget in milliseconds
    pub exec_time_ms: Option<u64>,

    /// Chapter new workspaces start in
    pub chapter: Option<u8>,

    pub notifier: Option<Arc<dyn Notifier>>,
    pub visualizer: Option<Arc<dyn Visualizer>>,
    pub loader: Option<Arc<dyn LibraryLoader>>,
}

/// Builder for constructing InitOptions
#[derive(Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn exec_time_ms(mut self, ms: u64) -> Self {
        self.options.exec_time_ms = Some(ms);
        self
    }

    pub fn chapter(mut self, chapter: u8) -> Self {
        self.options.chapter = Some(chapter);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.options.notifier = Some(notifier);
        self
    }

    pub fn visualizer(mut self, visualizer: Arc<dyn Visualizer>) -> Self {
        self.options.visualizer = Some(visualizer);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn LibraryLoader>) -> Self {
        self.options.loader = Some(loader);
        self
    }

    /// Initialize evalpad over the reference engine
    pub fn init(self) -> Result<Application> {
        initialize(self.options)
    }
}

/// Load configuration and build an Application over the reference engine
pub fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .config_path(options.config_path)
        .exec_time_ms(options.exec_time_ms)
        .chapter(options.chapter)
        .build()?;

    let mut builder = CoordinatorBuilder::new(ScriptEngine::new()).config(config.clone());
    if let Some(notifier) = options.notifier {
        builder = builder.notifier(notifier);
    }
    if let Some(visualizer) = options.visualizer {
        builder = builder.visualizer(visualizer);
    }
    if let Some(loader) = options.loader {
        builder = builder.loader(loader);
    }

    Ok(Application::new(config, builder.build()))
}
