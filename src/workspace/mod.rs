//! Workspace registry
//!
//! Every workspace owns its editor and REPL text, library configuration,
//! interpreter context, breakpoints, testcases and output log. State lives
//! behind a synchronous mutex that is never held across an await; evaluations
//! are serialized per workspace through a separate async run lock.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::config::ExecutionConfig;
use crate::engine::{Context, SourceError};
use crate::error::CoordinatorError;
use crate::library::{ExternalLibrary, ExternalLibraryName, LibraryConfig};
use crate::types::{LineRange, OutputEntry, SideContentTab, Testcase, TestcaseResult, WorkspaceId};


/* ===================== State ===================== */

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkspaceState {
    pub editor_prepend: String,
    pub editor_value: String,
    pub editor_postpend: String,
    pub repl_value: String,
    pub exec_time_ms: u64,
    pub chapter: u8,
    pub external_library: ExternalLibraryName,
    /// Host globals injected into every new context, in order
    pub globals: Vec<(String, JsonValue)>,
    pub context: Context,
    /// Breakpoint lines in user coordinates
    pub breakpoints: BTreeSet<i32>,
    pub highlighted_lines: Option<LineRange>,
    pub active_tab: SideContentTab,
    pub testcases: Vec<Testcase>,
    pub output: Vec<OutputEntry>,
    /// Output entries before this index belong to earlier runs
    #[serde(skip)]
    log_boundary: usize,
}

impl WorkspaceState {
    pub fn new(defaults: &ExecutionConfig, context: Context) -> Self {
        Self {
            editor_prepend: String::new(),
            editor_value: String::new(),
            editor_postpend: String::new(),
            repl_value: String::new(),
            exec_time_ms: defaults.exec_time_ms,
            chapter: context.chapter,
            external_library: context.external.name,
            globals: context.globals.clone(),
            context,
            breakpoints: BTreeSet::new(),
            highlighted_lines: None,
            active_tab: SideContentTab::default(),
            testcases: Vec::new(),
            output: Vec::new(),
            log_boundary: 0,
        }
    }

    /// Library configuration the next context reset is built from
    pub fn library(&self) -> LibraryConfig {
        LibraryConfig {
            chapter: self.chapter,
            external: ExternalLibrary::named(self.external_library),
            globals: self.globals.clone(),
        }
    }

    /// Mark the start of a run's output; console lines never join an
    /// earlier run's entries
    pub fn begin_run(&mut self) {
        self.log_boundary = self.output.len();
    }

    pub fn append_log(&mut self, line: String) {
        if self.output.len() > self.log_boundary {
            if let Some(OutputEntry::Log { lines }) = self.output.last_mut() {
                lines.push(line);
                return;
            }
        }
        self.output.push(OutputEntry::Log { lines: vec![line] });
    }

    pub fn append_result(&mut self, value: JsonValue) {
        let lines = self.take_run_log();
        self.output.push(OutputEntry::Result { value, lines });
    }

    pub fn append_errors(&mut self, errors: Vec<SourceError>) {
        let lines = self.take_run_log();
        self.output.push(OutputEntry::Errors { errors, lines });
    }

    pub fn push_code(&mut self, text: String) {
        self.output.push(OutputEntry::Code { text });
        self.log_boundary = self.output.len();
    }

    pub fn clear_output(&mut self) {
        self.output.clear();
        self.log_boundary = 0;
    }

    // Trailing log of the current run, removed so the terminal entry owns it
    fn take_run_log(&mut self) -> Vec<String> {
        if self.output.len() > self.log_boundary
            && matches!(self.output.last(), Some(OutputEntry::Log { .. }))
        {
            if let Some(OutputEntry::Log { lines }) = self.output.pop() {
                return lines;
            }
        }
        Vec::new()
    }

    pub fn testcase(&self, index: usize) -> Option<&Testcase> {
        self.testcases.get(index)
    }

    pub fn reset_testcase(&mut self, index: usize) {
        self.set_testcase_result(index, TestcaseResult::Pending);
    }

    pub fn set_testcase_result(&mut self, index: usize, result: TestcaseResult) {
        if let Some(testcase) = self.testcases.get_mut(index) {
            testcase.result = result;
        }
    }
}

/* ===================== Slots ===================== */

/// One workspace: its state plus the lock serializing its evaluations
pub struct WorkspaceSlot {
    id: WorkspaceId,
    state: Mutex<WorkspaceState>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Proof that the holder owns the workspace's evaluation slot
pub struct RunPermit {
    workspace: WorkspaceId,
    _guard: OwnedMutexGuard<()>,
}

impl RunPermit {
    pub fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }
}

impl WorkspaceSlot {
    fn new(id: WorkspaceId, state: WorkspaceState) -> Self {
        Self {
            id,
            state: Mutex::new(state),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorkspaceState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut WorkspaceState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> WorkspaceState {
        self.read(WorkspaceState::clone)
    }

    /// Wait until no other evaluation owns the workspace
    pub async fn acquire(&self) -> RunPermit {
        let guard = Arc::clone(&self.run_lock).lock_owned().await;
        debug!(workspace = %self.id, "acquired run permit");
        RunPermit {
            workspace: self.id.clone(),
            _guard: guard,
        }
    }

    /// Whether an evaluation currently owns the workspace
    pub fn is_busy(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }
}

/* ===================== Registry ===================== */

#[derive(Default)]
pub struct Registry {
    slots: RwLock<HashMap<WorkspaceId, Arc<WorkspaceSlot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the workspace, creating it with `init` if it is not open yet
    pub fn open_with(
        &self,
        id: WorkspaceId,
        init: impl FnOnce() -> WorkspaceState,
    ) -> Arc<WorkspaceSlot> {
        if let Some(slot) = self.get(&id) {
            return slot;
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id.clone()).or_insert_with(|| {
            debug!(workspace = %id, "opened workspace");
            Arc::new(WorkspaceSlot::new(id, init()))
        }))
    }

    pub fn slot(&self, id: &WorkspaceId) -> Result<Arc<WorkspaceSlot>, CoordinatorError> {
        self.get(id)
            .ok_or_else(|| CoordinatorError::UnknownWorkspace(id.clone()))
    }

    pub fn contains(&self, id: &WorkspaceId) -> bool {
        self.get(id).is_some()
    }

    /// Open workspace ids, sorted
    pub fn ids(&self) -> Vec<WorkspaceId> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<WorkspaceId> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn get(&self, id: &WorkspaceId) -> Option<Arc<WorkspaceSlot>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(id).cloned()
    }
}
