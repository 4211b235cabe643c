//! Test helpers: a scriptable engine and recording collaborators
//!
//! `MockEngine` ignores language semantics. Each line of the composed source
//! is a directive:
//!
//! - `log TEXT` writes a console line
//! - `sleep MS` waits without checking the cancellation token
//! - `finish JSON` finishes with a value
//! - `fail LINE MESSAGE` reports a runtime error at a composed-source line
//! - `break LINE` suspends as if a breakpoint was hit
//! - `wait-pause` blocks until paused, then suspends
//! - `hang` never completes and never checks the cancellation token
//!
//! Any other line is ignored. Running off the end finishes with `undefined`.

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::collaborators::{MessageKind, Notifier, Visualizer, VisualizerUnavailable};
use crate::coordinator::{Coordinator, CoordinatorBuilder, WorkspaceEvent};
use crate::engine::{
    Context, Engine, EngineFuture, ErrorKind, Location, RunOptions, RunResult, SourceError,
};
use crate::library::{ExternalLibraryName, LibraryConfig, LibraryLoader};
use crate::types::LineRange;

/* ===================== Mock Engine ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateContext(LibraryConfig),
    Run(String),
    Resume(Vec<String>),
    Interrupt,
}

/// Directives left to execute when a mock run suspended
#[derive(Debug, Clone, PartialEq)]
pub struct MockSnapshot {
    pub remaining: Vec<String>,
}

#[derive(Default)]
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    breakpoints: Mutex<Option<BTreeSet<i32>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Sources of every `run` call, in order
    pub fn runs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Run(source) => Some(source),
                _ => None,
            })
            .collect()
    }

    pub fn context_resets(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, EngineCall::CreateContext(_)))
            .count()
    }

    /// Breakpoints handed to the most recent run or resume
    pub fn last_breakpoints(&self) -> Option<BTreeSet<i32>> {
        self.breakpoints.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn enter(&self, options: &RunOptions) -> InFlight {
        *self.breakpoints.lock().unwrap() = Some(options.breakpoints.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(Arc::clone(&self.in_flight))
    }
}

async fn execute(directives: Vec<String>, options: RunOptions) -> RunResult<MockSnapshot> {
    let mut lines = directives.into_iter();

    while let Some(line) = lines.next() {
        let (command, rest) = line
            .trim()
            .split_once(' ')
            .unwrap_or((line.trim(), ""));

        match command {
            "log" => options.console.log(rest),
            "sleep" => {
                let ms = rest.parse().unwrap();
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "finish" => {
                let value: JsonValue = serde_json::from_str(rest).unwrap();
                return RunResult::Finished(value);
            }
            "fail" => {
                let (line, message) = rest.split_once(' ').unwrap();
                return RunResult::Error(vec![SourceError::new(
                    ErrorKind::Runtime,
                    message,
                    Location::line(line.parse().unwrap()),
                )]);
            }
            "break" => {
                return RunResult::Suspended {
                    location: Some(Location::line(rest.parse().unwrap())),
                    snapshot: MockSnapshot {
                        remaining: lines.collect(),
                    },
                };
            }
            "wait-pause" => {
                options.pause.cancelled().await;
                return RunResult::Suspended {
                    location: None,
                    snapshot: MockSnapshot {
                        remaining: lines.collect(),
                    },
                };
            }
            "hang" => std::future::pending::<()>().await,
            _ => {}
        }
    }

    RunResult::Finished(JsonValue::Null)
}

impl Engine for MockEngine {
    type Snapshot = MockSnapshot;

    fn create_context(&self, library: &LibraryConfig) -> Context {
        self.record(EngineCall::CreateContext(library.clone()));
        Context::new(library, vec!["mock_builtin".to_string()])
    }

    fn run<'a>(
        &'a self,
        source: &'a str,
        _context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, MockSnapshot> {
        self.record(EngineCall::Run(source.to_string()));
        let guard = self.enter(&options);
        let directives = source.lines().map(str::to_string).collect();
        Box::pin(async move {
            let _guard = guard;
            execute(directives, options).await
        })
    }

    fn resume<'a>(
        &'a self,
        snapshot: MockSnapshot,
        _context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, MockSnapshot> {
        self.record(EngineCall::Resume(snapshot.remaining.clone()));
        let guard = self.enter(&options);
        Box::pin(async move {
            let _guard = guard;
            execute(snapshot.remaining, options).await
        })
    }

    fn interrupt(&self, _context: &Context) {
        self.record(EngineCall::Interrupt);
    }
}

/* ===================== Collaborators ===================== */

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, Duration, MessageKind)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, Duration, MessageKind)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .map(|(text, _, _)| text)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_message(&self, text: &str, duration: Duration, kind: MessageKind) {
        self.messages
            .lock()
            .unwrap()
            .push((text.to_string(), duration, kind));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisualCall {
    Highlight(Option<LineRange>),
    UpdateContext(bool),
    DrawEnvironment(Option<Location>),
}

/// Visualizer that records calls and reports the inspector as loaded
#[derive(Default)]
pub struct RecordingVisualizer {
    calls: Mutex<Vec<VisualCall>>,
}

impl RecordingVisualizer {
    pub fn calls(&self) -> Vec<VisualCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Visualizer for RecordingVisualizer {
    fn highlight_lines(&self, range: Option<LineRange>) -> Result<(), VisualizerUnavailable> {
        self.calls.lock().unwrap().push(VisualCall::Highlight(range));
        Ok(())
    }

    fn update_context(&self, context: Option<&Context>) -> Result<(), VisualizerUnavailable> {
        self.calls
            .lock()
            .unwrap()
            .push(VisualCall::UpdateContext(context.is_some()));
        Ok(())
    }

    fn draw_environment(
        &self,
        _context: &Context,
        location: Option<&Location>,
    ) -> Result<(), VisualizerUnavailable> {
        self.calls
            .lock()
            .unwrap()
            .push(VisualCall::DrawEnvironment(location.copied()));
        Err(VisualizerUnavailable::EnvVisualizer)
    }
}

/// Loader whose libraries never finish loading
#[derive(Default)]
pub struct NeverReadyLoader {
    loaded: Mutex<Vec<ExternalLibraryName>>,
}

impl NeverReadyLoader {
    pub fn loaded(&self) -> Vec<ExternalLibraryName> {
        self.loaded.lock().unwrap().clone()
    }
}

impl LibraryLoader for NeverReadyLoader {
    fn is_ready(&self) -> bool {
        false
    }

    fn load(&self, library: ExternalLibraryName) {
        self.loaded.lock().unwrap().push(library);
    }
}

/* ===================== Setup ===================== */

/// Coordinator over a mock engine with recording collaborators
pub struct Harness {
    pub coordinator: Coordinator<MockEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub visualizer: Arc<RecordingVisualizer>,
}

pub fn harness() -> Harness {
    harness_with(CoordinatorBuilder::new(MockEngine::new()))
}

pub fn harness_with(builder: CoordinatorBuilder<MockEngine>) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let visualizer = Arc::new(RecordingVisualizer::default());
    let coordinator = builder
        .notifier(notifier.clone())
        .visualizer(visualizer.clone())
        .build();

    Harness {
        coordinator,
        notifier,
        visualizer,
    }
}

/// Receive events until one matches
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<WorkspaceEvent>,
    matches: impl Fn(&WorkspaceEvent) -> bool,
) -> WorkspaceEvent {
    loop {
        let event = events.recv().await.unwrap();
        if matches(&event) {
            return event;
        }
    }
}

/// Every event already sent, in order
pub fn drain_events(events: &mut broadcast::Receiver<WorkspaceEvent>) -> Vec<WorkspaceEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
