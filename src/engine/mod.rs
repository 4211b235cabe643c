//! Interpreter engine boundary
//!
//! The coordinator treats source text as opaque and talks to an interpreter
//! only through the [`Engine`] trait. An engine creates contexts for a library
//! configuration, runs composed source in a context, and resumes snapshots it
//! previously handed out as [`RunResult::Suspended`].
//!
//! Cancellation is cooperative: every invocation receives a cancellation token
//! and a pause token in its [`RunOptions`], which the engine checks at its own
//! safe points.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::library::{ExternalLibrary, LibraryConfig};

pub mod script;

pub use script::ScriptEngine;

/// Boxed engine future; borrows the source and context for the run's duration
pub type EngineFuture<'a, S> = Pin<Box<dyn Future<Output = RunResult<S>> + Send + 'a>>;

/* ===================== Engine ===================== */

pub trait Engine: Send + Sync + 'static {
    /// Opaque paused-computation state
    type Snapshot: Send + 'static;

    /// Build a fresh evaluation context for a library configuration
    fn create_context(&self, library: &LibraryConfig) -> Context;

    /// Run composed source text in a context
    fn run<'a>(
        &'a self,
        source: &'a str,
        context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, Self::Snapshot>;

    /// Continue a previously suspended computation
    fn resume<'a>(
        &'a self,
        snapshot: Self::Snapshot,
        context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, Self::Snapshot>;

    /// Called after the run's cancellation token fired, before its future is dropped
    fn interrupt(&self, _context: &Context) {}
}

/// Outcome reported by an engine invocation
#[derive(Debug)]
pub enum RunResult<S> {
    Finished(JsonValue),
    Suspended {
        snapshot: S,
        location: Option<Location>,
    },
    Error(Vec<SourceError>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingMode {
    /// Yield to the runtime between steps
    #[default]
    Preemptive,
    /// Run steps back to back until a result, sleep or safe point
    Sync,
}

/// Per-invocation options handed to the engine
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scheduling: SchedulingMode,
    pub time_budget: Duration,
    /// Whether breakpoints are honoured
    pub debugger_on: bool,
    /// Breakpoint lines in composed-source coordinates
    pub breakpoints: BTreeSet<i32>,
    /// Fired on interrupt; the engine should stop at its next safe point
    pub cancel: CancellationToken,
    /// Fired on pause; the engine should return `Suspended` at its next safe point
    pub pause: CancellationToken,
    pub console: Console,
}

impl RunOptions {
    pub fn new(time_budget: Duration) -> Self {
        Self {
            scheduling: SchedulingMode::Preemptive,
            time_budget,
            debugger_on: false,
            breakpoints: BTreeSet::new(),
            cancel: CancellationToken::new(),
            pause: CancellationToken::new(),
            console: Console::discard(),
        }
    }
}

/// Sink for lines the program writes while it runs
#[derive(Clone)]
pub struct Console {
    sink: Arc<dyn Fn(String) + Send + Sync>,
}

impl Console {
    pub fn new(sink: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn log(&self, line: impl Into<String>) {
        (self.sink)(line.into())
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Console")
    }
}

/* ===================== Context ===================== */

/// Engine-side evaluation environment.
///
/// Chapter, external symbols and globals are fixed at creation; the error
/// list accumulates every error reported in this context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub chapter: u8,
    pub external: ExternalLibrary,
    pub globals: Vec<(String, JsonValue)>,
    pub builtins: Vec<String>,
    #[serde(default)]
    pub errors: Vec<SourceError>,
}

impl Context {
    pub fn new(library: &LibraryConfig, builtins: Vec<String>) -> Self {
        Self {
            chapter: library.chapter,
            external: library.external.clone(),
            globals: library.globals.clone(),
            builtins,
            errors: Vec::new(),
        }
    }

    /// Look up a host global by name
    pub fn global(&self, name: &str) -> Option<&JsonValue> {
        self.globals
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.external.symbols.iter().any(|symbol| symbol == name)
            || self.builtins.iter().any(|builtin| builtin == name)
    }
}

/* ===================== Errors ===================== */

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// 1-based; may be zero or negative after remapping past the prepend
    pub line: i32,
    pub column: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

impl Location {
    /// Location covering a whole line
    pub fn line(line: i32) -> Self {
        Self {
            start: Position { line, column: 0 },
            end: Position { line, column: 0 },
        }
    }

    /// Move both ends up by `lines`
    pub fn shifted_up(&self, lines: i32) -> Self {
        let mut shifted = *self;
        shifted.start.line -= lines;
        shifted.end.line -= lines;
        shifted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Syntax,
    Runtime,
    Timeout,
    /// Synthetic error recorded when a run is aborted
    Interrupted,
}

/// Error reported against a location in the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Location,
}

impl SourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, location: Location) -> Self {
        Self {
            kind,
            message: message.into(),
            location,
        }
    }

    pub fn interrupted(location: Location) -> Self {
        Self::new(ErrorKind::Interrupted, "Execution aborted by user.", location)
    }

    /// Copy of this error with line numbers moved up by `prepend_lines`
    pub fn remapped(&self, prepend_lines: i32) -> Self {
        Self {
            location: self.location.shifted_up(prepend_lines),
            ..self.clone()
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.location.start.line > 0 {
            write!(f, "Line {}: {}", self.location.start.line, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Render a value the way it is shown in the output log
pub fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "undefined".to_string(),
        other => other.to_string(),
    }
}
