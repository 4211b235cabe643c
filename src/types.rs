use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::engine::{stringify, SourceError};

/* ===================== Workspaces ===================== */

/// Identity of an independent workspace. No state is shared across ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "submission", rename_all = "lowercase")]
pub enum WorkspaceId {
    Playground,
    Assessment,
    /// Opened on demand for one grading submission
    Grading(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceKind {
    Playground,
    Assessment,
    Grading,
}

impl WorkspaceId {
    pub fn kind(&self) -> WorkspaceKind {
        match self {
            WorkspaceId::Playground => WorkspaceKind::Playground,
            WorkspaceId::Assessment => WorkspaceKind::Assessment,
            WorkspaceId::Grading(_) => WorkspaceKind::Grading,
        }
    }

    /// Whether a successful editor run may trigger the autograder
    pub fn is_graded(&self) -> bool {
        matches!(
            self.kind(),
            WorkspaceKind::Assessment | WorkspaceKind::Grading
        )
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkspaceId::Playground => write!(f, "playground"),
            WorkspaceId::Assessment => write!(f, "assessment"),
            WorkspaceId::Grading(submission) => write!(f, "grading/{}", submission),
        }
    }
}

/// Side panel currently shown next to the editor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideContentTab {
    #[default]
    Introduction,
    Autograder,
    Inspector,
    EnvVisualizer,
}

/// Inclusive range of editor lines, in user-visible coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: i32,
    pub end: i32,
}

/* ===================== Requests ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "index", rename_all = "snake_case")]
pub enum EvaluationMode {
    EditorRun,
    ReplRun,
    DebugResume,
    TestcaseRun(usize),
}

impl EvaluationMode {
    /// Top-level runs are mutually exclusive per workspace and interrupt
    /// whatever is already running there
    pub fn is_top_level(&self) -> bool {
        !matches!(self, EvaluationMode::TestcaseRun(_))
    }

    /// Only editor runs and resumed runs race against a pause signal
    pub fn accepts_pause(&self) -> bool {
        matches!(self, EvaluationMode::EditorRun | EvaluationMode::DebugResume)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub workspace: WorkspaceId,
    pub mode: EvaluationMode,
}

impl EvaluationRequest {
    pub fn editor(workspace: WorkspaceId) -> Self {
        Self {
            workspace,
            mode: EvaluationMode::EditorRun,
        }
    }

    pub fn repl(workspace: WorkspaceId) -> Self {
        Self {
            workspace,
            mode: EvaluationMode::ReplRun,
        }
    }

    pub fn resume(workspace: WorkspaceId) -> Self {
        Self {
            workspace,
            mode: EvaluationMode::DebugResume,
        }
    }

    pub fn testcase(workspace: WorkspaceId, index: usize) -> Self {
        Self {
            workspace,
            mode: EvaluationMode::TestcaseRun(index),
        }
    }
}

/* ===================== Output ===================== */

/// One entry of a workspace's output log.
///
/// Entries are only ever appended. Console lines produced while a run is in
/// flight collect in a trailing `Log`, which the run's terminal `Result` or
/// `Errors` entry takes over in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutputEntry {
    Code {
        text: String,
    },
    Log {
        lines: Vec<String>,
    },
    Result {
        value: JsonValue,
        lines: Vec<String>,
    },
    Errors {
        errors: Vec<SourceError>,
        lines: Vec<String>,
    },
}

impl fmt::Display for OutputEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputEntry::Code { text } => write!(f, "> {}", text),
            OutputEntry::Log { lines } => write!(f, "{}", lines.join("\n")),
            OutputEntry::Result { value, lines } => {
                for line in lines {
                    writeln!(f, "{}", line)?;
                }
                write!(f, "{}", stringify(value))
            }
            OutputEntry::Errors { errors, lines } => {
                for line in lines {
                    writeln!(f, "{}", line)?;
                }
                let rendered: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(f, "{}", rendered.join("\n"))
            }
        }
    }
}

/* ===================== Testcases ===================== */

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum TestcaseResult {
    #[default]
    Pending,
    Success(JsonValue),
    Failure(Vec<SourceError>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Testcase {
    pub program: String,
    pub expected: Option<String>,
    #[serde(default)]
    pub result: TestcaseResult,
}

impl Testcase {
    pub fn new(program: impl Into<String>, expected: Option<String>) -> Self {
        Self {
            program: program.into(),
            expected,
            result: TestcaseResult::Pending,
        }
    }

    /// A testcase passes when it succeeded and, if an expected output is
    /// given, the stringified value matches it
    pub fn passed(&self) -> bool {
        match &self.result {
            TestcaseResult::Success(value) => self
                .expected
                .as_deref()
                .map_or(true, |expected| stringify(value) == expected.trim()),
            _ => false,
        }
    }
}

/* ===================== Outcomes ===================== */

/// Terminal state of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum RunOutcome {
    Finished(JsonValue),
    BreakpointHit,
    Paused,
    Errored(Vec<SourceError>),
    Interrupted,
}

impl RunOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            RunOutcome::Finished(_) => OutcomeKind::Finished,
            RunOutcome::BreakpointHit => OutcomeKind::BreakpointHit,
            RunOutcome::Paused => OutcomeKind::Paused,
            RunOutcome::Errored(_) => OutcomeKind::Errored,
            RunOutcome::Interrupted => OutcomeKind::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Finished,
    BreakpointHit,
    Paused,
    Errored,
    Interrupted,
}

/// Aggregate status of a testcase batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pending: usize,
    pub aborted: bool,
}

impl BatchSummary {
    pub fn from_testcases(testcases: &[Testcase], aborted: bool) -> Self {
        let mut summary = BatchSummary {
            total: testcases.len(),
            aborted,
            ..Default::default()
        };
        for testcase in testcases {
            if testcase.passed() {
                summary.passed += 1;
            } else if testcase.result == TestcaseResult::Pending {
                summary.pending += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} passed", self.passed)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.pending > 0 {
            write!(f, ", {} not run", self.pending)?;
        }
        Ok(())
    }
}
