//! Resumable statement VM
//!
//! Executes one statement per step. Between steps it checks, in order, the
//! cancellation token, the pause token, program end, the time budget and
//! breakpoints. The whole VM is serializable and doubles as the engine's
//! suspended-execution snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::parser::{Expr, Stmt, StmtKind};
use crate::engine::{
    stringify, Context, ErrorKind, Location, RunOptions, RunResult, SchedulingMode, SourceError,
};

/// Longest uninterrupted sleep slice; bounds signal latency during `sleep`
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Time one `spin` iteration takes
const SPIN_TICK: Duration = Duration::from_millis(1);

/// Built-in constants available in every context
pub const BUILTINS: &[&str] = &["undefined", "math_PI", "math_E"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vm {
    program: Vec<Stmt>,
    pc: usize,
    bindings: BTreeMap<String, JsonValue>,
    last_value: JsonValue,
    /// Milliseconds left of the sleep at `pc`, once started
    sleep_left_ms: Option<u64>,
    /// Statement index the VM last suspended at; its breakpoint is not re-hit
    suspended_at: Option<usize>,
}

impl Vm {
    pub fn new(program: Vec<Stmt>) -> Self {
        Self {
            program,
            pc: 0,
            bindings: BTreeMap::new(),
            last_value: JsonValue::Null,
            sleep_left_ms: None,
            suspended_at: None,
        }
    }

    /// Line of the next statement to execute
    pub fn current_line(&self) -> Option<i32> {
        self.program
            .get(self.pc)
            .or_else(|| self.program.last())
            .map(|stmt| stmt.line)
    }

    pub fn binding(&self, name: &str) -> Option<&JsonValue> {
        self.bindings.get(name)
    }

    /// Run until the program finishes, fails or suspends
    pub async fn run(mut self, context: &Context, options: &RunOptions) -> RunResult<Vm> {
        let started = Instant::now();
        let mut slept = Duration::ZERO;

        loop {
            if options.cancel.is_cancelled() {
                return RunResult::Error(Vec::new());
            }
            if options.pause.is_cancelled() {
                return self.suspend();
            }

            let Some(stmt) = self.program.get(self.pc).cloned() else {
                return RunResult::Finished(self.last_value);
            };

            if started.elapsed().saturating_sub(slept) > options.time_budget {
                return RunResult::Error(vec![SourceError::new(
                    ErrorKind::Timeout,
                    format!(
                        "Potential infinite loop detected. Execution exceeded the time limit of {}ms.",
                        options.time_budget.as_millis()
                    ),
                    Location::line(stmt.line),
                )]);
            }

            if options.debugger_on
                && options.breakpoints.contains(&stmt.line)
                && self.suspended_at != Some(self.pc)
            {
                return self.suspend();
            }

            match stmt.kind {
                StmtKind::Let { name, value } => {
                    let value = match self.eval(&value, context) {
                        Ok(value) => value,
                        Err(message) => return runtime_error(message, stmt.line),
                    };
                    self.bindings.insert(name, value);
                    self.last_value = JsonValue::Null;
                    self.advance();
                }
                StmtKind::Display(expr) => {
                    let value = match self.eval(&expr, context) {
                        Ok(value) => value,
                        Err(message) => return runtime_error(message, stmt.line),
                    };
                    options.console.log(display_text(&value));
                    self.last_value = value;
                    self.advance();
                }
                StmtKind::Expr(expr) => {
                    self.last_value = match self.eval(&expr, context) {
                        Ok(value) => value,
                        Err(message) => return runtime_error(message, stmt.line),
                    };
                    self.advance();
                }
                StmtKind::Error(message) => return runtime_error(message, stmt.line),
                StmtKind::Sleep(ms) => {
                    let left = Duration::from_millis(*self.sleep_left_ms.get_or_insert(ms));
                    let slice = left.min(SLEEP_SLICE);
                    let before = Instant::now();

                    tokio::select! {
                        _ = tokio::time::sleep(slice) => {}
                        _ = options.cancel.cancelled() => {}
                        _ = options.pause.cancelled() => {}
                    }

                    let elapsed = before.elapsed().min(left);
                    slept += elapsed;
                    let left = left.saturating_sub(elapsed);
                    if left.is_zero() {
                        self.advance();
                    } else {
                        self.sleep_left_ms = Some(left.as_millis() as u64);
                    }
                    continue;
                }
                StmtKind::Spin => {
                    // Never advances; only the budget or a signal stops it
                    tokio::time::sleep(SPIN_TICK).await;
                    continue;
                }
            }

            if options.scheduling == SchedulingMode::Preemptive {
                tokio::task::yield_now().await;
            }
        }
    }

    fn advance(&mut self) {
        self.pc += 1;
        self.sleep_left_ms = None;
        self.suspended_at = None;
    }

    fn suspend(mut self) -> RunResult<Vm> {
        self.suspended_at = Some(self.pc);
        let location = self.current_line().map(Location::line);
        RunResult::Suspended {
            snapshot: self,
            location,
        }
    }

    /* ===================== Expressions ===================== */

    fn eval(&self, expr: &Expr, context: &Context) -> Result<JsonValue, String> {
        match expr {
            Expr::Number(n) => Ok(number_value(*n)),
            Expr::Str(s) => Ok(JsonValue::String(s.clone())),
            Expr::Bool(b) => Ok(JsonValue::Bool(*b)),
            Expr::Ident(name) => self.lookup(name, context),
            Expr::Add(left, right) => {
                let left = self.eval(left, context)?;
                let right = self.eval(right, context)?;
                add(&left, &right)
            }
        }
    }

    fn lookup(&self, name: &str, context: &Context) -> Result<JsonValue, String> {
        if let Some(value) = self.bindings.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = context.global(name) {
            return Ok(value.clone());
        }
        if let Some(value) = builtin_value(name) {
            return Ok(value);
        }
        if context.has_symbol(name) {
            return Ok(JsonValue::String(format!("<function {}>", name)));
        }
        Err(format!("Name {} not declared.", name))
    }
}

fn runtime_error(message: String, line: i32) -> RunResult<Vm> {
    RunResult::Error(vec![SourceError::new(
        ErrorKind::Runtime,
        message,
        Location::line(line),
    )])
}

fn builtin_value(name: &str) -> Option<JsonValue> {
    match name {
        "undefined" => Some(JsonValue::Null),
        "math_PI" => Some(number_value(std::f64::consts::PI)),
        "math_E" => Some(number_value(std::f64::consts::E)),
        _ => None,
    }
}

/// Integral values become JSON integers so they render without a fraction
fn number_value(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        JsonValue::from(n as i64)
    } else {
        Number::from_f64(n).map_or(JsonValue::Null, JsonValue::Number)
    }
}

fn display_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => stringify(other),
    }
}

fn add(left: &JsonValue, right: &JsonValue) -> Result<JsonValue, String> {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            Ok(number_value(a + b))
        }
        (JsonValue::String(_), _) | (_, JsonValue::String(_)) => Ok(JsonValue::String(format!(
            "{}{}",
            display_text(left),
            display_text(right)
        ))),
        _ => Err(format!(
            "Expected number or string on left hand side of operation, got {}.",
            type_name(left)
        )),
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "undefined",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
