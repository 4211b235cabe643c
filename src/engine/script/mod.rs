//! Reference line-oriented script engine
//!
//! A deliberately small language used by the CLI and by end-to-end tests:
//!
//! ```text
//! let x = 3
//! display "x is " + x
//! sleep 200
//! x + 1
//! ```
//!
//! Statements: `let`, `display`, `sleep MS`, `spin` (runs until stopped),
//! `error "message"` and bare expressions. The value of the last expression
//! is the program value.

use tracing::debug;

use super::{Context, Engine, EngineFuture, RunOptions, RunResult};
use crate::library::LibraryConfig;

pub mod parser;
mod vm;

pub use parser::{parse_program, ParseError};
pub use vm::{Vm, BUILTINS};


#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptEngine;

impl ScriptEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for ScriptEngine {
    type Snapshot = Vm;

    fn create_context(&self, library: &LibraryConfig) -> Context {
        Context::new(library, BUILTINS.iter().map(|name| name.to_string()).collect())
    }

    fn run<'a>(
        &'a self,
        source: &'a str,
        context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, Vm> {
        Box::pin(async move {
            let program = match parse_program(source) {
                Ok(program) => program,
                Err(err) => return RunResult::Error(vec![err.into()]),
            };
            debug!(statements = program.len(), "running script");
            Vm::new(program).run(context, &options).await
        })
    }

    fn resume<'a>(
        &'a self,
        snapshot: Vm,
        context: &'a Context,
        options: RunOptions,
    ) -> EngineFuture<'a, Vm> {
        Box::pin(async move { snapshot.run(context, &options).await })
    }

    fn interrupt(&self, _context: &Context) {
        debug!("script interrupted; stops at the next statement boundary");
    }
}
