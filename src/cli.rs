use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::application::{Application, InitBuilder};
use crate::library::ExternalLibraryName;
use crate::types::{RunOutcome, SideContentTab, Testcase, TestcaseResult, WorkspaceId};

#[derive(Parser)]
#[command(name = "evalpad")]
#[command(about = "evalpad - run programs and testcases against the reference engine", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a program in the playground and print its output log
    Run {
        /// Program file
        file: PathBuf,

        /// File whose contents run before the program
        #[arg(long)]
        prepend: Option<PathBuf>,

        /// File whose contents run after the program
        #[arg(long)]
        postpend: Option<PathBuf>,

        /// Language chapter
        #[arg(long)]
        chapter: Option<u8>,

        /// External library to load
        #[arg(long, value_enum)]
        library: Option<ExternalLibraryName>,

        /// Execution-time budget in milliseconds
        #[arg(long = "exec-time")]
        exec_time: Option<u64>,

        /// Breakpoint line in the program (repeatable)
        #[arg(long = "breakpoint")]
        breakpoints: Vec<i32>,

        /// Print output entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the program, then grade it against testcases
    Test {
        /// Program file
        file: PathBuf,

        /// Testcase program, optionally followed by =EXPECTED (repeatable)
        #[arg(short = 't', long = "testcase", required = true)]
        testcases: Vec<String>,

        /// Print testcases as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let mut init = InitBuilder::new();
    if let Some(path) = &cli.config {
        init = init.config_path(path.clone());
    }

    match cli.command {
        Commands::Run {
            file,
            prepend,
            postpend,
            chapter,
            library,
            exec_time,
            breakpoints,
            json,
        } => {
            if let Some(ms) = exec_time {
                init = init.exec_time_ms(ms);
            }
            if let Some(chapter) = chapter {
                init = init.chapter(chapter);
            }
            let app = init.init()?;
            let ws = WorkspaceId::Playground;

            if let Some(library) = library {
                app.select_external_library(&ws, library).await?;
            }
            if let Some(path) = &prepend {
                app.update_editor_prepend(&ws, read_source(path)?)?;
            }
            if let Some(path) = &postpend {
                app.update_editor_postpend(&ws, read_source(path)?)?;
            }
            app.update_editor_value(&ws, read_source(&file)?)?;
            app.set_breakpoints(&ws, breakpoints)?;

            let mut outcome = app.evaluate_editor(ws.clone()).await?;
            print_output(&app, &ws, json)?;

            // Stepping through breakpoints: resume until the run settles
            while outcome == RunOutcome::BreakpointHit {
                let line = app
                    .workspace_state(&ws)?
                    .highlighted_lines
                    .map(|range| range.start);
                if let Some(line) = line {
                    eprintln!("-- breakpoint at line {}, resuming", line);
                }
                outcome = app.debug_resume(ws.clone()).await?;
                print_output(&app, &ws, json)?;
            }

            if let RunOutcome::Errored(errors) = outcome {
                anyhow::bail!("program failed with {} error(s)", errors.len());
            }
        }

        Commands::Test {
            file,
            testcases,
            json,
        } => {
            let app = init.init()?;
            let ws = WorkspaceId::Assessment;

            app.update_editor_value(&ws, read_source(&file)?)?;
            app.set_testcases(&ws, testcases.iter().map(|spec| parse_testcase(spec)).collect())?;
            app.update_active_tab(&ws, SideContentTab::Autograder)?;

            let outcome = app.evaluate_editor(ws.clone()).await?;
            if !matches!(outcome, RunOutcome::Finished(_)) {
                print_output(&app, &ws, json)?;
                anyhow::bail!("program did not finish; testcases were not run");
            }

            let state = app.workspace_state(&ws)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state.testcases)?);
            } else {
                for (index, testcase) in state.testcases.iter().enumerate() {
                    println!("  [{}] {} | {}", index, status_label(testcase), testcase.program);
                    if let TestcaseResult::Failure(errors) = &testcase.result {
                        for error in errors {
                            println!("      {}", error);
                        }
                    }
                }
            }

            let failed = state.testcases.iter().filter(|t| !t.passed()).count();
            if failed > 0 {
                anyhow::bail!("{} of {} testcase(s) failed", failed, state.testcases.len());
            }
            println!("✓ All {} testcase(s) passed", state.testcases.len());
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Split `PROGRAM=EXPECTED` on the last `=`
///
/// A trailing `==` comparison in the program is left alone.
pub fn parse_testcase(spec: &str) -> Testcase {
    match spec.rsplit_once('=') {
        Some((program, expected))
            if !program.is_empty() && !program.ends_with('=') && !expected.is_empty() =>
        {
            Testcase::new(program.trim(), Some(expected.trim().to_string()))
        }
        _ => Testcase::new(spec.trim(), None),
    }
}

fn status_label(testcase: &Testcase) -> &'static str {
    match &testcase.result {
        TestcaseResult::Pending => "pending",
        TestcaseResult::Failure(_) => "error",
        TestcaseResult::Success(_) if testcase.passed() => "passed",
        TestcaseResult::Success(_) => "wrong answer",
    }
}

fn print_output(app: &Application, ws: &WorkspaceId, json: bool) -> Result<()> {
    let state = app.workspace_state(ws)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state.output)?);
    } else {
        for entry in &state.output {
            println!("{}", entry);
        }
    }
    Ok(())
}
