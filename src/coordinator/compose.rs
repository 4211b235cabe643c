//! Source composition and line remapping

use std::collections::BTreeSet;

use crate::engine::Location;
use crate::types::LineRange;
use crate::workspace::WorkspaceState;

/// Composed program text plus the offset between user and engine lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedSource {
    pub text: String,
    pub prepend_lines: i32,
}

/// Number of lines a fragment occupies; empty fragments occupy none
pub fn line_count(fragment: &str) -> i32 {
    if fragment.is_empty() {
        0
    } else {
        fragment.split('\n').count() as i32
    }
}

/// `prepend`, editor value and `postpend`, each non-empty fragment on its own
/// lines, followed by an optional testcase program
pub fn compose(state: &WorkspaceState, testcase: Option<&str>) -> ComposedSource {
    let prepend = &state.editor_prepend;
    let postpend = &state.editor_postpend;

    let mut text = String::with_capacity(
        prepend.len() + state.editor_value.len() + postpend.len() + 3,
    );
    text.push_str(prepend);
    if !prepend.is_empty() {
        text.push('\n');
    }
    text.push_str(&state.editor_value);
    text.push('\n');
    text.push_str(postpend);
    if let Some(program) = testcase {
        if !postpend.is_empty() {
            text.push('\n');
        }
        text.push_str(program);
    }

    ComposedSource {
        text,
        prepend_lines: line_count(prepend),
    }
}

/// REPL input runs as-is in the existing context
pub fn compose_repl(input: &str) -> ComposedSource {
    ComposedSource {
        text: input.to_string(),
        prepend_lines: 0,
    }
}

/// User breakpoint lines in composed-source coordinates
pub fn shift_breakpoints(breakpoints: &BTreeSet<i32>, prepend_lines: i32) -> BTreeSet<i32> {
    breakpoints
        .iter()
        .map(|line| line + prepend_lines)
        .collect()
}

/// Composed-source location back to a user-visible highlight range
pub fn highlight_for(location: &Location, prepend_lines: i32) -> LineRange {
    let user = location.shifted_up(prepend_lines);
    LineRange {
        start: user.start.line,
        end: user.end.line,
    }
}
