//! PEST-based parser for the line-oriented script language
//!
//! Produces one [`Stmt`] per non-empty line, tagged with its 1-based line
//! number in the composed source.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ErrorKind, Location, SourceError};

/* ===================== AST ===================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    Add(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Let { name: String, value: Expr },
    Display(Expr),
    Sleep(u64),
    Spin,
    Error(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub line: i32,
    pub kind: StmtKind,
}

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "engine/script/grammar.pest"]
struct ScriptParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("{message}")]
    Syntax { message: String, line: i32 },
    #[error("{message}")]
    Build { message: String, line: i32 },
}

impl ParseError {
    pub fn line(&self) -> i32 {
        match self {
            ParseError::Syntax { line, .. } | ParseError::Build { line, .. } => *line,
        }
    }

    fn build(message: impl Into<String>, pair: &Pair<Rule>) -> Self {
        ParseError::Build {
            message: message.into(),
            line: pair_line(pair),
        }
    }
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let line = match err.line_col {
            pest::error::LineColLocation::Pos((line, _)) => line,
            pest::error::LineColLocation::Span((line, _), _) => line,
        };
        ParseError::Syntax {
            message: format!("Syntax error: {}", err.variant.message()),
            line: line as i32,
        }
    }
}

impl From<ParseError> for SourceError {
    fn from(err: ParseError) -> Self {
        SourceError::new(ErrorKind::Syntax, err.to_string(), Location::line(err.line()))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

fn pair_line(pair: &Pair<Rule>) -> i32 {
    pair.as_span().start_pos().line_col().0 as i32
}

/* ===================== Public API ===================== */

pub fn parse_program(source: &str) -> ParseResult<Vec<Stmt>> {
    let program = ScriptParser::parse(Rule::program, source)?
        .next()
        .ok_or_else(|| ParseError::Syntax {
            message: "Syntax error: empty parse".to_string(),
            line: 1,
        })?;

    let mut statements = Vec::new();
    for line in program.into_inner() {
        if line.as_rule() != Rule::line {
            continue;
        }
        if let Some(statement) = line.into_inner().next() {
            statements.push(build_statement(statement)?);
        }
    }
    Ok(statements)
}

/* ===================== AST Builder ===================== */

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let line = pair_line(&pair);
    let rule = pair.as_rule();
    let outer = pair.clone();
    // Keyword pair comes first for keyword statements
    let mut inner = pair.into_inner().filter(|p| !is_keyword(p.as_rule()));

    let mut next = |what: &str| {
        inner
            .next()
            .ok_or_else(|| ParseError::build(format!("Missing {}", what), &outer))
    };

    let kind = match rule {
        Rule::let_stmt => {
            let name = next("binding name")?.as_str().to_string();
            let value = build_expr(next("initializer")?)?;
            StmtKind::Let { name, value }
        }
        Rule::display_stmt => StmtKind::Display(build_expr(next("expression")?)?),
        Rule::sleep_stmt => {
            let duration = next("duration")?;
            let ms = parse_number(&duration)?;
            if ms < 0.0 {
                return Err(ParseError::build(
                    "sleep duration must not be negative",
                    &duration,
                ));
            }
            StmtKind::Sleep(ms as u64)
        }
        Rule::spin_stmt => StmtKind::Spin,
        Rule::error_stmt => StmtKind::Error(build_string(next("message")?)),
        Rule::expr_stmt => StmtKind::Expr(build_expr(next("expression")?)?),
        other => {
            return Err(ParseError::build(
                format!("Unexpected statement: {:?}", other),
                &outer,
            ))
        }
    };

    Ok(Stmt { line, kind })
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::let_kw | Rule::display_kw | Rule::sleep_kw | Rule::spin_kw | Rule::error_kw
    )
}

fn build_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expr => {
            let outer = pair.clone();
            let mut terms = pair.into_inner();
            let first = terms
                .next()
                .ok_or_else(|| ParseError::build("Empty expression", &outer))?;
            terms.try_fold(build_expr(first)?, |acc, term| {
                Ok(Expr::Add(Box::new(acc), Box::new(build_expr(term)?)))
            })
        }
        Rule::number => Ok(Expr::Number(parse_number(&pair)?)),
        Rule::string => Ok(Expr::Str(build_string(pair))),
        Rule::boolean => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        other => Err(ParseError::build(
            format!("Unexpected expression: {:?}", other),
            &pair,
        )),
    }
}

fn parse_number(pair: &Pair<Rule>) -> ParseResult<f64> {
    pair.as_str()
        .parse::<f64>()
        .map_err(|e| ParseError::build(format!("Invalid number: {}", e), pair))
}

fn build_string(pair: Pair<Rule>) -> String {
    let raw = pair
        .into_inner()
        .next()
        .map(|chars| chars.as_str())
        .unwrap_or_default();
    unescape(raw)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
