//! Error reports rendered with `ariadne` against the source they came from.

use crate::environment::EnvError;
use crate::evaluator::EvalError;
use crate::parser::ParseError;
use crate::source::Span;
use ariadne::{Color, Label, Report, ReportKind, Source};
use std::io;
use std::ops::Range;

// Errors without a location point at the end of the input.
fn end_of(input: &str) -> Range<usize> {
    input.len()..input.len()
}

fn emit(
    source_id: &str,
    input: &str,
    range: Range<usize>,
    message: String,
    label: String,
) -> io::Result<()> {
    Report::build(ReportKind::Error, (source_id, range.clone()))
        .with_message(message)
        .with_label(
            Label::new((source_id, range))
                .with_message(label)
                .with_color(Color::Red),
        )
        .finish()
        .eprint((source_id, Source::from(input)))
}

fn range_of(span: Option<Span>, input: &str) -> Range<usize> {
    match span {
        // spans from another source (an evaluated datum) may not fit this input
        Some(span) if span.end <= input.len() => span.to_range(),
        _ => end_of(input),
    }
}

impl EvalError {
    /// Writes a report for this error to stderr.
    pub fn report(&self, source_id: &str, input: &str) -> io::Result<()> {
        let label = match self {
            EvalError::EnvError(EnvError::UnboundIdentifier(..)) => {
                "not defined in this scope".to_string()
            }
            EvalError::EnvError(EnvError::InvalidBindingTarget(target, _)) => {
                format!("only symbols can be bound, found a {}", target.type_name())
            }
            EvalError::EnvError(EnvError::ArityMismatch { expected, found, .. }) => {
                format!("takes {} arguments, given {}", expected, found)
            }
            EvalError::MalformedExpression(..) => "expected a proper list".to_string(),
            EvalError::InvalidSpecialForm(..) => "in this form".to_string(),
            EvalError::InvalidDefineTarget(target, _) => {
                format!("expected a symbol or (name formals...), found a {}", target.type_name())
            }
            EvalError::MalformedElseClause(..) => "this clause".to_string(),
            EvalError::DuplicateFormal(..) => "already a parameter".to_string(),
            EvalError::InvalidFormal(..) => "parameters must be symbols".to_string(),
            EvalError::NotCallable(value, _) => {
                format!("this evaluates to a {}", value.type_name())
            }
            EvalError::CallError { source, .. } => source.to_string(),
            EvalError::UndefinedExpression | EvalError::RecursionDepthExceeded(_) => {
                "while evaluating this input".to_string()
            }
        };
        let message = match self {
            EvalError::CallError { name, .. } => format!("error in primitive '{}'", name),
            other => other.to_string(),
        };
        emit(source_id, input, range_of(self.span(), input), message, label)
    }
}

impl ParseError {
    /// Writes a report for this error to stderr.
    pub fn report(&self, source_id: &str, input: &str) -> io::Result<()> {
        let (range, label) = match self {
            ParseError::UnexpectedToken { found, expected } => {
                (found.span.to_range(), format!("expected {}", expected))
            }
            ParseError::UnexpectedEof(expected) => (end_of(input), format!("expected {}", expected)),
            ParseError::LexerError(lex_err) => (lex_err.span.to_range(), lex_err.error.to_string()),
            ParseError::InvalidDotSyntax(span) => {
                (span.to_range(), "a dot must sit between the last two elements".to_string())
            }
        };
        let message = match self {
            ParseError::LexerError(_) => "could not read input".to_string(),
            other => other.to_string(),
        };
        emit(source_id, input, range, message, label)
    }
}
