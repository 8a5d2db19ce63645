use crate::environment::{Env, create_global_frame};
use crate::evaluator::{EvalError, EvalResult, Evaluator};
use crate::lexer::tokenize;
use crate::parser::{ParseError, Parser, parse_program};
use crate::types::Node;
use std::io::{self, Write};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl SessionError {
    pub fn report(&self, source_id: &str, input: &str) -> io::Result<()> {
        match self {
            SessionError::Parse(err) => err.report(source_id, input),
            SessionError::Eval(err) => err.report(source_id, input),
        }
    }
}

/// One interpreter session: a global frame and the evaluator that runs
/// everything typed or loaded into it.
pub struct Session {
    env: Env,
    evaluator: Evaluator,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(Evaluator::default())
    }
}

impl Session {
    pub fn new(evaluator: Evaluator) -> Self {
        Session {
            env: create_global_frame(),
            evaluator,
        }
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    pub fn evaluator(&self) -> Evaluator {
        self.evaluator
    }

    pub fn eval_node(&self, node: &Node) -> EvalResult {
        self.evaluator.eval(node, &self.env)
    }

    /// Evaluates every expression in `input`, returning the last value
    /// (`okay` when there is none). Stops at the first error.
    pub fn eval_str(&self, input: &str) -> Result<Node, SessionError> {
        let mut last = Node::okay();
        for node in parse_program(input)? {
            last = self.eval_node(&node)?;
        }
        Ok(last)
    }

    /// Runs `text` expression by expression, writing each value other than
    /// `okay` to stdout when `echo` is set. Errors are reported and the run
    /// carries on with the next expression; a parse error ends it. Returns
    /// the number of errors.
    pub fn run_source(&self, source_id: &str, text: &str, echo: bool) -> usize {
        self.run_source_to(&mut io::stdout(), source_id, text, echo)
    }

    pub fn run_source_to<W: Write>(
        &self,
        out: &mut W,
        source_id: &str,
        text: &str,
        echo: bool,
    ) -> usize {
        run_source_in(&self.evaluator, &self.env, out, source_id, text, echo)
    }
}

/// Runs `text` in `env` the way `Session::run_source` does: values other
/// than `okay` go to `out` when `echo` is set, evaluation errors are
/// reported and skipped, and a read error ends the run. Returns the number of
/// errors.
pub fn run_source_in<W: Write>(
    evaluator: &Evaluator,
    env: &Env,
    out: &mut W,
    source_id: &str,
    text: &str,
    echo: bool,
) -> usize {
    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(err) => {
            report(&SessionError::Parse(err.into()), source_id, text);
            return 1;
        }
    };
    debug!(source = source_id, "run");

    let mut parser = Parser::new(tokens);
    let mut errors = 0;
    while !parser.is_at_end() {
        let node = match parser.parse_expr() {
            Ok(node) => node,
            Err(err) => {
                report(&err.into(), source_id, text);
                return errors + 1;
            }
        };
        match evaluator.eval(&node, env) {
            Ok(value) if echo && !value.is_okay() => {
                if let Err(err) = writeln!(out, "{}", value) {
                    warn!(error = %err, "could not write result");
                }
            }
            Ok(_) => {}
            Err(err) => {
                errors += 1;
                report(&err.into(), source_id, text);
            }
        }
    }
    errors
}

fn report(err: &SessionError, source_id: &str, text: &str) {
    if let Err(io_err) = err.report(source_id, text) {
        warn!(error = %io_err, "could not write report");
    }
}
