//! Shape checks for special forms and formal parameter lists.

use crate::evaluator::{EvalError, EvalResult};
use crate::types::{Node, Sexpr};
use std::collections::HashSet;

/// Checks that `expr` is a proper list whose length is at least `min` and,
/// when given, no more than `max`.
pub fn check_form(expr: &Node, min: usize, max: Option<usize>) -> EvalResult<()> {
    let Some(length) = expr.list_len() else {
        return Err(EvalError::MalformedExpression(expr.kind.clone(), expr.span));
    };
    if length < min {
        Err(EvalError::InvalidSpecialForm(
            format!("too few operands in form (expected at least {min}, got {length})"),
            expr.span,
        ))
    } else if let Some(max) = max.filter(|max| length > *max) {
        Err(EvalError::InvalidSpecialForm(
            format!("too many operands in form (expected at most {max}, got {length})"),
            expr.span,
        ))
    } else {
        Ok(())
    }
}

/// Checks that `formals` is a proper list of distinct symbols. Reports the
/// first offending entry from the left.
pub fn check_formals(formals: &Node) -> EvalResult<()> {
    let mut seen = HashSet::new();
    let mut rest = formals;
    loop {
        match &rest.kind {
            Sexpr::Nil => return Ok(()),
            Sexpr::Pair(first, next) => {
                let Some(name) = first.as_symbol() else {
                    return Err(EvalError::InvalidFormal(first.kind.clone(), first.span));
                };
                if !seen.insert(name) {
                    return Err(EvalError::DuplicateFormal(name.to_string(), first.span));
                }
                rest = next.as_ref();
            }
            // rest parameters, `(a . b)` or a bare symbol, are not supported
            _ => return Err(EvalError::InvalidFormal(rest.kind.clone(), rest.span)),
        }
    }
}
