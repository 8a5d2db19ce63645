//! Handlers for the forms recognised before generic application.
//!
//! The control forms (`and`, `or`, `if`, `cond`, `begin`) hand back a
//! [`Trampoline`]: either a value that is already final, or the expression in
//! tail position for the evaluator to continue with. `lambda`, `mu`, `define`
//! and `quote` produce their value directly, and `let` returns its body
//! together with the new frame.

use crate::environment::{Env, Environment};
use crate::evaluator::{EvalError, EvalResult, Evaluator, Trampoline};
use crate::source::Span;
use crate::types::{Lambda, Mu, Node, Procedure, Sexpr};
use crate::validate::{check_form, check_formals};
use std::collections::HashSet;
use std::rc::Rc;
use tracing::debug;

/// Every name the evaluator treats as syntax.
pub const SPECIAL_FORMS: &[&str] = &[
    "and", "begin", "cond", "define", "if", "lambda", "let", "mu", "or", "quote",
];

pub fn special_form_identifiers() -> HashSet<String> {
    SPECIAL_FORMS.iter().map(|name| name.to_string()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlForm {
    And,
    Or,
    If,
    Cond,
    Begin,
}

impl ControlForm {
    pub fn from_name(name: &str) -> Option<ControlForm> {
        match name {
            "and" => Some(ControlForm::And),
            "or" => Some(ControlForm::Or),
            "if" => Some(ControlForm::If),
            "cond" => Some(ControlForm::Cond),
            "begin" => Some(ControlForm::Begin),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlForm::And => "and",
            ControlForm::Or => "or",
            ControlForm::If => "if",
            ControlForm::Cond => "cond",
            ControlForm::Begin => "begin",
        }
    }

    /// Runs the form on its (unevaluated) `operands`.
    pub fn evaluate(
        self,
        evaluator: &Evaluator,
        operands: &Node,
        env: &Env,
    ) -> EvalResult<Trampoline> {
        match self {
            ControlForm::And => do_and_form(evaluator, operands, env),
            ControlForm::Or => do_or_form(evaluator, operands, env),
            ControlForm::If => do_if_form(evaluator, operands, env),
            ControlForm::Cond => do_cond_form(evaluator, operands, env),
            ControlForm::Begin => do_begin_form(evaluator, operands, env),
        }
    }
}

fn first_and_rest(operands: &Node) -> EvalResult<(&Node, &Node)> {
    operands
        .as_pair()
        .ok_or_else(|| EvalError::MalformedExpression(operands.kind.clone(), operands.span))
}

fn begin_form(body: &Node) -> Node {
    Node::new_pair(Node::new_symbol("begin", body.span), body.clone(), body.span)
}

/// A single body expression as is, several wrapped in `begin`.
fn body_expression(body: &Node) -> Node {
    match body.as_pair() {
        Some((only, rest)) if rest.is_nil() => only.clone(),
        _ => begin_form(body),
    }
}

fn procedure_parts(operands: &Node) -> EvalResult<(Node, Node)> {
    check_form(operands, 2, None)?;
    let (formals, body) = first_and_rest(operands)?;
    check_formals(formals)?;
    Ok((formals.clone(), body_expression(body)))
}

pub fn do_quote_form(operands: &Node) -> EvalResult {
    check_form(operands, 1, Some(1))?;
    let (quoted, _) = first_and_rest(operands)?;
    Ok(quoted.clone())
}

pub fn do_lambda_form(operands: &Node, env: &Env, span: Span) -> EvalResult {
    let (formals, body) = procedure_parts(operands)?;
    let lambda = Lambda {
        formals,
        body,
        env: env.clone(),
    };
    Ok(Node::new_procedure(Procedure::Lambda(Rc::new(lambda)), span))
}

pub fn do_mu_form(operands: &Node, span: Span) -> EvalResult {
    let (formals, body) = procedure_parts(operands)?;
    Ok(Node::new_procedure(
        Procedure::Mu(Rc::new(Mu { formals, body })),
        span,
    ))
}

/// `(define name expr)` or `(define (name . formals) body...)`. Binds in
/// `env` itself and returns the name.
pub fn do_define_form(
    evaluator: &Evaluator,
    operands: &Node,
    env: &Env,
    span: Span,
) -> EvalResult {
    check_form(operands, 2, None)?;
    let (target, rest) = first_and_rest(operands)?;
    match &target.kind {
        Sexpr::Symbol(name) => {
            check_form(operands, 2, Some(2))?;
            let value = evaluator.eval_opt(rest.car(), env)?;
            debug!(name = %name, value = %value, "define");
            env.borrow_mut().define(target, value)?;
            Ok(target.clone())
        }
        Sexpr::Pair(name, formals) => {
            let lambda_operands = Node::new_pair(formals.clone(), rest.clone(), target.span);
            let procedure = do_lambda_form(&lambda_operands, env, span)?;
            debug!(name = %name, "define procedure");
            env.borrow_mut().define(name, procedure)?;
            Ok(name.as_ref().clone())
        }
        other => Err(EvalError::InvalidDefineTarget(other.clone(), target.span)),
    }
}

/// Evaluates the bindings of a `let` in `env`, binds them all in a new frame,
/// runs every body expression but the last there, and returns the last one
/// with the frame.
pub fn do_let_form(
    evaluator: &Evaluator,
    operands: &Node,
    env: &Env,
) -> EvalResult<(Node, Env)> {
    check_form(operands, 2, None)?;
    let (bindings, body) = first_and_rest(operands)?;
    if !bindings.is_proper_list() {
        return Err(EvalError::InvalidSpecialForm(
            format!("bad bindings list in let form: {}", bindings),
            bindings.span,
        ));
    }

    let frame = Environment::new_enclosed(env.clone());
    for binding in bindings.iter() {
        check_form(binding, 1, Some(2))?;
        let (name, value_expr) = first_and_rest(binding)?;
        let value = evaluator.eval_opt(value_expr.car(), env)?;
        frame.borrow_mut().define(name, value)?;
    }

    let mut exprs = body.iter().peekable();
    while let Some(expr) = exprs.next() {
        if exprs.peek().is_none() {
            return Ok((expr.clone(), frame));
        }
        evaluator.eval(expr, &frame)?;
    }
    Err(EvalError::InvalidSpecialForm(
        "let form has no body".to_string(),
        operands.span,
    ))
}

fn do_and_form(evaluator: &Evaluator, operands: &Node, env: &Env) -> EvalResult<Trampoline> {
    let mut last = Node::new_bool(true, operands.span);
    for operand in operands.iter() {
        last = evaluator.eval(operand, env)?;
        if !last.is_truthy() {
            break;
        }
    }
    Ok(Trampoline::Value(last))
}

fn do_or_form(evaluator: &Evaluator, operands: &Node, env: &Env) -> EvalResult<Trampoline> {
    let items: Vec<&Node> = operands.iter().collect();
    let Some((last, init)) = items.split_last() else {
        return Ok(Trampoline::Value(Node::new_bool(false, operands.span)));
    };
    for operand in init {
        let value = evaluator.eval(operand, env)?;
        if value.is_truthy() {
            return Ok(Trampoline::Value(value));
        }
    }
    Ok(Trampoline::Eval((*last).clone(), env.clone()))
}

fn do_if_form(evaluator: &Evaluator, operands: &Node, env: &Env) -> EvalResult<Trampoline> {
    check_form(operands, 2, Some(3))?;
    let test = evaluator.eval_opt(operands.car(), env)?;
    let branch = if test.is_truthy() {
        operands.nth(1)
    } else {
        operands.nth(2)
    };
    Ok(match branch {
        Some(expr) => Trampoline::Eval(expr.clone(), env.clone()),
        None => Trampoline::Value(Node::okay()),
    })
}

fn do_cond_form(evaluator: &Evaluator, operands: &Node, env: &Env) -> EvalResult<Trampoline> {
    let mut clauses = operands.iter().peekable();
    while let Some(clause) = clauses.next() {
        check_form(clause, 1, None)?;
        let (test_expr, body) = first_and_rest(clause)?;
        let test = if test_expr.is_symbol("else") {
            if clauses.peek().is_some() {
                return Err(EvalError::MalformedElseClause(
                    "else must be the last clause".to_string(),
                    clause.span,
                ));
            }
            if body.is_nil() {
                return Err(EvalError::MalformedElseClause(
                    "else clause needs at least one expression".to_string(),
                    clause.span,
                ));
            }
            Node::new_bool(true, test_expr.span)
        } else {
            evaluator.eval(test_expr, env)?
        };

        if test.is_truthy() {
            return Ok(if body.is_nil() {
                Trampoline::Value(test)
            } else {
                Trampoline::Eval(body_expression(body), env.clone())
            });
        }
    }
    Ok(Trampoline::Value(Node::okay()))
}

fn do_begin_form(evaluator: &Evaluator, operands: &Node, env: &Env) -> EvalResult<Trampoline> {
    check_form(operands, 1, None)?;
    let mut result = Node::okay();
    for operand in operands.iter() {
        result = evaluator.eval(operand, env)?;
    }
    Ok(Trampoline::Value(result))
}
