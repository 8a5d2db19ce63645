use crate::environment::{Env, Environment};
use crate::evaluator::{EvalError, Evaluator};
use crate::session::run_source_in;
use crate::source::Span;
use crate::types::{Node, PrimitiveFunc, PrimitiveResult, Sexpr};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

/// How many arguments a primitive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exactly(n) => write!(f, "exactly {}", n),
            Arity::AtLeast(n) => write!(f, "at least {}", n),
            Arity::Between(min, max) => write!(f, "between {} and {}", min, max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrimitiveError {
    #[error("wrong number of arguments: expected {expected}, got {found}")]
    Arity { expected: Arity, found: usize },
    #[error("argument {position} must be a {expected}, got {found}")]
    WrongType {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    Io(String),
    // Raised by the evaluator while running an env-aware primitive. Passed on as is.
    #[error(transparent)]
    Eval(Box<EvalError>),
}

impl From<EvalError> for PrimitiveError {
    fn from(err: EvalError) -> Self {
        PrimitiveError::Eval(Box::new(err))
    }
}

impl From<io::Error> for PrimitiveError {
    fn from(err: io::Error) -> Self {
        PrimitiveError::Io(err.to_string())
    }
}

// Checks the number of arguments
macro_rules! check_arity {
    // Variant for minimum number of args
    ($args:expr, min $expected:expr) => {
        if $args.len() < $expected {
            return Err(PrimitiveError::Arity {
                expected: Arity::AtLeast($expected),
                found: $args.len(),
            });
        }
    };
    // Variant for range of args (inclusive)
    ($args:expr, $min:expr, $max:expr) => {
        if !($min..=$max).contains(&$args.len()) {
            return Err(PrimitiveError::Arity {
                expected: Arity::Between($min, $max),
                found: $args.len(),
            });
        }
    };
    ($args:expr, $expected:expr) => {
        if $args.len() != $expected {
            return Err(PrimitiveError::Arity {
                expected: Arity::Exactly($expected),
                found: $args.len(),
            });
        }
    };
}

// (type? obj) -> boolean
macro_rules! is_type {
    ($args:expr, $type:pat, $span:expr) => {{
        check_arity!($args, 1);
        Ok(Node::new_bool(matches!($args[0].kind, $type), $span))
    }};
}

fn wrong_type(position: usize, expected: &'static str, found: &Node) -> PrimitiveError {
    PrimitiveError::WrongType {
        position: position + 1,
        expected,
        found: found.kind.type_name(),
    }
}

/// Extracts a number from argument `position`.
fn expect_number(args: &[Node], position: usize) -> Result<f64, PrimitiveError> {
    match args[position].kind {
        Sexpr::Number(n) => Ok(n),
        _ => Err(wrong_type(position, "number", &args[position])),
    }
}

fn numbers(args: &[Node]) -> Result<Vec<f64>, PrimitiveError> {
    (0..args.len())
        .map(|position| expect_number(args, position))
        .collect()
}

fn number(n: f64, span: Span) -> PrimitiveResult {
    Ok(Node::new_number(n, span))
}

// --- Numeric Primitives ---

pub fn prim_add(args: &[Node], span: Span) -> PrimitiveResult {
    // (+) -> 0
    // (+ 1 2 3) -> 6
    number(numbers(args)?.into_iter().sum(), span)
}

pub fn prim_sub(args: &[Node], span: Span) -> PrimitiveResult {
    // (- x) -> -x
    // (- x y z) -> x - y - z
    check_arity!(args, min 1);
    match numbers(args)?.split_first() {
        Some((first, [])) => number(-first, span),
        Some((first, rest)) => number(rest.iter().fold(*first, |acc, n| acc - n), span),
        None => number(0.0, span),
    }
}

pub fn prim_mul(args: &[Node], span: Span) -> PrimitiveResult {
    // (*) -> 1
    number(numbers(args)?.into_iter().product(), span)
}

pub fn prim_div(args: &[Node], span: Span) -> PrimitiveResult {
    // (/ x) -> 1 / x
    check_arity!(args, min 1);
    let values = numbers(args)?;
    let (first, divisors) = match values.split_first() {
        Some((first, [])) => (1.0, std::slice::from_ref(first)),
        Some((first, rest)) => (*first, rest),
        None => return number(1.0, span),
    };
    if divisors.iter().any(|d| *d == 0.0) {
        return Err(PrimitiveError::DivisionByZero);
    }
    number(divisors.iter().fold(first, |acc, d| acc / d), span)
}

fn compare_numbers<F: Fn(f64, f64) -> bool>(args: &[Node], span: Span, compare: F) -> PrimitiveResult {
    // (< a b c) holds when every neighbouring pair does
    check_arity!(args, min 2);
    let values = numbers(args)?;
    let holds = values.windows(2).all(|pair| compare(pair[0], pair[1]));
    Ok(Node::new_bool(holds, span))
}

pub fn prim_equals(args: &[Node], span: Span) -> PrimitiveResult {
    compare_numbers(args, span, |left, right| left == right)
}

pub fn prim_less_than(args: &[Node], span: Span) -> PrimitiveResult {
    compare_numbers(args, span, |left, right| left < right)
}

pub fn prim_less_than_or_equals(args: &[Node], span: Span) -> PrimitiveResult {
    compare_numbers(args, span, |left, right| left <= right)
}

pub fn prim_greater_than(args: &[Node], span: Span) -> PrimitiveResult {
    compare_numbers(args, span, |left, right| left > right)
}

pub fn prim_greater_than_or_equals(args: &[Node], span: Span) -> PrimitiveResult {
    compare_numbers(args, span, |left, right| left >= right)
}

pub fn prim_abs(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    number(expect_number(args, 0)?.abs(), span)
}

pub fn prim_quotient(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 2);
    let (dividend, divisor) = (expect_number(args, 0)?, expect_number(args, 1)?);
    if divisor == 0.0 {
        return Err(PrimitiveError::DivisionByZero);
    }
    number((dividend / divisor).trunc(), span)
}

pub fn prim_remainder(args: &[Node], span: Span) -> PrimitiveResult {
    // sign follows the dividend
    check_arity!(args, 2);
    let (dividend, divisor) = (expect_number(args, 0)?, expect_number(args, 1)?);
    if divisor == 0.0 {
        return Err(PrimitiveError::DivisionByZero);
    }
    number(dividend % divisor, span)
}

// --- Logic and Identity ---

pub fn prim_not(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    Ok(Node::new_bool(!args[0].is_truthy(), span))
}

/// Atoms compare by value, pairs and closures by identity.
fn is_eq(left: &Node, right: &Node) -> bool {
    match (&left.kind, &right.kind) {
        (Sexpr::Pair(car1, cdr1), Sexpr::Pair(car2, cdr2)) => {
            Rc::ptr_eq(car1, car2) && Rc::ptr_eq(cdr1, cdr2)
        }
        (left, right) => left == right,
    }
}

pub fn prim_is_eq(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 2);
    Ok(Node::new_bool(is_eq(&args[0], &args[1]), span))
}

pub fn prim_is_equal(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 2);
    Ok(Node::new_bool(args[0] == args[1], span))
}

// --- List Primitives ---

pub fn prim_cons(args: &[Node], span: Span) -> PrimitiveResult {
    // (cons a b) -> (a . b)
    check_arity!(args, 2);
    Ok(Node::new_pair(args[0].clone(), args[1].clone(), span))
}

pub fn prim_car(args: &[Node], _span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    args[0]
        .car()
        .cloned()
        .ok_or_else(|| wrong_type(0, "pair", &args[0]))
}

pub fn prim_cdr(args: &[Node], _span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    args[0]
        .cdr()
        .cloned()
        .ok_or_else(|| wrong_type(0, "pair", &args[0]))
}

pub fn prim_list(args: &[Node], span: Span) -> PrimitiveResult {
    // (list) -> ()
    let mut list = Node::list(args.to_vec());
    if args.is_empty() {
        list.span = span;
    }
    Ok(list)
}

pub fn prim_length(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    match args[0].list_len() {
        Some(length) => number(length as f64, span),
        None => Err(wrong_type(0, "list", &args[0])),
    }
}

// --- Type Predicates ---

pub fn prim_is_null(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Nil, span)
}

pub fn prim_is_pair(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Pair(_, _), span)
}

pub fn prim_is_list(args: &[Node], span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    Ok(Node::new_bool(args[0].is_proper_list(), span))
}

pub fn prim_is_number(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Number(_), span)
}

pub fn prim_is_boolean(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Boolean(_), span)
}

pub fn prim_is_symbol(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Symbol(_), span)
}

pub fn prim_is_string(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::String(_), span)
}

pub fn prim_is_procedure(args: &[Node], span: Span) -> PrimitiveResult {
    is_type!(args, Sexpr::Procedure(_), span)
}

// --- Output ---

pub fn prim_display(args: &[Node], _span: Span) -> PrimitiveResult {
    // strings are shown without quotes
    check_arity!(args, 1);
    let mut out = io::stdout().lock();
    match &args[0].kind {
        Sexpr::String(s) => write!(out, "{}", s)?,
        other => write!(out, "{}", other)?,
    }
    out.flush()?;
    Ok(Node::okay())
}

pub fn prim_newline(args: &[Node], _span: Span) -> PrimitiveResult {
    check_arity!(args, 0);
    writeln!(io::stdout().lock())?;
    Ok(Node::okay())
}

pub fn prim_print(args: &[Node], _span: Span) -> PrimitiveResult {
    check_arity!(args, 1);
    writeln!(io::stdout().lock(), "{}", args[0])?;
    Ok(Node::okay())
}

// --- Primitives that need the calling environment ---

pub fn prim_eval(args: &[Node], env: &Env, evaluator: &Evaluator, _span: Span) -> PrimitiveResult {
    // (eval expr) evaluates expr in the caller's frame
    check_arity!(args, 1);
    Ok(evaluator.eval(&args[0], env)?)
}

pub fn prim_apply(args: &[Node], env: &Env, evaluator: &Evaluator, _span: Span) -> PrimitiveResult {
    // (apply procedure (arg ...))
    check_arity!(args, 2);
    if !args[1].is_proper_list() {
        return Err(wrong_type(1, "list", &args[1]));
    }
    Ok(evaluator.apply(&args[0], &args[1], env)?)
}

fn read_source(name: &str) -> Result<(String, String), PrimitiveError> {
    match fs::read_to_string(name) {
        Ok(text) => Ok((name.to_string(), text)),
        Err(first_err) => {
            let with_extension = format!("{}.scm", name);
            fs::read_to_string(&with_extension)
                .map(|text| (with_extension, text))
                .map_err(|_| PrimitiveError::Io(format!("cannot load {}: {}", name, first_err)))
        }
    }
}

pub fn prim_load(args: &[Node], env: &Env, evaluator: &Evaluator, _span: Span) -> PrimitiveResult {
    // (load "file") or (load 'file #f) to echo results
    check_arity!(args, 1, 2);
    let name = match &args[0].kind {
        Sexpr::String(name) | Sexpr::Symbol(name) => name.as_str(),
        _ => return Err(wrong_type(0, "string or symbol", &args[0])),
    };
    let quiet = args.get(1).is_none_or(Node::is_truthy);

    let (path, text) = read_source(name)?;
    let global = Environment::global_frame(env);
    // errors are reported as they happen and do not stop the load
    let errors = run_source_in(evaluator, &global, &mut io::stdout(), &path, &text, !quiet);
    debug!(path = %path, errors, "load");
    Ok(Node::okay())
}

/// Installs every primitive into `env`.
pub fn register(env: &mut Environment) {
    use PrimitiveFunc::{Pure, WithEnv};

    env.add_primitive("+", Pure(prim_add));
    env.add_primitive("-", Pure(prim_sub));
    env.add_primitive("*", Pure(prim_mul));
    env.add_primitive("/", Pure(prim_div));
    env.add_primitive("=", Pure(prim_equals));
    env.add_primitive("<", Pure(prim_less_than));
    env.add_primitive("<=", Pure(prim_less_than_or_equals));
    env.add_primitive(">", Pure(prim_greater_than));
    env.add_primitive(">=", Pure(prim_greater_than_or_equals));
    env.add_primitive("abs", Pure(prim_abs));
    env.add_primitive("quotient", Pure(prim_quotient));
    env.add_primitive("remainder", Pure(prim_remainder));

    env.add_primitive("not", Pure(prim_not));
    env.add_primitive("eq?", Pure(prim_is_eq));
    env.add_primitive("equal?", Pure(prim_is_equal));

    env.add_primitive("cons", Pure(prim_cons));
    env.add_primitive("car", Pure(prim_car));
    env.add_primitive("cdr", Pure(prim_cdr));
    env.add_primitive("list", Pure(prim_list));
    env.add_primitive("length", Pure(prim_length));

    env.add_primitive("null?", Pure(prim_is_null));
    env.add_primitive("pair?", Pure(prim_is_pair));
    env.add_primitive("list?", Pure(prim_is_list));
    env.add_primitive("number?", Pure(prim_is_number));
    env.add_primitive("boolean?", Pure(prim_is_boolean));
    env.add_primitive("symbol?", Pure(prim_is_symbol));
    env.add_primitive("string?", Pure(prim_is_string));
    env.add_primitive("procedure?", Pure(prim_is_procedure));

    env.add_primitive("display", Pure(prim_display));
    env.add_primitive("newline", Pure(prim_newline));
    env.add_primitive("print", Pure(prim_print));

    env.add_primitive("eval", WithEnv(prim_eval));
    env.add_primitive("apply", WithEnv(prim_apply));
    env.add_primitive("load", WithEnv(prim_load));
}
