use crate::environment::{EnvError, Env, Environment};
use crate::primitives::PrimitiveError;
use crate::source::Span;
use crate::special_forms::{self, ControlForm};
use crate::stack::ensure_sufficient_stack;
use crate::types::{Node, Primitive, PrimitiveFunc, Procedure, Sexpr};
use thiserror::Error;
use tracing::trace;

/// Default bound on nested evaluations, see `Evaluator::with_max_depth`.
pub const DEFAULT_MAX_DEPTH: usize = 10_000;

// --- Evaluation Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    EnvError(#[from] EnvError),
    #[error("cannot evaluate an undefined expression")]
    UndefinedExpression,
    #[error("malformed list: {0}")]
    MalformedExpression(Sexpr, Span),
    #[error("invalid special form: {0}")]
    InvalidSpecialForm(String, Span),
    #[error("bad argument to define: {0}")]
    InvalidDefineTarget(Sexpr, Span),
    #[error("malformed else clause: {0}")]
    MalformedElseClause(String, Span),
    #[error("duplicate formal parameter '{0}'")]
    DuplicateFormal(String, Span),
    #[error("formal parameter {0} is not valid")]
    InvalidFormal(Sexpr, Span),
    #[error("cannot call {0}")]
    NotCallable(Sexpr, Span),
    #[error("error in primitive '{name}': {source}")]
    CallError {
        name: String,
        source: PrimitiveError,
        span: Span,
    },
    #[error("maximum recursion depth exceeded ({0} nested evaluations)")]
    RecursionDepthExceeded(usize),
}

impl EvalError {
    /// Where in the source the error was raised, if anywhere.
    pub fn span(&self) -> Option<Span> {
        match self {
            EvalError::EnvError(env_error) => match env_error {
                EnvError::UnboundIdentifier(_, span)
                | EnvError::InvalidBindingTarget(_, span)
                | EnvError::ArityMismatch { span, .. } => Some(*span),
            },
            EvalError::MalformedExpression(_, span)
            | EvalError::InvalidSpecialForm(_, span)
            | EvalError::InvalidDefineTarget(_, span)
            | EvalError::MalformedElseClause(_, span)
            | EvalError::DuplicateFormal(_, span)
            | EvalError::InvalidFormal(_, span)
            | EvalError::NotCallable(_, span)
            | EvalError::CallError { span, .. } => Some(*span),
            EvalError::UndefinedExpression | EvalError::RecursionDepthExceeded(_) => None,
        }
    }
}

// Result type alias for convenience
pub type EvalResult<T = Node> = Result<T, EvalError>;

/// What a single evaluation step produced: either the final value, or an
/// expression still to be evaluated in the given environment. A `Value` is
/// never dispatched again, so a symbol or list returned by `and`, `or`,
/// `cond` or `begin` stays data.
pub enum Trampoline {
    Value(Node),
    Eval(Node, Env),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Every step recurses on the host stack.
    Recursive,
    /// Tail positions loop in place; only non-tail sub-expressions recurse.
    #[default]
    TailCall,
}

/// Evaluation settings plus the current nesting depth. Copied into every
/// nested evaluation with the depth incremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluator {
    strategy: Strategy,
    max_depth: usize,
    depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::new(Strategy::default())
    }
}

impl Evaluator {
    pub fn new(strategy: Strategy) -> Self {
        Evaluator {
            strategy,
            max_depth: DEFAULT_MAX_DEPTH,
            depth: 0,
        }
    }

    /// Nested evaluations beyond `max_depth` fail with `RecursionDepthExceeded`.
    pub fn with_max_depth(self, max_depth: usize) -> Self {
        Evaluator { max_depth, ..self }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Evaluates `expr` in `env`.
    pub fn eval(&self, expr: &Node, env: &Env) -> EvalResult {
        let inner = self.descend()?;
        ensure_sufficient_stack(|| match inner.strategy {
            Strategy::Recursive => inner.eval_recursive(expr, env),
            Strategy::TailCall => inner.eval_tail_call(expr, env),
        })
    }

    /// Like `eval`, for an expression that may be missing.
    pub fn eval_opt(&self, expr: Option<&Node>, env: &Env) -> EvalResult {
        match expr {
            Some(expr) => self.eval(expr, env),
            None => Err(EvalError::UndefinedExpression),
        }
    }

    /// Applies `procedure` to the already evaluated list `args`.
    /// `env` is the caller's environment.
    pub fn apply(&self, procedure: &Node, args: &Node, env: &Env) -> EvalResult {
        match self.apply_step(procedure, args, env, procedure.span)? {
            Trampoline::Value(value) => Ok(value),
            Trampoline::Eval(body, frame) => self.eval(&body, &frame),
        }
    }

    fn descend(&self) -> EvalResult<Evaluator> {
        if self.depth >= self.max_depth {
            return Err(EvalError::RecursionDepthExceeded(self.max_depth));
        }
        Ok(Evaluator {
            depth: self.depth + 1,
            ..*self
        })
    }

    fn eval_recursive(&self, expr: &Node, env: &Env) -> EvalResult {
        match self.step(expr, env)? {
            Trampoline::Value(value) => Ok(value),
            Trampoline::Eval(next, frame) => self.eval(&next, &frame),
        }
    }

    fn eval_tail_call(&self, expr: &Node, env: &Env) -> EvalResult {
        let mut current = self.step(expr, env)?;
        loop {
            match current {
                Trampoline::Value(value) => return Ok(value),
                Trampoline::Eval(next, frame) => current = self.step(&next, &frame)?,
            }
        }
    }

    /// One round of dispatch. Anything in tail position comes back as
    /// `Trampoline::Eval` for the caller to continue with.
    fn step(&self, expr: &Node, env: &Env) -> EvalResult<Trampoline> {
        trace!(depth = self.depth, expr = %expr, "eval");
        let (first, rest) = match &expr.kind {
            Sexpr::Symbol(name) => {
                return Ok(Trampoline::Value(env.borrow().lookup(name, expr.span)?));
            }
            Sexpr::Pair(first, rest) => (first.as_ref(), rest.as_ref()),
            // numbers, booleans, strings, (), procedures and okay
            _ => return Ok(Trampoline::Value(expr.clone())),
        };
        if !expr.is_proper_list() {
            return Err(EvalError::MalformedExpression(expr.kind.clone(), expr.span));
        }

        if let Some(name) = first.as_symbol() {
            if let Some(form) = ControlForm::from_name(name) {
                return form.evaluate(self, rest, env);
            }
            match name {
                "lambda" => {
                    return special_forms::do_lambda_form(rest, env, expr.span)
                        .map(Trampoline::Value);
                }
                "mu" => {
                    return special_forms::do_mu_form(rest, expr.span).map(Trampoline::Value);
                }
                "define" => {
                    return special_forms::do_define_form(self, rest, env, expr.span)
                        .map(Trampoline::Value);
                }
                "quote" => return special_forms::do_quote_form(rest).map(Trampoline::Value),
                "let" => {
                    let (body, frame) = special_forms::do_let_form(self, rest, env)?;
                    return Ok(Trampoline::Eval(body, frame));
                }
                _ => {}
            }
        }

        let procedure = self.eval(first, env)?;
        let args = rest
            .iter()
            .map(|operand| self.eval(operand, env))
            .collect::<EvalResult<Vec<Node>>>()?;
        self.apply_step(&procedure, &Node::list(args), env, expr.span)
    }

    fn apply_step(
        &self,
        procedure: &Node,
        args: &Node,
        env: &Env,
        span: Span,
    ) -> EvalResult<Trampoline> {
        trace!(procedure = %procedure, args = %args, "apply");
        match &procedure.kind {
            Sexpr::Procedure(Procedure::Primitive(primitive)) => self
                .apply_primitive(primitive, args, env, span)
                .map(Trampoline::Value),
            Sexpr::Procedure(Procedure::Lambda(lambda)) => {
                let frame =
                    Environment::make_call_frame(&lambda.env, &lambda.formals, args, span)?;
                Ok(Trampoline::Eval(lambda.body.clone(), frame))
            }
            // dynamic scope: the new frame hangs off the caller's environment
            Sexpr::Procedure(Procedure::Mu(mu)) => {
                let frame = Environment::make_call_frame(env, &mu.formals, args, span)?;
                Ok(Trampoline::Eval(mu.body.clone(), frame))
            }
            other => Err(EvalError::NotCallable(other.clone(), span)),
        }
    }

    fn apply_primitive(
        &self,
        primitive: &Primitive,
        args: &Node,
        env: &Env,
        span: Span,
    ) -> EvalResult {
        if !args.is_proper_list() {
            return Err(EvalError::MalformedExpression(args.kind.clone(), args.span));
        }
        let args: Vec<Node> = args.iter().cloned().collect();
        let result = match primitive.func {
            PrimitiveFunc::Pure(func) => func(&args, span),
            PrimitiveFunc::WithEnv(func) => func(&args, env, self, span),
        };
        result.map_err(|cause| match cause {
            PrimitiveError::Eval(err) => *err,
            cause => EvalError::CallError {
                name: primitive.name.to_string(),
                source: cause,
                span,
            },
        })
    }
}

/// Evaluates `node` in `env` with the default evaluator.
pub fn evaluate(node: &Node, env: &Env) -> EvalResult {
    Evaluator::default().eval(node, env)
}

/// Applies `procedure` to `args` from the caller environment `env` with the default evaluator.
pub fn apply(procedure: &Node, args: &Node, env: &Env) -> EvalResult {
    Evaluator::default().apply(procedure, args, env)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_program, parse_str};
    use crate::primitives::Arity;

    const STRATEGIES: [Strategy; 2] = [Strategy::Recursive, Strategy::TailCall];

    // Evaluates every expression in `input` in a fresh global environment, returning the last value.
    fn run(input: &str, strategy: Strategy) -> EvalResult {
        let env = Environment::new_global_populated();
        run_in(input, strategy, &env)
    }

    fn run_in(input: &str, strategy: Strategy, env: &Env) -> EvalResult {
        let evaluator = Evaluator::new(strategy);
        let mut result = Node::okay();
        match parse_program(input) {
            Ok(nodes) => {
                for node in nodes {
                    result = evaluator.eval(&node, env)?;
                }
                Ok(result)
            }
            Err(e) => panic!("Parsing failed for input '{}': {}", input, e),
        }
    }

    // Helper to evaluate input under both strategies and check the result kind (ignores span)
    fn assert_eval_kind(input: &str, expected_kind: Sexpr) {
        for strategy in STRATEGIES {
            match run(input, strategy) {
                Ok(result_node) => assert_eq!(
                    result_node.kind, expected_kind,
                    "Input: '{}' ({:?})",
                    input, strategy
                ),
                Err(e) => panic!("Evaluation failed for input '{}' ({:?}): {}", input, strategy, e),
            }
        }
    }

    fn assert_eval_display(input: &str, expected: &str) {
        for strategy in STRATEGIES {
            match run(input, strategy) {
                Ok(result_node) => {
                    assert_eq!(result_node.to_string(), expected, "Input: '{}'", input)
                }
                Err(e) => panic!("Evaluation failed for input '{}' ({:?}): {}", input, strategy, e),
            }
        }
    }

    // Helper to assert evaluation errors under both strategies
    fn assert_eval_error(input: &str, expected_error_variant: &EvalError) {
        for strategy in STRATEGIES {
            match run(input, strategy) {
                Ok(result) => panic!(
                    "Expected evaluation to fail for input '{}', but got: {:?}",
                    input, result
                ),
                Err(e) => {
                    assert_eq!(
                        std::mem::discriminant(&e),
                        std::mem::discriminant(expected_error_variant),
                        "Input: '{}', Expected error variant like {:?}, got: {:?}",
                        input,
                        expected_error_variant,
                        e
                    );
                }
            }
        }
    }

    fn unbound() -> EvalError {
        EvalError::EnvError(EnvError::UnboundIdentifier("".into(), Span::default()))
    }

    fn invalid_form() -> EvalError {
        EvalError::InvalidSpecialForm("".into(), Span::default())
    }

    #[test]
    fn test_eval_self_evaluating() {
        assert_eval_kind("123", Sexpr::Number(123.0));
        assert_eval_kind("-4.5", Sexpr::Number(-4.5));
        assert_eval_kind("#t", Sexpr::Boolean(true));
        assert_eval_kind("#f", Sexpr::Boolean(false));
        assert_eval_kind(r#""hello""#, Sexpr::String("hello".to_string()));
        assert_eval_kind("()", Sexpr::Nil);
    }

    #[test]
    fn test_okay_and_procedures_self_evaluate() {
        let env = Environment::new();
        for strategy in STRATEGIES {
            let evaluator = Evaluator::new(strategy);
            assert_eq!(evaluator.eval(&Node::okay(), &env), Ok(Node::okay()));
        }
        let global = Environment::new_global_populated();
        let plus = global.borrow().lookup("+", Span::default()).unwrap();
        assert_eq!(evaluate(&plus, &global), Ok(plus.clone()));
    }

    #[test]
    fn test_eval_opt_missing_expression() {
        let env = Environment::new();
        assert_eq!(
            Evaluator::default().eval_opt(None, &env),
            Err(EvalError::UndefinedExpression)
        );
    }

    #[test]
    fn test_eval_symbol_lookup() {
        let env = Environment::new();
        env.borrow_mut()
            .bind("x", Node::new_number(100.0, Span::default()));
        let inner = Environment::new_enclosed(env.clone());
        inner
            .borrow_mut()
            .bind("x", Node::new_number(5.0, Span::default()));
        for strategy in STRATEGIES {
            assert_eq!(run_in("x", strategy, &env).unwrap().kind, Sexpr::Number(100.0));
            assert_eq!(run_in("x", strategy, &inner).unwrap().kind, Sexpr::Number(5.0));
        }
        assert_eval_error("y", &unbound());
    }

    #[test]
    fn test_eval_malformed_list() {
        assert_eval_error(
            "(+ 1 . 2)",
            &EvalError::MalformedExpression(Sexpr::Nil, Span::default()),
        );
    }

    #[test]
    fn test_eval_quote() {
        assert_eval_kind("'1", Sexpr::Number(1.0));
        assert_eval_kind("'a", Sexpr::Symbol("a".to_string()));
        assert_eval_kind("'()", Sexpr::Nil);
        assert_eval_kind("(quote ())", Sexpr::Nil);
        assert_eval_display("'(1 (2 b) . c)", "(1 (2 b) . c)");
        assert_eval_display("''a", "(quote a)");

        assert_eval_error("(quote a b)", &invalid_form());
        assert_eval_error("(quote)", &invalid_form());
    }

    #[test]
    fn test_eval_if() {
        assert_eval_kind("(if #t 1 2)", Sexpr::Number(1.0));
        assert_eval_kind("(if #t 1)", Sexpr::Number(1.0));
        assert_eval_kind("(if 0 1 2)", Sexpr::Number(1.0)); // 0 is true
        assert_eval_kind("(if '() 1 2)", Sexpr::Number(1.0)); // '() is true
        assert_eval_kind("(if #f 1 2)", Sexpr::Number(2.0));
        assert_eval_kind("(if #f 1)", Sexpr::Okay);
    }

    #[test]
    fn test_eval_if_does_not_evaluate_unused_branch() {
        assert_eval_kind(
            "(if #t 'good unbound-variable)",
            Sexpr::Symbol("good".to_string()),
        );
        assert_eval_kind(
            "(if #f unbound-variable 'good)",
            Sexpr::Symbol("good".to_string()),
        );
    }

    #[test]
    fn test_eval_if_errors() {
        assert_eval_error("(if)", &invalid_form());
        assert_eval_error("(if #t)", &invalid_form());
        assert_eval_error("(if #t 1 2 3)", &invalid_form());
        assert_eval_error("(if unbound 1 2)", &unbound());
    }

    #[test]
    fn test_eval_and_or() {
        assert_eval_kind("(and)", Sexpr::Boolean(true));
        assert_eval_kind("(or)", Sexpr::Boolean(false));
        assert_eval_kind("(and 1 2 3)", Sexpr::Number(3.0));
        assert_eval_kind("(or #f #f 5)", Sexpr::Number(5.0));
        assert_eval_kind("(and 1 #f 3)", Sexpr::Boolean(false));
        assert_eval_kind("(or #f 2 undefined)", Sexpr::Number(2.0));
        assert_eval_kind("(and #f undefined)", Sexpr::Boolean(false));
    }

    #[test]
    fn test_short_circuit_results_are_not_reevaluated() {
        // the values are symbols and lists; evaluating them again would fail
        assert_eval_kind("(and 1 'unbound-name)", Sexpr::Symbol("unbound-name".into()));
        assert_eval_kind("(or 'unbound-name 2)", Sexpr::Symbol("unbound-name".into()));
        assert_eval_display("(and #t '(undefined-proc 1))", "(undefined-proc 1)");
        assert_eval_display("(begin 1 '(if))", "(if)");
        assert_eval_kind("(cond ('cond-test))", Sexpr::Symbol("cond-test".into()));
    }

    #[test]
    fn test_or_last_operand_is_evaluated() {
        assert_eval_kind("(or #f (+ 1 2))", Sexpr::Number(3.0));
        assert_eval_kind("(or #f #f)", Sexpr::Boolean(false));
        assert_eval_error("(or #f missing)", &unbound());
    }

    #[test]
    fn test_eval_cond() {
        assert_eval_kind("(cond (#f 1) (else 2 3))", Sexpr::Number(3.0));
        assert_eval_kind("(cond (#f 1) (#t 2))", Sexpr::Number(2.0));
        assert_eval_kind("(cond (#f 1))", Sexpr::Okay);
        assert_eval_kind("(cond)", Sexpr::Okay);
        assert_eval_kind("(cond ((+ 1 2)))", Sexpr::Number(3.0));
        assert_eval_kind("(cond (#t 1 2 (+ 1 2)))", Sexpr::Number(3.0));
    }

    #[test]
    fn test_eval_cond_else_errors() {
        let else_error = EvalError::MalformedElseClause("".into(), Span::default());
        assert_eval_error("(cond (#f 1) (else 2) (#t 3))", &else_error);
        assert_eval_error("(cond (else))", &else_error);
        assert_eval_error("(cond ())", &invalid_form());
        assert_eval_error(
            "(cond 1)",
            &EvalError::MalformedExpression(Sexpr::Nil, Span::default()),
        );
    }

    #[test]
    fn test_eval_begin() {
        assert_eval_kind("(begin 1 2 3)", Sexpr::Number(3.0));
        assert_eval_kind("(begin (define x 4) (+ x 1))", Sexpr::Number(5.0));
        assert_eval_error("(begin)", &invalid_form());
    }

    #[test]
    fn test_eval_define() {
        assert_eval_kind("(define x 10)", Sexpr::Symbol("x".into()));
        assert_eval_kind("(define x 10) x", Sexpr::Number(10.0));
        assert_eval_kind("(define (square n) (* n n))", Sexpr::Symbol("square".into()));
        assert_eval_kind("(define (square n) (* n n)) (square 7)", Sexpr::Number(49.0));
        assert_eval_kind("(define (five) 1 2 5) (five)", Sexpr::Number(5.0));
    }

    #[test]
    fn test_eval_define_errors() {
        assert_eval_error("(define x)", &invalid_form());
        assert_eval_error("(define x 1 2)", &invalid_form());
        assert_eval_error(
            "(define 1 2)",
            &EvalError::InvalidDefineTarget(Sexpr::Nil, Span::default()),
        );
        assert_eval_error(
            "(define (1 x) x)",
            &EvalError::EnvError(EnvError::InvalidBindingTarget(
                Sexpr::Nil,
                Span::default(),
            )),
        );
        assert_eval_error(
            "(define (f x x) x)",
            &EvalError::DuplicateFormal("".into(), Span::default()),
        );
    }

    #[test]
    fn test_define_in_body_is_local() {
        assert_eval_kind(
            "(define x 1) (define (f) (define x 2) x) (f)",
            Sexpr::Number(2.0),
        );
        assert_eval_kind(
            "(define x 1) (define (f) (define x 2) x) (f) x",
            Sexpr::Number(1.0),
        );
    }

    #[test]
    fn test_eval_lambda() {
        assert_eval_kind("((lambda (x y) (+ x y)) 3 4)", Sexpr::Number(7.0));
        assert_eval_kind("((lambda () 42))", Sexpr::Number(42.0));
        assert_eval_kind("((lambda (x) (define y x) (* y 2)) 5)", Sexpr::Number(10.0));
        assert_eval_display("(lambda (x) x)", "(lambda (x) x)");
        assert_eval_display("(lambda (x) 1 x)", "(lambda (x) (begin 1 x))");
        assert_eval_error("(lambda (x))", &invalid_form());
        assert_eval_error(
            "(lambda (x 1) x)",
            &EvalError::InvalidFormal(Sexpr::Nil, Span::default()),
        );
    }

    #[test]
    fn test_closures_outlive_their_frame() {
        assert_eval_kind(
            "(define (make-adder n) (lambda (x) (+ x n)))
             (define add5 (make-adder 5))
             (add5 10)",
            Sexpr::Number(15.0),
        );
        assert_eval_kind(
            "(define (counter start) (lambda () start))
             (define c1 (counter 1))
             (define c2 (counter 2))
             (+ (c1) (c2))",
            Sexpr::Number(3.0),
        );
    }

    #[test]
    fn test_lambda_arity_mismatch() {
        let arity = EvalError::EnvError(EnvError::ArityMismatch {
            expected: 0,
            found: 0,
            span: Span::default(),
        });
        assert_eval_error("((lambda (x y) x) 1)", &arity);
        assert_eval_error("((lambda (x) x) 1 2)", &arity);
        assert_eval_error("((mu (x) x) 1 2)", &arity);
    }

    #[test]
    fn test_lambda_is_lexical_and_mu_is_dynamic() {
        let program = "
            (define x 'global)
            (define (lexical) x)
            (define dynamic (mu () x))
            (define (call-lexical) (let ((x 'local)) (lexical)))
            (define (call-dynamic) (let ((x 'local)) (dynamic)))";
        assert_eval_kind(
            &format!("{program} (call-lexical)"),
            Sexpr::Symbol("global".into()),
        );
        assert_eval_kind(
            &format!("{program} (call-dynamic)"),
            Sexpr::Symbol("local".into()),
        );
        assert_eval_kind(&format!("{program} (dynamic)"), Sexpr::Symbol("global".into()));
    }

    #[test]
    fn test_mu_sees_callers_parameters() {
        assert_eval_kind(
            "(define f (mu () (* a b)))
             (define (g a b) (f))
             (g 3 4)",
            Sexpr::Number(12.0),
        );
        assert_eval_error("(define f (mu () (* a b))) (f)", &unbound());
        assert_eval_display("(mu (a) a)", "(mu (a) a)");
    }

    #[test]
    fn test_eval_let() {
        assert_eval_kind("(let ((x 1) (y 2)) (+ x y))", Sexpr::Number(3.0));
        assert_eval_kind("(let () 5)", Sexpr::Number(5.0));
        assert_eval_kind("(let ((x 1)) (define y 2) (+ x y))", Sexpr::Number(3.0));
        assert_eval_kind("(define x 10) (let ((x 1) (y x)) y)", Sexpr::Number(10.0));
        assert_eval_kind("(define x 10) (let ((x 1)) x) x", Sexpr::Number(10.0));
    }

    #[test]
    fn test_let_bindings_are_simultaneous() {
        assert_eval_error("(let ((x 1) (y x)) y)", &unbound());
    }

    #[test]
    fn test_let_errors() {
        assert_eval_error("(let ((x 1)))", &invalid_form());
        assert_eval_error("(let x 1)", &invalid_form());
        assert_eval_error("(let ((x)) x)", &EvalError::UndefinedExpression);
        assert_eval_error(
            "(let ((1 2)) 3)",
            &EvalError::EnvError(EnvError::InvalidBindingTarget(
                Sexpr::Nil,
                Span::default(),
            )),
        );
    }

    #[test]
    fn test_not_callable() {
        let not_callable = EvalError::NotCallable(Sexpr::Nil, Span::default());
        assert_eval_error("(1 2 3)", &not_callable);
        assert_eval_error("(\"hello\" 1)", &not_callable);
        assert_eval_error("((list 1 2) 3)", &not_callable);
    }

    #[test]
    fn test_primitive_failures_are_call_errors() {
        for strategy in STRATEGIES {
            let result = run("(+ 1 #t)", strategy);
            assert!(
                matches!(
                    &result,
                    Err(EvalError::CallError { name, source: PrimitiveError::WrongType { .. }, .. })
                        if name == "+"
                ),
                "{:?}",
                result
            );
            let result = run("(car)", strategy);
            assert!(matches!(
                result,
                Err(EvalError::CallError {
                    source: PrimitiveError::Arity {
                        expected: Arity::Exactly(1),
                        found: 0
                    },
                    ..
                })
            ));
        }
    }

    #[test]
    fn test_operands_evaluated_left_to_right() {
        assert_eval_kind(
            "(define log '())
             (list (begin (define log (cons 1 log)) 1) (begin (define log (cons 2 log)) 2))
             log",
            Node::list(vec![
                Node::new_number(2.0, Span::default()),
                Node::new_number(1.0, Span::default()),
            ])
            .kind
            .clone(),
        );
    }

    #[test]
    fn test_errors_in_operands_propagate_unchanged() {
        assert_eval_error("(no-such-procedure 1)", &unbound());
        assert_eval_error("(list 1 (car missing))", &unbound());
        assert_eval_error("(+ 1 (/ 1 0))", &EvalError::CallError {
            name: String::new(),
            source: PrimitiveError::DivisionByZero,
            span: Span::default(),
        });
    }

    #[test]
    fn test_deep_tail_recursion() {
        let program = "
            (define (count-down n)
              (if (= n 0) 'done (count-down (- n 1))))";
        let deep = format!("{program} (count-down 100000)");
        assert_eq!(
            run(&deep, Strategy::TailCall).unwrap().kind,
            Sexpr::Symbol("done".into())
        );
        // same answer for a small run without the tail-call loop
        let shallow = format!("{program} (count-down 100)");
        assert_eq!(
            run(&shallow, Strategy::Recursive).unwrap().kind,
            Sexpr::Symbol("done".into())
        );
        // the recursive strategy runs out of depth, as an ordinary error
        assert!(matches!(
            run(&deep, Strategy::Recursive),
            Err(EvalError::RecursionDepthExceeded(DEFAULT_MAX_DEPTH))
        ));
    }

    #[test]
    fn test_tail_positions_in_control_forms() {
        let program = "
            (define (loop-cond n) (cond ((= n 0) 'cond-done) (else (loop-cond (- n 1)))))
            (define (loop-or n) (or (= n 0) (loop-let (- n 1))))
            (define (loop-let n) (let ((m n)) (define k m) (if (= k 0) 'let-done (loop-or k))))";
        let env = Environment::new_global_populated();
        run_in(program, Strategy::TailCall, &env).unwrap();
        assert_eq!(
            run_in("(loop-cond 50000)", Strategy::TailCall, &env).unwrap().kind,
            Sexpr::Symbol("cond-done".into())
        );
        assert_eq!(
            run_in("(loop-or 50000)", Strategy::TailCall, &env).unwrap().kind,
            Sexpr::Symbol("let-done".into())
        );
    }

    #[test]
    fn test_begin_result_is_not_a_tail_position() {
        // the last operand of `begin` is evaluated before the form returns
        let env = Environment::new_global_populated();
        let program = "(define (spin n) (begin 'step (if (= n 0) 'done (spin (- n 1)))))";
        run_in(program, Strategy::TailCall, &env).unwrap();
        assert_eq!(
            run_in("(spin 100)", Strategy::TailCall, &env).unwrap().kind,
            Sexpr::Symbol("done".into())
        );
        assert!(matches!(
            run_in("(spin 100000)", Strategy::TailCall, &env),
            Err(EvalError::RecursionDepthExceeded(_))
        ));
    }

    #[test]
    fn test_dynamic_tail_recursion() {
        let program = "
            (define count-up (mu (n limit) (if (= n limit) n (count-up (+ n 1) limit))))
            (count-up 0 3000)";
        assert_eq!(
            run(program, Strategy::TailCall).unwrap().kind,
            Sexpr::Number(3000.0)
        );
    }

    #[test]
    fn test_non_tail_recursion_matches_across_strategies() {
        assert_eval_kind(
            "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 10)",
            Sexpr::Number(3_628_800.0),
        );
        assert_eval_kind(
            "(define (fib n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))) (fib 15)",
            Sexpr::Number(610.0),
        );
    }

    #[test]
    fn test_max_depth_is_configurable() {
        let env = Environment::new_global_populated();
        let evaluator = Evaluator::new(Strategy::TailCall).with_max_depth(3);
        let nested = parse_str("(+ 1 (+ 1 (+ 1 (+ 1 1))))").unwrap();
        assert_eq!(
            evaluator.eval(&nested, &env),
            Err(EvalError::RecursionDepthExceeded(3))
        );
        let flat = parse_str("(+ 1 1)").unwrap();
        assert_eq!(evaluator.eval(&flat, &env).unwrap().kind, Sexpr::Number(2.0));
    }

    #[test]
    fn test_apply_entry_point() {
        let env = Environment::new_global_populated();
        let square = run_in("(lambda (x) (* x x))", Strategy::TailCall, &env).unwrap();
        let args = Node::list(vec![Node::new_number(9.0, Span::default())]);
        assert_eq!(apply(&square, &args, &env).unwrap().kind, Sexpr::Number(81.0));

        let not_a_procedure = Node::new_number(1.0, Span::default());
        assert!(matches!(
            apply(&not_a_procedure, &args, &env),
            Err(EvalError::NotCallable(..))
        ));
    }

    #[test]
    fn test_error_spans() {
        let env = Environment::new_global_populated();
        let node = parse_str("(+ 1 missing)").unwrap();
        let err = evaluate(&node, &env).unwrap_err();
        assert_eq!(err.span(), Some(Span::new(5, 12)));
        assert_eq!(EvalError::UndefinedExpression.span(), None);
    }
}
