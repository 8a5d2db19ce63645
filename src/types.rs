use crate::environment::Env;
use crate::evaluator::Evaluator;
use crate::primitives::PrimitiveError;
use crate::source::Span;
use crate::stack::ensure_sufficient_stack;
use std::fmt;
use std::rc::Rc;

/// A value together with the source span it was read from.
/// Equality only looks at `kind`: two nodes are equal when their data is,
/// wherever they came from.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: Sexpr,
    pub span: Span,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// Represents a Scheme S-expression (Symbolic Expression).
/// The same type is used for program syntax and for runtime values.
#[derive(Debug, Clone)]
pub enum Sexpr {
    Symbol(String),
    Number(f64),
    Boolean(bool),
    String(String),
    Pair(Rc<Node>, Rc<Node>),
    Nil, // the empty list '()
    Okay, // "no useful value", never shown by the REPL
    Procedure(Procedure),
}

// Structural equality, compared with a work list rather than recursion.
impl PartialEq for Sexpr {
    fn eq(&self, other: &Self) -> bool {
        let mut pending: Vec<(&Sexpr, &Sexpr)> = vec![(self, other)];
        while let Some((left, right)) = pending.pop() {
            let same = match (left, right) {
                (Sexpr::Pair(car1, cdr1), Sexpr::Pair(car2, cdr2)) => {
                    pending.push((&cdr1.kind, &cdr2.kind));
                    pending.push((&car1.kind, &car2.kind));
                    true
                }
                (Sexpr::Symbol(a), Sexpr::Symbol(b)) => a == b,
                (Sexpr::Number(a), Sexpr::Number(b)) => a == b,
                (Sexpr::Boolean(a), Sexpr::Boolean(b)) => a == b,
                (Sexpr::String(a), Sexpr::String(b)) => a == b,
                (Sexpr::Nil, Sexpr::Nil) | (Sexpr::Okay, Sexpr::Okay) => true,
                (Sexpr::Procedure(a), Sexpr::Procedure(b)) => a == b,
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

impl Node {
    pub fn new(kind: Sexpr, span: Span) -> Self {
        Node { kind, span }
    }

    pub fn new_symbol(name: impl Into<String>, span: Span) -> Self {
        Node::new(Sexpr::Symbol(name.into()), span)
    }

    pub fn new_number(n: f64, span: Span) -> Self {
        Node::new(Sexpr::Number(n), span)
    }

    pub fn new_bool(b: bool, span: Span) -> Self {
        Node::new(Sexpr::Boolean(b), span)
    }

    pub fn new_nil(span: Span) -> Self {
        Node::new(Sexpr::Nil, span)
    }

    pub fn new_pair(car: impl Into<Rc<Node>>, cdr: impl Into<Rc<Node>>, span: Span) -> Self {
        Node::new(Sexpr::Pair(car.into(), cdr.into()), span)
    }

    /// `(quote quoted)`, where `quote_span` is the span of the quote mark or keyword.
    pub fn new_quote(quoted: Node, quote_span: Span) -> Self {
        let span = quote_span.merge(&quoted.span);
        let tail = Node::new_pair(quoted, Node::new_nil(span), span);
        Node::new_pair(Node::new_symbol("quote", quote_span), tail, span)
    }

    pub fn new_procedure(procedure: Procedure, span: Span) -> Self {
        Node::new(Sexpr::Procedure(procedure), span)
    }

    pub fn okay() -> Self {
        Node::new(Sexpr::Okay, Span::default())
    }

    /// Builds a proper list out of `items`.
    pub fn list(items: Vec<Node>) -> Self {
        items
            .into_iter()
            .rev()
            .fold(Node::new_nil(Span::default()), |tail, item| {
                let span = item.span.merge(&tail.span);
                Node::new_pair(item, tail, span)
            })
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            Sexpr::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_symbol(&self, name: &str) -> bool {
        self.as_symbol() == Some(name)
    }

    pub fn as_pair(&self) -> Option<(&Node, &Node)> {
        match &self.kind {
            Sexpr::Pair(car, cdr) => Some((car.as_ref(), cdr.as_ref())),
            _ => None,
        }
    }

    pub fn car(&self) -> Option<&Node> {
        self.as_pair().map(|(car, _)| car)
    }

    pub fn cdr(&self) -> Option<&Node> {
        self.as_pair().map(|(_, cdr)| cdr)
    }

    pub fn nth(&self, index: usize) -> Option<&Node> {
        self.iter().nth(index)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.kind, Sexpr::Nil)
    }

    pub fn is_okay(&self) -> bool {
        matches!(self.kind, Sexpr::Okay)
    }

    /// Only `#f` is false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.kind, Sexpr::Boolean(false))
    }

    /// Number of elements if this is a proper list, `None` otherwise.
    pub fn list_len(&self) -> Option<usize> {
        let mut iter = self.iter();
        let count = iter.by_ref().count();
        iter.rest().is_nil().then_some(count)
    }

    pub fn is_proper_list(&self) -> bool {
        self.list_len().is_some()
    }

    /// Iterates over the elements of a (possibly improper) list.
    /// Iteration stops at the first non-pair tail, see `ListIter::rest`.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { rest: self }
    }
}

// Takes apart every uniquely owned pair below this node with an explicit
// work list, so that dropping a long or deeply nested list does not recurse.
impl Drop for Node {
    fn drop(&mut self) {
        let Sexpr::Pair(car, cdr) = std::mem::replace(&mut self.kind, Sexpr::Nil) else {
            return;
        };
        let mut pending = vec![car, cdr];
        while let Some(node) = pending.pop() {
            if let Ok(mut node) = Rc::try_unwrap(node) {
                if let Sexpr::Pair(car, cdr) = std::mem::replace(&mut node.kind, Sexpr::Nil) {
                    pending.push(car);
                    pending.push(cdr);
                }
            }
        }
    }
}

pub struct ListIter<'a> {
    rest: &'a Node,
}

impl<'a> ListIter<'a> {
    /// Whatever is left: `()` after a proper list, the dotted tail otherwise.
    pub fn rest(&self) -> &'a Node {
        self.rest
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<&'a Node> {
        let current: &'a Node = self.rest;
        match &current.kind {
            Sexpr::Pair(car, cdr) => {
                self.rest = cdr.as_ref();
                Some(car.as_ref())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Symbol(s) => write!(f, "{}", s),
            Sexpr::Number(n) => write!(f, "{}", n),
            Sexpr::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Sexpr::Pair(car, cdr) => {
                // nesting through the car recurses
                ensure_sufficient_stack(|| write!(f, "({}", car))?;
                let mut rest: &Sexpr = &cdr.kind;
                loop {
                    match rest {
                        Sexpr::Pair(car, cdr) => {
                            write!(f, " {}", car)?;
                            rest = &cdr.kind;
                        }
                        Sexpr::Nil => break,
                        tail => {
                            write!(f, " . {}", tail)?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Sexpr::Nil => write!(f, "()"),
            Sexpr::Okay => write!(f, "okay"),
            Sexpr::String(str) => {
                write!(
                    f,
                    "\"{}\"",
                    str.chars().fold(String::new(), |mut acc, char| {
                        match char {
                            '"' => acc.push_str("\\\""),
                            '\\' => acc.push_str("\\\\"),
                            '\n' => acc.push_str("\\n"),
                            '\r' => acc.push_str("\\r"),
                            '\t' => acc.push_str("\\t"),
                            c => acc.push(c),
                        }
                        acc
                    })
                )
            }
            Sexpr::Procedure(procedure) => write!(f, "{}", procedure),
        }
    }
}

impl Sexpr {
    pub fn type_name(&self) -> &'static str {
        match self {
            Sexpr::Number(_) => "number",
            Sexpr::Symbol(_) => "symbol",
            Sexpr::Boolean(_) => "boolean",
            Sexpr::String(_) => "string",
            Sexpr::Pair(_, _) => "pair",
            Sexpr::Nil => "nil",
            Sexpr::Okay => "okay",
            Sexpr::Procedure(_) => "procedure",
        }
    }
}

pub type PrimitiveResult = Result<Node, PrimitiveError>;

/// Host implementation of a primitive. `WithEnv` primitives are also handed
/// the calling frame and the evaluator that is running them.
#[derive(Clone, Copy)]
pub enum PrimitiveFunc {
    Pure(fn(&[Node], Span) -> PrimitiveResult),
    WithEnv(fn(&[Node], &Env, &Evaluator, Span) -> PrimitiveResult),
}

#[derive(Clone, Copy)]
pub struct Primitive {
    pub name: &'static str,
    pub func: PrimitiveFunc,
}

/// Closure created by `lambda`: free names resolve in `env`, the frame it was created in.
pub struct Lambda {
    pub formals: Node,
    pub body: Node,
    pub env: Env,
}

/// Closure created by `mu`: free names resolve in the frame of whoever calls it.
pub struct Mu {
    pub formals: Node,
    pub body: Node,
}

#[derive(Clone)]
pub enum Procedure {
    Primitive(Primitive),
    Lambda(Rc<Lambda>),
    Mu(Rc<Mu>),
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(primitive) => write!(f, "#<primitive:{}>", primitive.name),
            Procedure::Lambda(lambda) => write!(f, "(lambda {} {})", lambda.formals, lambda.body),
            Procedure::Mu(mu) => write!(f, "(mu {} {})", mu.formals, mu.body),
        }
    }
}

// Captured environments are left out: a frame usually holds the closure
// that captured it.
impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Primitive(primitive) => write!(f, "Primitive({})", primitive.name),
            Procedure::Lambda(lambda) => {
                write!(f, "Lambda({}, {})", lambda.formals, lambda.body)
            }
            Procedure::Mu(mu) => write!(f, "Mu({}, {})", mu.formals, mu.body),
        }
    }
}

// Primitives compare by name, closures by identity.
impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Procedure::Primitive(p1), Procedure::Primitive(p2)) => p1.name == p2.name,
            (Procedure::Lambda(l1), Procedure::Lambda(l2)) => Rc::ptr_eq(l1, l2),
            (Procedure::Mu(m1), Procedure::Mu(m2)) => Rc::ptr_eq(m1, m2),
            _ => false,
        }
    }
}
