use crate::source::Span;
use crate::types::{Node, Primitive, PrimitiveFunc, Sexpr};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// --- Environment Error ---
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("unknown identifier: {0}")]
    UnboundIdentifier(String, Span), // Symbol name, span where lookup happened
    #[error("bad variable name: {0}")]
    InvalidBindingTarget(Sexpr, Span),
    #[error("parameter mismatch: expected {expected} arguments, got {found}")]
    ArityMismatch {
        expected: usize,
        found: usize,
        span: Span,
    },
}

/// Frames are shared: every closure created in a frame, and every frame
/// created below it, holds a reference.
pub type Env = Rc<RefCell<Environment>>;

// --- Environment Definition ---

pub struct Environment {
    outer: Option<Env>,
    bindings: HashMap<String, Node>,
}

impl Environment {
    /// Creates a new, empty top-level (global) environment.
    pub fn new() -> Env {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
        }))
    }

    /// Creates the global environment with every primitive installed.
    pub fn new_global_populated() -> Env {
        let env_ptr = Environment::new();
        crate::primitives::register(&mut env_ptr.borrow_mut());
        env_ptr
    }

    /// Creates a new, empty environment enclosed within an outer one.
    pub fn new_enclosed(outer_env: Env) -> Env {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer_env),
            bindings: HashMap::new(),
        }))
    }

    /// Defines a variable in the *current* frame, replacing any existing
    /// binding there. Enclosing frames are never touched.
    pub fn define(&mut self, target: &Node, value: Node) -> Result<(), EnvError> {
        match &target.kind {
            Sexpr::Symbol(name) => {
                self.bindings.insert(name.clone(), value);
                Ok(())
            }
            other => Err(EnvError::InvalidBindingTarget(other.clone(), target.span)),
        }
    }

    /// Binds a name that is known to be a valid symbol.
    pub fn bind(&mut self, name: impl Into<String>, value: Node) {
        self.bindings.insert(name.into(), value);
    }

    pub fn add_primitive(&mut self, name: &'static str, func: PrimitiveFunc) {
        let primitive = Primitive { name, func };
        self.bind(
            name,
            Node::new_procedure(
                crate::types::Procedure::Primitive(primitive),
                Span::default(),
            ),
        );
    }

    /// Looks up a variable's value, starting in this frame and walking
    /// outwards. `lookup_span` is where the variable was referenced.
    pub fn lookup(&self, name: &str, lookup_span: Span) -> Result<Node, EnvError> {
        if let Some(value_node) = self.bindings.get(name) {
            return Ok(value_node.clone());
        }
        // Walk iteratively: dynamically scoped calls can build very long chains.
        let mut next = self.outer.clone();
        while let Some(env) = next {
            let frame = env.borrow();
            if let Some(value_node) = frame.bindings.get(name) {
                return Ok(value_node.clone());
            }
            next = frame.outer.clone();
        }
        Err(EnvError::UnboundIdentifier(name.to_string(), lookup_span))
    }

    /// Builds a frame below `parent` binding each formal to the argument in
    /// the same position. Both lists are walked together, so a length
    /// mismatch or an improper list on either side is rejected.
    pub fn make_call_frame(
        parent: &Env,
        formals: &Node,
        args: &Node,
        span: Span,
    ) -> Result<Env, EnvError> {
        let frame = Environment::new_enclosed(parent.clone());
        {
            let mut frame_mut = frame.borrow_mut();
            let (mut formals_rest, mut args_rest) = (formals, args);
            loop {
                match (&formals_rest.kind, &args_rest.kind) {
                    (Sexpr::Nil, Sexpr::Nil) => break,
                    (Sexpr::Pair(name, next_formals), Sexpr::Pair(value, next_args)) => {
                        frame_mut.define(name, value.as_ref().clone())?;
                        formals_rest = next_formals.as_ref();
                        args_rest = next_args.as_ref();
                    }
                    _ => {
                        return Err(EnvError::ArityMismatch {
                            expected: formals.iter().count(),
                            found: args.iter().count(),
                            span,
                        });
                    }
                }
            }
        }
        Ok(frame)
    }

    /// The global frame at the root of `env`'s parent chain.
    pub fn global_frame(env: &Env) -> Env {
        let mut current = env.clone();
        loop {
            let outer = current.borrow().outer.clone();
            match outer {
                Some(outer) => current = outer,
                None => return current,
            }
        }
    }

    /// Gets every identifier visible from this environment.
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> = self.bindings.keys().cloned().collect();
        let mut next = self.outer.clone();
        while let Some(env) = next {
            let frame = env.borrow();
            identifiers.extend(frame.bindings.keys().cloned());
            next = frame.outer.clone();
        }
        identifiers
    }
}

/// Creates the global frame of a new evaluation session.
pub fn create_global_frame() -> Env {
    Environment::new_global_populated()
}

// Unlinks the parent chain one frame at a time so that dropping a very long
// chain does not recurse.
impl Drop for Environment {
    fn drop(&mut self) {
        let mut next = self.outer.take();
        while let Some(env) = next {
            next = match Rc::try_unwrap(env) {
                Ok(cell) => cell.into_inner().outer.take(),
                Err(_) => None,
            };
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outer {
            None => write!(f, "<Global Frame>"),
            Some(outer) => {
                let mut bindings: Vec<String> = self
                    .bindings
                    .iter()
                    .map(|(name, value)| format!("{}: {}", name, value))
                    .collect();
                bindings.sort();
                write!(f, "<{{{}}} -> {:?}>", bindings.join(", "), outer.borrow())
            }
        }
    }
}
