pub mod environment;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod session;
pub mod source;
pub mod special_forms;
pub mod stack;
pub mod types;
pub mod validate;

pub use environment::{EnvError, Env, Environment, create_global_frame};
pub use evaluator::{DEFAULT_MAX_DEPTH, EvalError, EvalResult, Evaluator, Strategy, apply, evaluate};
pub use lexer::{LexerError, Token, TokenKind, tokenize};
pub use parser::{ParseError, Parser, parse_program, parse_str};
pub use primitives::PrimitiveError;
pub use session::{Session, SessionError};
pub use source::Span;
pub use types::{Node, Procedure, Sexpr};
