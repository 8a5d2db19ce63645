use crate::lexer::{LexerError, Token, TokenKind, tokenize};
use crate::source::Span;
use crate::types::{Node, Sexpr};
use std::iter::Peekable;
use std::vec::IntoIter;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected token {found}, expected {expected}")]
    UnexpectedToken { found: Token, expected: String },
    #[error("unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error(transparent)]
    LexerError(#[from] LexerError),
    #[error("invalid dotted pair syntax at {0}")]
    InvalidDotSyntax(Span),
}

type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens.into_iter().peekable(),
        }
    }

    fn next_token(&mut self, expected: &str) -> ParseResult<Token> {
        self.tokens
            .next()
            .ok_or_else(|| ParseError::UnexpectedEof(expected.to_string()))
    }

    pub fn is_at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    /// Parses the next complete expression.
    pub fn parse_expr(&mut self) -> ParseResult<Node> {
        let token = self.next_token("an expression")?;
        self.parse_expr_from(token)
    }

    fn parse_expr_from(&mut self, token: Token) -> ParseResult<Node> {
        let Token { kind, span } = token;
        let kind = match kind {
            TokenKind::LParen => return self.parse_list(span),
            TokenKind::Quote => {
                let quoted = self.parse_expr()?;
                return Ok(Node::new_quote(quoted, span));
            }
            TokenKind::Dot => return Err(ParseError::InvalidDotSyntax(span)),
            TokenKind::RParen => {
                return Err(ParseError::UnexpectedToken {
                    found: Token {
                        kind: TokenKind::RParen,
                        span,
                    },
                    expected: "an expression".to_string(),
                });
            }
            TokenKind::Symbol(s) => Sexpr::Symbol(s),
            TokenKind::Number(n) => Sexpr::Number(n),
            TokenKind::Boolean(b) => Sexpr::Boolean(b),
            TokenKind::String(s) => Sexpr::String(s),
        };
        Ok(Node::new(kind, span))
    }

    /// Parses the rest of a list whose `(` was at `open`. Elements are
    /// collected in a loop and chained into pairs from the back.
    fn parse_list(&mut self, open: Span) -> ParseResult<Node> {
        let mut items = Vec::new();
        let (tail, close) = loop {
            let token = self.next_token("')'")?;
            match token.kind {
                TokenKind::RParen => break (Node::new_nil(token.span), token.span),
                TokenKind::Dot if items.is_empty() => {
                    return Err(ParseError::InvalidDotSyntax(token.span));
                }
                TokenKind::Dot => {
                    let after_dot = self.next_token("an expression after '.'")?;
                    if after_dot.kind == TokenKind::RParen {
                        return Err(ParseError::InvalidDotSyntax(token.span));
                    }
                    let tail = self.parse_expr_from(after_dot)?;
                    let close = self.next_token("')' after dotted tail")?;
                    if close.kind != TokenKind::RParen {
                        return Err(ParseError::UnexpectedToken {
                            found: close,
                            expected: "')' after dotted tail".to_string(),
                        });
                    }
                    break (tail, close.span);
                }
                _ => items.push(self.parse_expr_from(token)?),
            }
        };

        if items.is_empty() {
            return Ok(Node::new_nil(open.merge(&close)));
        }
        let end = close.end;
        let mut list = items.into_iter().rev().fold(tail, |cdr, car| {
            let span = Span::new(car.span.start, end);
            Node::new_pair(car, cdr, span)
        });
        list.span = open.merge(&close);
        Ok(list)
    }

    /// Parses exactly one expression; trailing tokens are an error.
    pub fn parse(mut self) -> ParseResult<Node> {
        let expr = self.parse_expr()?;
        match self.tokens.next() {
            Some(found) => Err(ParseError::UnexpectedToken {
                found,
                expected: "end of input".to_string(),
            }),
            None => Ok(expr),
        }
    }

    /// Parses every expression up to the end of input.
    pub fn parse_all(mut self) -> ParseResult<Vec<Node>> {
        let mut exprs = Vec::new();
        while !self.is_at_end() {
            exprs.push(self.parse_expr()?);
        }
        Ok(exprs)
    }
}

/// Lexes and parses a single expression.
pub fn parse_str(input: &str) -> ParseResult<Node> {
    Parser::new(tokenize(input)?).parse()
}

/// Lexes and parses a whole program, zero or more expressions.
pub fn parse_program(input: &str) -> ParseResult<Vec<Node>> {
    Parser::new(tokenize(input)?).parse_all()
}
