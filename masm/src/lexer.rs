//! Lexical analysis. Each physical line becomes a [`LexedLine`] holding its
//! token vector; comments are stripped by the grammar and whitespace only
//! separates tokens. A `-` directly attached to a number literal in value
//! position is folded into the literal, so `-4($sp)` and `5 - 3` both lex the
//! way the parser expects.

use crate::error::{Error, LexicalError, Result};
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "lexer.pest"]
pub struct MasmParser;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TokenKind {
    Identifier,
    Directive,
    Register,
    Number,
    Str,
    Comma,
    Colon,
    LParen,
    RParen,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenValue {
    None,
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text, exactly as written (strings keep their quotes).
    pub text: String,
    pub value: TokenValue,
    pub line: u32,
    pub column: usize,
}

impl Token {
    pub fn int_value(&self) -> Option<i64> {
        match self.value {
            TokenValue::Int(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LexedLine {
    pub line: u32,
    pub tokens: Vec<Token>,
}

/// Decodes the escape set of string literals. Unknown escapes pass their
/// successor character through unchanged.
fn decode_string(raw: &str) -> String {
    let mut decoded = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some('t') => decoded.push('\t'),
            Some('\\') => decoded.push('\\'),
            Some('"') => decoded.push('"'),
            Some('0') => decoded.push('\0'),
            Some(other) => decoded.push(other),
            None => {}
        }
    }
    decoded
}

fn number_value(text: &str, column: usize) -> Result<TokenValue> {
    let invalid = || {
        Error::from(LexicalError::InvalidNumber {
            column,
            text: text.to_string(),
        })
    };

    if let Some(digits) = text.strip_prefix("0x") {
        let value = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        return Ok(TokenValue::Int(i64::from(value)));
    }
    if text.contains('.') || text.contains('e') || text.contains('E') {
        let value: f64 = text.parse().map_err(|_| invalid())?;
        return Ok(TokenValue::Float(value));
    }
    let value: i64 = text.parse().map_err(|_| invalid())?;
    if value > i64::from(u32::max_value()) {
        return Err(invalid());
    }
    Ok(TokenValue::Int(value))
}

/// Kinds after which a `-` starts a value rather than continuing one.
fn opens_value_position(kind: TokenKind) -> bool {
    match kind {
        TokenKind::Identifier
        | TokenKind::Register
        | TokenKind::Number
        | TokenKind::Str
        | TokenKind::RParen => false,
        _ => true,
    }
}

fn fold_negative_numbers(tokens: Vec<Token>) -> Vec<Token> {
    let mut folded: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        let starts_value = folded
            .last()
            .map(|prev: &Token| opens_value_position(prev.kind))
            .unwrap_or(true);

        if token.kind == TokenKind::Minus && starts_value {
            let adjacent = iter
                .peek()
                .map(|next| {
                    next.kind == TokenKind::Number
                        && token.column + token.text.len() == next.column
                })
                .unwrap_or(false);
            if adjacent {
                let number = iter.next().unwrap();
                let value = match number.value {
                    TokenValue::Int(v) => TokenValue::Int(-v),
                    TokenValue::Float(v) => TokenValue::Float(-v),
                    other => other,
                };
                folded.push(Token {
                    kind: TokenKind::Number,
                    text: format!("-{}", number.text),
                    value,
                    line: number.line,
                    column: token.column,
                });
                continue;
            }
        }

        folded.push(token);
    }

    folded
}

pub fn lex_line(text: &str, line: u32) -> Result<LexedLine> {
    let parsed = MasmParser::parse(Rule::line, text).map_err(|err| {
        let position = match err.location {
            pest::error::InputLocation::Pos(p) => p,
            pest::error::InputLocation::Span((start, _)) => start,
        };
        let column = position + 1;
        let rest = &text[position..];
        if rest.starts_with('"') {
            Error::from(LexicalError::UnterminatedString { column })
        } else {
            Error::from(LexicalError::UnexpectedCharacter {
                column,
                text: rest.chars().next().map(|c| c.to_string()).unwrap_or_default(),
            })
        }
    })?;

    let mut tokens = Vec::new();
    let line_pair = parsed.into_iter().next().unwrap();
    for pair in line_pair.into_inner() {
        let rule = pair.as_rule();
        if rule == Rule::EOI {
            continue;
        }
        let span = pair.as_span();
        let column = span.start() + 1;
        let text = span.as_str().to_string();

        let (kind, value) = match rule {
            Rule::string => {
                let inner = pair.into_inner().next().unwrap();
                (
                    TokenKind::Str,
                    TokenValue::Str(decode_string(inner.as_str())),
                )
            }
            Rule::register => (TokenKind::Register, TokenValue::None),
            Rule::directive => (TokenKind::Directive, TokenValue::None),
            Rule::number => (TokenKind::Number, number_value(&text, column)?),
            Rule::identifier => (TokenKind::Identifier, TokenValue::None),
            Rule::lshift => (TokenKind::LShift, TokenValue::None),
            Rule::rshift => (TokenKind::RShift, TokenValue::None),
            Rule::comma => (TokenKind::Comma, TokenValue::None),
            Rule::colon => (TokenKind::Colon, TokenValue::None),
            Rule::lparen => (TokenKind::LParen, TokenValue::None),
            Rule::rparen => (TokenKind::RParen, TokenValue::None),
            Rule::plus => (TokenKind::Plus, TokenValue::None),
            Rule::minus => (TokenKind::Minus, TokenValue::None),
            Rule::star => (TokenKind::Star, TokenValue::None),
            Rule::slash => (TokenKind::Slash, TokenValue::None),
            Rule::percent => (TokenKind::Percent, TokenValue::None),
            Rule::amp => (TokenKind::Amp, TokenValue::None),
            Rule::pipe => (TokenKind::Pipe, TokenValue::None),
            Rule::caret => (TokenKind::Caret, TokenValue::None),
            Rule::tilde => (TokenKind::Tilde, TokenValue::None),
            _ => unreachable!(),
        };

        tokens.push(Token {
            kind,
            text,
            value,
            line,
            column,
        });
    }

    // A number immediately followed by an identifier is one malformed
    // literal, not two tokens (e.g. `0xZZ` lexes as `0` + `xZZ`).
    for pair in tokens.windows(2) {
        if pair[0].kind == TokenKind::Number
            && pair[1].kind == TokenKind::Identifier
            && pair[0].column + pair[0].text.len() == pair[1].column
        {
            return Err(Error::from(LexicalError::InvalidNumber {
                column: pair[0].column,
                text: format!("{}{}", pair[0].text, pair[1].text),
            }));
        }
    }

    Ok(LexedLine {
        line,
        tokens: fold_negative_numbers(tokens),
    })
}

/// Lexes a whole source, one [`LexedLine`] per physical line (1-based).
pub fn lex_source(source: &str) -> Result<Vec<LexedLine>> {
    source
        .lines()
        .enumerate()
        .map(|(index, text)| lex_line(text, index as u32 + 1))
        .collect()
}
