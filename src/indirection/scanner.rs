//! Single-pass scanner for indirection expressions.

use super::SIGIL;
use crate::error::CompileError;

/// A lexical token of the expression language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Identifier(String),
    LeftParen,
    RightParen,
    Comma,
    Equals,
    /// Quoted literal text; quotes removed, no escape processing.
    Str(String),
}

/// Split `input` into tokens, skipping whitespace and a leading sigil.
pub fn scan(input: &str) -> Result<Vec<Token>, CompileError> {
    let body = input.strip_prefix(SIGIL).unwrap_or(input);
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LeftParen),
            ')' => tokens.push(Token::RightParen),
            ',' => tokens.push(Token::Comma),
            '=' => tokens.push(Token::Equals),
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == quote {
                        closed = true;
                        break;
                    }
                    text.push(next);
                }
                if !closed {
                    return Err(CompileError::UnclosedString);
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_alphabetic() => {
                let mut name = String::from(c);
                while let Some(&next) = chars.peek() {
                    if !next.is_ascii_alphabetic() {
                        break;
                    }
                    name.push(next);
                    chars.next();
                }
                tokens.push(Token::Identifier(name));
            }
            other => return Err(CompileError::UnknownToken(other)),
        }
    }

    Ok(tokens)
}
