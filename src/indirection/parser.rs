//! Recursive parser turning a token stream into an [`IndirectionExpression`].

use super::scanner::Token;
use super::{Arguments, IndirectionExpression};
use crate::error::CompileError;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::vec::IntoIter;

/// Parse `identifier ( args )` from a complete token stream.
pub fn parse(tokens: Vec<Token>) -> Result<IndirectionExpression, CompileError> {
    if tokens.is_empty() {
        return Err(CompileError::Empty);
    }
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
    };

    let source = match parser.tokens.next() {
        Some(Token::Identifier(name)) => name,
        _ => return Err(CompileError::ExpectedFunctionName),
    };
    match parser.tokens.next() {
        Some(Token::LeftParen) => {}
        _ => return Err(CompileError::ExpectedLeftParen),
    }

    let args = parser.arguments()?;

    if parser.tokens.next().is_some() {
        return Err(CompileError::TrailingInput);
    }

    Ok(IndirectionExpression { source, args })
}

struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    /// Parse arguments up to and including the closing parenthesis.
    fn arguments(&mut self) -> Result<Arguments, CompileError> {
        let mut positional = Vec::new();
        let mut named = BTreeMap::new();

        loop {
            match self.tokens.next() {
                Some(Token::RightParen) => break,
                Some(Token::Str(value)) => {
                    if !named.is_empty() {
                        return Err(CompileError::MixedArguments);
                    }
                    positional.push(value);
                }
                Some(Token::Identifier(name)) => {
                    if !positional.is_empty() {
                        return Err(CompileError::MixedArguments);
                    }
                    let value = self.named_value()?;
                    if named.insert(name.clone(), value).is_some() {
                        return Err(CompileError::DuplicateArgument(name));
                    }
                }
                _ => return Err(CompileError::ExpectedRightParen),
            }

            // After an argument: a separator or the end of the list
            match self.tokens.next() {
                Some(Token::Comma) => {
                    if self.tokens.peek() == Some(&Token::RightParen) {
                        self.tokens.next();
                        break;
                    }
                }
                Some(Token::RightParen) => break,
                None => return Err(CompileError::ExpectedRightParen),
                Some(_) => return Err(CompileError::ExpectedComma),
            }
        }

        if named.is_empty() {
            Ok(Arguments::Positional(positional))
        } else {
            Ok(Arguments::Named(named))
        }
    }

    /// Parse `= 'value'` after a parameter name.
    fn named_value(&mut self) -> Result<String, CompileError> {
        match self.tokens.next() {
            Some(Token::Equals) => {}
            _ => return Err(CompileError::ExpectedEquals),
        }
        match self.tokens.next() {
            Some(Token::Str(value)) => Ok(value),
            _ => Err(CompileError::ExpectedStringValue),
        }
    }
}
