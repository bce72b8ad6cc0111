//! Error types for configuration resolution.
//!
//! Compile and dispatch errors are pinpoint failures raised for the first
//! offending value. Validation errors are collected across every field and
//! raised together as [`ValidationErrors`].

use crate::tree::ConfigPath;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Expression errors
    InvalidExpression,

    // Dispatch errors
    UnknownFunction,
    ArityMismatch,
    MissingArgument,
    InvalidArgument,
    NoEvaluator,
    InvalidFunction,

    // Resolution errors
    ResolutionFailed,
    CircularReference,

    // Input errors
    ValidationFailed,
    SourceFailed,
    ParseError,
    IoError,
}

/// Syntax errors in an indirection expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Expression must start with '%'")]
    MissingSigil,
    #[error("Unknown token: {0}")]
    UnknownToken(char),
    #[error("String is not closed")]
    UnclosedString,
    #[error("Empty expression")]
    Empty,
    #[error("Expected function name")]
    ExpectedFunctionName,
    #[error("Expected '(' after function name")]
    ExpectedLeftParen,
    #[error("Expected closing ')'")]
    ExpectedRightParen,
    #[error("Cannot mix positional and named arguments")]
    MixedArguments,
    #[error("Expected '=' after parameter name")]
    ExpectedEquals,
    #[error("Expected string value after '='")]
    ExpectedStringValue,
    #[error("Expected ',' between arguments")]
    ExpectedComma,
    #[error("Unexpected input after closing ')'")]
    TrailingInput,
    #[error("Duplicate named argument '{0}'")]
    DuplicateArgument(String),
}

/// Failures binding a compiled expression to a registered function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unknown function '{name}', available functions are:{}", render_available(.available))]
    UnknownFunction { name: String, available: Vec<String> },
    #[error("Function '{name}' expects {expected} parameter(s), got {got}.")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Function '{name}' expects {expected} required parameter(s), got {got}.")]
    RequiredArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Named argument '{param}' is missing for function '{function}'")]
    MissingNamed { param: String, function: String },
    #[error("Unknown named argument '{param}' for function '{function}'")]
    UnknownNamed { param: String, function: String },
    #[error("Argument '{param}' for function '{function}' must be {expected}, got '{got}'")]
    InvalidArgument {
        param: String,
        function: String,
        expected: &'static str,
        got: String,
    },
    #[error("No evaluator found for the given indirection")]
    NoEvaluator,
    #[error("Invalid function definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },
}

fn render_available(available: &[String]) -> String {
    if available.is_empty() {
        String::new()
    } else {
        format!(" {}", available.join(", "))
    }
}

impl DispatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DispatchError::UnknownFunction { .. } => ErrorCode::UnknownFunction,
            DispatchError::Arity { .. } | DispatchError::RequiredArity { .. } => {
                ErrorCode::ArityMismatch
            }
            DispatchError::MissingNamed { .. } => ErrorCode::MissingArgument,
            DispatchError::UnknownNamed { .. } | DispatchError::InvalidArgument { .. } => {
                ErrorCode::InvalidArgument
            }
            DispatchError::NoEvaluator => ErrorCode::NoEvaluator,
            DispatchError::InvalidDefinition { .. } => ErrorCode::InvalidFunction,
        }
    }
}

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub path: ConfigPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub message: String,
}

impl FieldError {
    pub fn new(path: ConfigPath, origin: Option<String>, message: impl Into<String>) -> Self {
        Self {
            path,
            origin,
            message: message.into(),
        }
    }

    /// The origin when known, otherwise the dotted property path.
    pub fn label(&self) -> String {
        match &self.origin {
            Some(origin) => origin.clone(),
            None if self.path.is_root() => "<root>".to_string(),
            None => self.path.to_string(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message)
    }
}

/// Every field-level problem found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn new(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration is invalid ({} error(s))", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Errors surfaced by a resolution run.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{location}: {source}")]
    Compile {
        location: String,
        source: CompileError,
    },

    #[error("{location}: {source}")]
    Dispatch {
        location: String,
        source: DispatchError,
    },

    #[error("{location}: {message}")]
    Resolution { location: String, message: String },

    #[error("Circular reference detected: {}", .chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("source '{source_name}' failed: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    #[error("failed to parse {location}: {message}")]
    Parse { location: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    // Convenience constructors

    pub fn resolution(location: impl Into<String>, message: impl Into<String>) -> Self {
        ResolveError::Resolution {
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn source_failed(source_name: &str, err: impl fmt::Display) -> Self {
        ResolveError::Source {
            source_name: source_name.to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(location: impl Into<String>, err: impl fmt::Display) -> Self {
        ResolveError::Parse {
            location: location.into(),
            message: err.to_string(),
        }
    }

    /// Attach a location to a dispatch failure.
    pub fn dispatch(location: impl Into<String>, source: DispatchError) -> Self {
        ResolveError::Dispatch {
            location: location.into(),
            source,
        }
    }

    /// Re-anchor compile and dispatch failures at the field that raised them.
    pub fn located(self, location: impl Into<String>) -> Self {
        match self {
            ResolveError::Compile { source, .. } => ResolveError::Compile {
                location: location.into(),
                source,
            },
            ResolveError::Dispatch { source, .. } => ResolveError::Dispatch {
                location: location.into(),
                source,
            },
            other => other,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ResolveError::Compile { .. } => ErrorCode::InvalidExpression,
            ResolveError::Dispatch { source, .. } => source.code(),
            ResolveError::Resolution { .. } => ErrorCode::ResolutionFailed,
            ResolveError::CircularReference { .. } => ErrorCode::CircularReference,
            ResolveError::Validation(_) => ErrorCode::ValidationFailed,
            ResolveError::Source { .. } => ErrorCode::SourceFailed,
            ResolveError::Parse { .. } => ErrorCode::ParseError,
            ResolveError::Io(_) => ErrorCode::IoError,
        }
    }

    /// One line per independent problem, for display to end users.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ResolveError::Validation(errors) => {
                errors.errors().iter().map(|e| e.to_string()).collect()
            }
            other => vec![other.to_string()],
        }
    }
}

/// Result type for resolution operations.
pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
