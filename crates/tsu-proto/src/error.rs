//! Protocol-level errors.

use thiserror::Error;

/// Framing corruption. The connection must be dropped without feedback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("receive buffer exceeded {limit} characters without a complete message")]
    BufferOverflow { limit: usize },

    #[error("message shorter than 2 characters: {0:?}")]
    ShortMessage(String),
}

/// A command whose arguments do not match its schema. Dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("command requires a selected character")]
    NotAuthenticated,

    #[error("expected {expected} arguments, got {actual}")]
    ArgCount { expected: usize, actual: usize },

    #[error("argument {0} must not be empty")]
    EmptyArg(usize),

    #[error("argument {index} is not an integer: {value:?}")]
    NotAnInteger { index: usize, value: String },

    #[error("invalid value for {0}")]
    InvalidField(&'static str),
}
