//! Error types for script construction and engine setup
//!
//! Runtime failures (test bodies, hooks, timeouts, stray signals) are never
//! surfaced as errors; they are recorded in the [`Notebook`](crate::Notebook).
//! The types here cover the two conditions that abort before any execution:
//! a structurally invalid script and an invalid filter pattern.

use thiserror::Error;

/// Script construction errors
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("{kind} name cannot be empty")]
    EmptyName { kind: &'static str },

    #[error("duplicate test id {0}")]
    DuplicateId(u32),
}

/// Engine setup errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid grep pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("unknown output format: {0}")]
    UnknownFormat(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}
