//! Fatal analysis errors.
//!
//! These signal a broken program description or a stack-discipline bug in the
//! interpreter. Problems in the analyzed program are reported as
//! [`Diagnostic`](crate::diagnostics::Diagnostic)s instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Two environments for the same point disagree on locals or stack length.
    #[error("environment shape mismatch: {0}")]
    EnvShapeMismatch(String),

    /// A global container was pushed where only a `Local` placeholder may live.
    #[error("container type pushed onto the stack: {0}")]
    ContainerOnStack(String),

    #[error("type variable pushed onto the stack: {0}")]
    TypeVarOnStack(String),

    #[error("stack underflow: need {need}, have {have}")]
    StackUnderflow { need: usize, have: usize },

    #[error("leave with stack depth {0}")]
    LeaveStackDepth(usize),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("failed to load program: {0}")]
    Load(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
