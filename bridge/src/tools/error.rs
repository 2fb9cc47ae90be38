use thiserror::Error;
use voxpipe_core::TtsError;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout")]
    Timeout,
}

impl From<TtsError> for ToolError {
    fn from(e: TtsError) -> Self {
        match e {
            TtsError::InvalidArgument(msg) => ToolError::InvalidArguments(msg),
            other => ToolError::ExecutionFailed(format!("{} phase: {}", other.phase(), other)),
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
