use thiserror::Error;

use crate::extract::ExtractError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Validation(String),

    #[error("Download queue is full, try again in a few minutes")]
    QueueFull,

    #[error("Insufficient disk space for new downloads")]
    InsufficientSpace,

    #[error("Extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
