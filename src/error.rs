use crate::platform::LoadError;
use std::collections::TryReserveError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Navigation to index {requested} is still pending")]
    Pending { requested: usize },
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Unexpected: {0}")]
    Unexpected(String),
    #[error("Load failed: {0}")]
    Load(#[from] LoadError),
}

impl HistoryError {
    /// Builds an `Unexpected` error and logs it; callers abort and leave state as-is.
    pub(crate) fn unexpected(message: impl Into<String>) -> Self {
        let message = message.into();
        log::error!("session history invariant violated: {}", message);
        Self::Unexpected(message)
    }

    pub(crate) fn index_out_of_range(index: i64, len: usize) -> Self {
        Self::InvalidArgument(format!("index {} out of range for {} entries", index, len))
    }
}

impl From<TryReserveError> for HistoryError {
    fn from(err: TryReserveError) -> Self {
        Self::OutOfMemory(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;
