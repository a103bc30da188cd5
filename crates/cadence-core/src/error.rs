//! Core error taxonomy

use cadence_api::{ErrorCode, ErrorInfo, SessionStatus};
use cadence_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced session, task or workspace is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// State-machine guard violation; not retryable
    #[error("Session is {current}")]
    Conflict { current: SessionStatus },

    /// Malformed command input, rejected before any state mutation
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),

    #[error("Event log read failed: {0}")]
    Poll(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => CoreError::NotFound(what),
            StoreError::Conflict { current } => CoreError::Conflict { current },
            other => CoreError::Store(other),
        }
    }
}

impl CoreError {
    /// Wire error code for a synchronous command failure
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::NotFound(_) => ErrorCode::NotFound,
            CoreError::Conflict { .. } => ErrorCode::Conflict,
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::Collaborator(_)
            | CoreError::Poll(_)
            | CoreError::Store(_)
            | CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_taxonomy() {
        let err: CoreError = StoreError::NotFound("session s-1".into()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: CoreError = StoreError::Conflict {
            current: SessionStatus::Completed,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(err.to_string(), "Session is completed");

        let err: CoreError = StoreError::Database("disk full".into()).into();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
