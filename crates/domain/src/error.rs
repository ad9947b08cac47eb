use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("quota exceeded: at most {max} active stories")]
    QuotaExceeded { max: usize },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("conflict")]
    Conflict,
}

impl DomainError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Transient(_))
    }
}
