use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("domain error: {0}")]
    Domain(DomainError),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("attachment error: {0}")]
    Attachment(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ApplicationError {
    pub fn invalid_event(message: impl Into<String>) -> Self {
        ApplicationError::InvalidEvent(message.into())
    }

    pub fn attachment(message: impl Into<String>) -> Self {
        ApplicationError::Attachment(message.into())
    }

    /// 面向客户端的错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Authentication(_) => "AUTHENTICATION_FAILED",
            ApplicationError::Forbidden => "FORBIDDEN",
            ApplicationError::NotFound => "NOT_FOUND",
            ApplicationError::InvalidEvent(_) => "INVALID_EVENT",
            ApplicationError::Domain(_) => "INVALID_ARGUMENT",
            ApplicationError::Persistence(_) => "PERSISTENCE_ERROR",
            ApplicationError::Attachment(_) => "ATTACHMENT_ERROR",
            ApplicationError::Transport(_) => "TRANSPORT_ERROR",
        }
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Forbidden => ApplicationError::Forbidden,
            other => ApplicationError::Domain(other),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound,
            RepositoryError::Forbidden => ApplicationError::Forbidden,
            RepositoryError::Storage { message } => ApplicationError::Persistence(message),
        }
    }
}
