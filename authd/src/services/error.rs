use crate::services::rules::FieldErrors;
use crate::store::StoreError;
use service_core::error::AppError;
use thiserror::Error;

/// Message shared by every sign-in and refresh rejection.
pub const UNAUTHORIZED_MESSAGE: &str = "invalid credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Argument,
    Unauthorized,
    NotFound,
    Expired,
    Internal,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Argument(FieldErrors),

    #[error("{}", UNAUTHORIZED_MESSAGE)]
    Unauthorized,

    #[error("confirmation not found")]
    NotFound,

    /// The confirmation lapsed and a replacement has already been sent.
    #[error("confirmation expired")]
    Expired,

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Argument(_) => ErrorKind::Argument,
            AuthError::Unauthorized => ErrorKind::Unauthorized,
            AuthError::NotFound => ErrorKind::NotFound,
            AuthError::Expired => ErrorKind::Expired,
            AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn internal(msg: impl std::fmt::Display) -> Self {
        AuthError::Internal(anyhow::anyhow!("{}", msg))
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        if err.is_email_taken() {
            return AuthError::Argument(FieldErrors::email_taken());
        }
        AuthError::Internal(anyhow::Error::new(err))
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Argument(fields) => AppError::ValidationError {
                message: "validation failed".to_string(),
                details: serde_json::to_value(&fields).unwrap_or_default(),
            },
            AuthError::Unauthorized => AppError::Unauthorized(anyhow::anyhow!(UNAUTHORIZED_MESSAGE)),
            AuthError::NotFound => AppError::NotFound(anyhow::anyhow!("confirmation not found")),
            AuthError::Expired => AppError::Expired(anyhow::anyhow!("confirmation expired")),
            AuthError::Internal(e) => AppError::InternalError(e),
        }
    }
}
