//! Classification of session failures.
//!
//! The `Display` text of each variant is the user-facing reason carried in a
//! `ValidationResult`, so the strings here are part of the public contract.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Missing tokens")]
    MissingCredential,

    /// Detail is kept for logs; the reason string stays stable.
    #[error("Token refresh failed")]
    TokenRefreshFailed(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Session inactive")]
    SessionInactive,

    #[error("Session expired")]
    SessionExpired,

    #[error("Network error")]
    NetworkError(String),

    /// The server answered with something that could not be read.
    #[error("Invalid server response")]
    InvalidResponse(String),

    /// Transient: another validation owns the busy flag.
    #[error("Validation in progress")]
    ValidationBusy,
}

impl SessionError {
    /// Whether this failure, on its own, is fatal to the session.
    /// Busy and network failures are transient unless policy says otherwise.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SessionError::NotAuthenticated
                | SessionError::ValidationBusy
                | SessionError::NetworkError(_)
                | SessionError::InvalidResponse(_)
        )
    }

    /// Underlying detail for logging, when the variant carries one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            SessionError::TokenRefreshFailed(d)
            | SessionError::NetworkError(d)
            | SessionError::InvalidResponse(d) => Some(d),
            _ => None,
        }
    }
}
