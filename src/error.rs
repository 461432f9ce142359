//! Error types for aegis-sync operations

use thiserror::Error;

/// Main error type for aegis-sync operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Connection failed after {attempts} attempts")]
    ConnectionExhausted { attempts: u32 },

    #[error("Malformed frame: {message}")]
    ParseFailure { message: String },

    #[error("Request failed ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("Authentication rejected, stored token cleared")]
    Unauthorized,

    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Token storage error: {0}")]
    TokenStorage(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SyncError {
    /// True when the failure ends the session rather than a single request.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Result type alias for aegis-sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_session_fatal() {
        assert!(SyncError::Unauthorized.is_fatal_to_session());
        assert!(!SyncError::Request {
            status: 500,
            message: "boom".into()
        }
        .is_fatal_to_session());
    }
}
