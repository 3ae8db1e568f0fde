//! Client error types.

use thiserror::Error;

/// Fixed message for 401 responses and failed refreshes.
pub const UNAUTHORIZED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Fixed message for 403 responses.
pub const FORBIDDEN_MESSAGE: &str = "You do not have permission to perform this action.";

/// Fixed message for 404 responses.
pub const NOT_FOUND_MESSAGE: &str = "The requested resource was not found.";

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Credential missing or expired and refresh failed, or a repeated 401.
    #[error("{0}")]
    Unauthorized(String),

    /// Valid credential, insufficient role or permission.
    #[error("{0}")]
    Forbidden(String),

    /// Resource absent.
    #[error("{0}")]
    NotFound(String),

    /// Transport failure or timeout; no response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// Any other non-2xx response.
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or a transport fallback.
        message: String,
    },

    /// A token could not be decoded.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Reading or writing the token store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Check if this error means the user has to log in again.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Unauthorized(_) | Error::InvalidCredential(_))
    }

    /// Check if a manual retry by the caller may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status this error was produced from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized(_) => Some(401),
            Error::Forbidden(_) => Some(403),
            Error::NotFound(_) => Some(404),
            Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Network("request timed out".to_string())
        } else {
            Error::Network(e.to_string())
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error body returned by the backend.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorResponse {
    pub(crate) fn into_message(self) -> Option<String> {
        self.message
            .or(self.error)
            .filter(|m| !m.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Unauthorized(UNAUTHORIZED_MESSAGE.into()).is_auth_error());
        assert!(!Error::Forbidden(FORBIDDEN_MESSAGE.into()).is_auth_error());

        assert!(Error::Network("down".into()).is_retryable());
        assert!(
            Error::Server {
                status: 503,
                message: "busy".into()
            }
            .is_retryable()
        );
        assert!(
            !Error::Server {
                status: 422,
                message: "bad".into()
            }
            .is_retryable()
        );
        assert!(!Error::NotFound(NOT_FOUND_MESSAGE.into()).is_retryable());
    }

    #[test]
    fn test_status() {
        assert_eq!(Error::Forbidden(String::new()).status(), Some(403));
        assert_eq!(Error::Network(String::new()).status(), None);
    }

    #[test]
    fn test_error_response_prefers_message() {
        let body: ErrorResponse =
            serde_json::from_str(r#"{"message":"Lead exists","error":"Conflict"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Lead exists"));

        let body: ErrorResponse = serde_json::from_str(r#"{"error":"Conflict"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Conflict"));

        let body: ErrorResponse = serde_json::from_str(r#"{"message":"  "}"#).unwrap();
        assert_eq!(body.into_message(), None);
    }
}
