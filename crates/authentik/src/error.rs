//! Error types for Authentik API operations.
//!
//! Errors are categorized so the retry layer can decide what deserves another
//! attempt. A failed HTTP call keeps the status code and the decoded response
//! body so callers can log exactly what the server said.

use crate::transport::Method;
use serde_json::Value;
use std::fmt;

/// Result type alias for Authentik operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of API errors for retry logic and user feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No response was received (connection, DNS, TLS, timeout).
    Network,
    /// The server answered 5xx, 408 or 429.
    Server,
    /// The server rejected the request with another 4xx.
    Client,
    /// Server state has not caught up with a write yet.
    Consistency,
    /// The response body could not be decoded.
    Format,
    /// Other/unknown errors.
    Other,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    ///
    /// Every non-2xx answer is retried, writes included: all writes issued by
    /// this crate's callers overwrite state, so repeating them is safe.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::Server | Self::Client | Self::Consistency
        )
    }

    /// Get a user-friendly description of this error category.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::Server => "Authentik server error",
            Self::Client => "Request rejected by Authentik",
            Self::Consistency => "Server state not yet converged",
            Self::Format => "Unexpected response format",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    #[must_use]
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check AUTHENTIK_HOST and that the server is reachable",
            Self::Server => "Check the Authentik server logs and try again",
            Self::Client => "Check the API token permissions and the request payload",
            Self::Consistency => "Re-run the command once the server has settled",
            Self::Format => "Check that AUTHENTIK_HOST points at an Authentik instance",
            Self::Other => "Check the error details for more information",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur while talking to the Authentik API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server answered with a non-2xx status.
    #[error("{method} {path} returned HTTP {status}: {body}")]
    Api {
        /// HTTP method of the failed request.
        method: Method,
        /// API path of the failed request.
        path: String,
        /// HTTP status code.
        status: u16,
        /// Decoded response body.
        body: Value,
    },

    /// No response was received.
    #[error("{method} {path} failed: {message}")]
    Transport {
        /// HTTP method of the failed request.
        method: Method,
        /// API path of the failed request.
        path: String,
        /// Underlying transport error.
        message: String,
    },

    /// The response could not be decoded into the expected shape.
    #[error("invalid API response: {0}")]
    InvalidResponse(String),

    /// A read-back did not reflect a previous write.
    #[error("stale state: {0}")]
    Stale(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Api { status, .. } => match status {
                408 | 429 | 500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Client,
            },
            Error::Transport { .. } => ErrorCategory::Network,
            Error::InvalidResponse(_) => ErrorCategory::Format,
            Error::Stale(_) => ErrorCategory::Consistency,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether this error is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// HTTP status code, if the server answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body of a failed call, if any.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        match self {
            Error::Api { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}
