//! Error types for the client library.

use reqwest::StatusCode;
use thiserror::Error;

use authrelay_common::ConfigError;

/// Errors raised by the authentication hooks and credential refreshers.
///
/// When one of these aborts a request inside the middleware chain it reaches
/// the caller as [`reqwest_middleware::Error::Middleware`]; use
/// [`AuthError::from_middleware`] to get it back.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The credential cannot be carried in an HTTP header.
    ///
    /// Header values must be visible ASCII; a token containing control
    /// characters or non-ASCII text is rejected before anything is sent.
    #[error("Invalid credential: {0}")]
    InvalidCredential(#[from] http::header::InvalidHeaderValue),

    /// The refresh endpoint answered with a non-success status.
    ///
    /// The session behind the refresh call has typically expired and the
    /// user needs to sign in again.
    #[error("Refresh rejected with status {status}: {message}")]
    RefreshRejected {
        /// Status returned by the refresh endpoint.
        status: StatusCode,
        /// Response body, or a placeholder when it could not be read.
        message: String,
    },

    /// The refresh response did not contain a usable token.
    #[error("Refresh response has no token in field '{field}'")]
    MissingToken {
        /// The JSON field that was expected to carry the token.
        field: String,
    },

    /// Network or HTTP failure while talking to the refresh endpoint.
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The refresh response body is not valid JSON.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The refresher was built from an invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// A refresher implemented outside this crate failed.
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),
}

impl AuthError {
    /// Returns the [`AuthError`] carried by a middleware error, if any.
    #[must_use]
    pub fn from_middleware(error: &reqwest_middleware::Error) -> Option<&Self> {
        if let reqwest_middleware::Error::Middleware(inner) = error {
            inner.downcast_ref::<Self>()
        } else {
            None
        }
    }

    /// Check if this error came out of a refresh attempt.
    ///
    /// Such errors mean the caller holds no valid credential and the refresh
    /// endpoint would not issue one.
    pub const fn is_refresh_error(&self) -> bool {
        matches!(
            self,
            Self::RefreshRejected { .. }
                | Self::MissingToken { .. }
                | Self::RefreshFailed(_)
                | Self::NetworkError(_)
                | Self::SerializationError(_)
        )
    }

    /// Get the refresh endpoint status if the refresh was rejected.
    pub const fn refresh_status(&self) -> Option<StatusCode> {
        match self {
            Self::RefreshRejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<AuthError> for reqwest_middleware::Error {
    fn from(error: AuthError) -> Self {
        Self::middleware(error)
    }
}
