//! Error taxonomy for the gateway.
//!
//! Domain errors are typed with `thiserror`; [`ApiError`] is the single type
//! handlers return and decides what a caller is allowed to see. Internal causes
//! are logged and replaced by a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures creating, extracting or verifying a session token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("signing key may not be empty")]
    EmptySecret,

    #[error("failed to generate random session id: {0}")]
    RandomSource(String),

    #[error("no session token found in Authorization header or `auth` query parameter")]
    MissingToken,

    #[error("authorization scheme not supported")]
    UnsupportedScheme,

    #[error("session token is not valid base64: {0}")]
    Decode(String),

    #[error("session token has invalid length: expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("session token signature mismatch")]
    SignatureMismatch,
}

impl TokenError {
    /// Whether this error comes from the server side rather than the caller.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::EmptySecret | Self::RandomSource(_))
    }
}

/// Session store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session state not found")]
    NotFound,

    #[error("session store operation failed: {0}")]
    WriteFailure(String),

    #[error("session state (de)serialization failed: {0}")]
    Serialization(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::WriteFailure(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Failures resolving the caller's session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("no session found for the provided token")]
    NotFound,

    #[error("session lookup failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound,
            other => Self::Store(other),
        }
    }
}

impl AuthError {
    /// Whether the failure is an infrastructure problem (500) rather than a
    /// missing or bad credential (401).
    pub const fn is_internal(&self) -> bool {
        match self {
            Self::Token(token) => token.is_internal(),
            Self::NotFound => false,
            Self::Store(_) => true,
        }
    }
}

/// Registry errors. Never shown to callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid path pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("malformed registration event: {0}")]
    MalformedEvent(String),
}

/// Reverse proxy failures.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    #[error("upstream instance {address} unreachable: {reason}")]
    UpstreamUnreachable { address: String, reason: String },

    #[error("upstream instance {address} timed out")]
    UpstreamTimeout { address: String },

    #[error("failed to relay body: {0}")]
    Body(String),
}

/// The notification hub task is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("notification hub has shut down")]
pub struct HubClosed;

/// A violated input rule. The message is returned to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Account store failures.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("admin not found")]
    NotFound,

    #[error("Admin with the same email already exists")]
    DuplicateEmail,

    #[error("Admin with the same username already exists")]
    DuplicateUserName,

    #[error("invalid password")]
    InvalidPassword,

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Error returned by HTTP handlers and the dispatch middleware.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::Internal(cause.to_string())
    }

    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Proxy(ProxyError::UpstreamTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Proxy(ProxyError::UpstreamUnreachable { .. }) => StatusCode::BAD_GATEWAY,
            Self::Proxy(ProxyError::Body(_)) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        if err.is_internal() {
            Self::Internal(err.to_string())
        } else {
            Self::Unauthorized(format!("Error getting session state: {err}"))
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::DuplicateEmail | AccountError::DuplicateUserName => {
                Self::Validation(ValidationError(err.to_string()))
            }
            AccountError::Validation(v) => Self::Validation(v),
            AccountError::InvalidPassword => Self::InvalidCredentials,
            AccountError::NotFound | AccountError::Hashing(_) => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Internal(cause) => {
                tracing::error!(error = %cause, "Internal error while handling request");
                "Internal server error".to_string()
            }
            Self::Proxy(err) => {
                tracing::warn!(error = %err, "Upstream request failed");
                match err {
                    ProxyError::UpstreamTimeout { .. } => "Gateway timeout".to_string(),
                    ProxyError::UpstreamUnreachable { .. } => "Bad gateway".to_string(),
                    ProxyError::Body(_) => "Internal server error".to_string(),
                }
            }
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
