//! HTTP edge of the gateway.
//!
//! - session tokens and their storage
//! - caller identity resolution and the `X-User` header
//! - dispatch to discovered services through the reverse proxy
//! - account, session and WebSocket endpoints served locally

pub mod admins;
pub mod auth;
pub mod dispatch;
pub mod proxy;
pub mod routes;
pub mod session_store;
pub mod sessions;
pub mod streaming;
pub mod token;

use axum::Router;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ValidationError};
use crate::AppState;

/// Create the router with every locally served route.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(routes::router())
        .merge(sessions::router())
        .merge(admins::router())
        .merge(streaming::router())
}

/// Decode a JSON request body, answering 400 with the decoder's message on
/// failure.
pub(crate) fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::Validation(ValidationError::new(format!(
            "Error decoding request body: {e}"
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Credentials;

    #[test]
    fn test_decode_body() {
        let creds: Credentials =
            decode_body(&Bytes::from_static(br#"{"email":"a@b.co","password":"x"}"#)).unwrap();
        assert_eq!(creds.email, "a@b.co");

        let empty: Credentials = decode_body(&Bytes::from_static(b"{}")).unwrap();
        assert!(empty.email.is_empty());

        let err = decode_body::<Credentials>(&Bytes::from_static(b"not json")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("Error decoding request body: "));
    }
}
