//! Sign-in and sign-out endpoints.

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, post},
    Json, Router,
};
use bytes::Bytes;

use super::auth::CurrentSession;
use super::decode_body;
use super::session_store::SessionState;
use super::token::SessionToken;
use crate::accounts::{Credentials, Principal};
use crate::error::ApiError;
use crate::AppState;

/// Session routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/mine", delete(end_session))
}

/// Sign in with email and password.
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let credentials: Credentials = decode_body(&body)?;

    // Unknown email and wrong password look the same to the caller.
    let record = state
        .admins
        .get_by_email(&credentials.email)
        .await
        .map_err(|_| ApiError::InvalidCredentials)?;
    record
        .authenticate_blocking(credentials.password)
        .await
        .map_err(|_| ApiError::InvalidCredentials)?;

    tracing::info!(admin = %record.principal.id, "Admin signed in");
    begin_session(&state, record.principal).await
}

/// Sign out of the session carried by the request.
pub async fn end_session(
    State(state): State<AppState>,
    current: CurrentSession,
) -> Result<&'static str, ApiError> {
    state
        .sessions
        .delete(&current.token)
        .await
        .map_err(|e| ApiError::internal(format!("Error ending session: {e}")))?;

    tracing::info!(admin = %current.state.principal.id, "Admin signed out");
    Ok("Signed out")
}

/// Start a session for `principal` and answer 201 with the principal as JSON
/// and the new token in `Authorization`.
pub async fn begin_session(state: &AppState, principal: Principal) -> Result<Response, ApiError> {
    let token = SessionToken::new(&state.signing_key)
        .map_err(|e| ApiError::internal(format!("Error beginning session: {e}")))?;
    let session = SessionState::begin(principal);

    state
        .sessions
        .save(&token, &session)
        .await
        .map_err(|e| ApiError::internal(format!("Error beginning session: {e}")))?;

    let bearer = HeaderValue::from_str(&token.bearer()).map_err(ApiError::internal)?;
    Ok((
        StatusCode::CREATED,
        [(header::AUTHORIZATION, bearer)],
        Json(session.principal),
    )
        .into_response())
}
