//! Admin account endpoints.

use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;

use super::auth::CurrentSession;
use super::decode_body;
use super::sessions::begin_session;
use crate::accounts::{NewAdmin, Principal, Updates};
use crate::error::{AccountError, ApiError, ValidationError};
use crate::AppState;

/// Account routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/admins", post(create_admin))
        .route("/v1/admins/me", get(get_me).patch(update_me))
}

/// Create an account and sign it in.
pub async fn create_admin(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let new_admin: NewAdmin = decode_body(&body)?;

    new_admin.validate().map_err(|e| {
        ApiError::Validation(ValidationError::new(format!(
            "Error validating new admin: {e}"
        )))
    })?;

    if state.admins.get_by_email(&new_admin.email).await.is_ok() {
        return Err(AccountError::DuplicateEmail.into());
    }
    if state
        .admins
        .get_by_user_name(&new_admin.user_name)
        .await
        .is_ok()
    {
        return Err(AccountError::DuplicateUserName.into());
    }

    let principal = state.admins.insert(new_admin).await.map_err(|e| match e {
        AccountError::DuplicateEmail | AccountError::DuplicateUserName => ApiError::from(e),
        other => ApiError::internal(format!("Error inserting new admin: {other}")),
    })?;

    tracing::info!(admin = %principal.id, user_name = %principal.user_name, "Admin created");
    begin_session(&state, principal).await
}

/// The signed-in admin.
pub async fn get_me(current: CurrentSession) -> Json<Principal> {
    Json(current.state.principal)
}

/// Change the signed-in admin's name. Both the session and the account are
/// updated.
pub async fn update_me(
    State(state): State<AppState>,
    current: CurrentSession,
    body: Bytes,
) -> Result<Json<Principal>, ApiError> {
    let updates: Updates = decode_body(&body)?;
    updates.validate()?;

    let CurrentSession {
        token,
        state: mut session,
    } = current;
    updates.apply(&mut session.principal);

    state.sessions.save(&token, &session).await.map_err(|e| {
        ApiError::internal(format!(
            "Error saving updated session state to session store: {e}"
        ))
    })?;

    state
        .admins
        .update(&session.principal.id, &updates)
        .await
        .map_err(|e| ApiError::internal(format!("Error updating admin store: {e}")))?;

    Ok(Json(session.principal))
}
