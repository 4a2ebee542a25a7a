//! Caller identity resolution.
//!
//! Every request passes through [`identity_middleware`]. It resolves the
//! session behind the request's token and either sets `X-User` to the
//! caller's principal or removes whatever `X-User` the client sent. Upstream
//! services can therefore trust the header unconditionally.

use std::collections::HashMap;

use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

use super::session_store::SessionState;
use super::token::{extract_raw_token, SessionToken};
use crate::error::{ApiError, AuthError};
use crate::AppState;

/// Header carrying the verified principal as compact JSON.
pub static USER_HEADER: HeaderName = HeaderName::from_static("x-user");

/// A resolved session.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub token: SessionToken,
    pub state: SessionState,
}

/// Outcome of the lookup done by [`identity_middleware`], stored in the
/// request extensions.
#[derive(Debug, Clone)]
pub struct SessionLookup(pub Result<CurrentSession, ApiError>);

/// Resolve the session for a request: extract the token, verify its
/// signature, then load (and refresh) its state.
pub async fn resolve_session(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<CurrentSession, AuthError> {
    let raw = extract_raw_token(headers, query)?;
    let token = SessionToken::validate(&raw, &state.signing_key)?;
    let session = state.sessions.get(&token).await?;
    Ok(CurrentSession {
        token,
        state: session,
    })
}

/// Set or strip the identity header, and record the lookup for handlers.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    req.headers_mut().remove(&USER_HEADER);

    let query = Query::<HashMap<String, String>>::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let lookup = match resolve_session(&state, req.headers(), &query).await {
        Ok(current) => {
            match principal_header(&current.state) {
                Some(value) => {
                    req.headers_mut().insert(USER_HEADER.clone(), value);
                }
                None => tracing::warn!(
                    admin = %current.state.principal.id,
                    "Could not encode principal as a header value"
                ),
            }
            Ok(current)
        }
        Err(e) => {
            if e.is_internal() {
                tracing::error!(error = %e, "Session lookup failed");
            } else {
                tracing::trace!(error = %e, "Anonymous request");
            }
            Err(ApiError::from(e))
        }
    };

    req.extensions_mut().insert(SessionLookup(lookup));
    next.run(req).await
}

fn principal_header(state: &SessionState) -> Option<HeaderValue> {
    let json = serde_json::to_vec(&state.principal).ok()?;
    HeaderValue::from_bytes(&json).ok()
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<SessionLookup>() {
            Some(SessionLookup(result)) => result.clone(),
            None => Err(ApiError::internal(
                "identity middleware did not run for this route",
            )),
        }
    }
}
