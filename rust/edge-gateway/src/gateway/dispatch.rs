//! Routing between discovered services and the gateway's own handlers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::proxy;
use crate::error::ApiError;
use crate::AppState;

/// Proxy requests whose path belongs to a registered service. Everything
/// else falls through to the local routes.
///
/// Runs inside [`super::auth::identity_middleware`], so proxied requests
/// already carry the verified `X-User` header or none at all.
pub async fn dispatch_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(target) = state.registry.route(req.uri().path()) else {
        return next.run(req).await;
    };

    match proxy::forward(&state.http, &target, req).await {
        Ok(response) => response,
        Err(e) => ApiError::from(e).into_response(),
    }
}
