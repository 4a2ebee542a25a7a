//! WebSocket endpoint for real-time notifications.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::StreamExt;

use super::auth::CurrentSession;
use crate::events::NotificationHub;
use crate::AppState;

/// Streaming routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/ws", get(websocket_handler))
}

/// Upgrade an authenticated request and register the socket with the hub.
///
/// `CurrentSession` is extracted first, so an unauthenticated request is
/// rejected with 401 before the upgrade is attempted.
pub async fn websocket_handler(
    State(state): State<AppState>,
    current: CurrentSession,
    ws: WebSocketUpgrade,
) -> Response {
    let admin = current.state.principal.id;
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move {
        tracing::info!(admin = %admin, "WebSocket client connected");
        serve_socket(hub, socket).await;
        tracing::info!(admin = %admin, "WebSocket client disconnected");
    })
}

async fn serve_socket(hub: NotificationHub, socket: WebSocket) {
    let (sink, stream) = socket.split();
    hub.add_client(sink, stream).await;
}
