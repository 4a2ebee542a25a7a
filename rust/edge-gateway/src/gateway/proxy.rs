//! Reverse proxying to service instances.

use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderName},
    response::Response,
};

use crate::error::ProxyError;
use crate::registry::RouteTarget;

/// Headers that describe a single connection and are not forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Build the HTTP client used for upstream calls.
///
/// Redirects are relayed to the caller rather than followed.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

/// Forward `req` to `target` and relay the response.
///
/// Only scheme and authority of the URL change. Method, path, query, body
/// and the end-to-end headers (`Host` included) pass through as received.
/// The upstream status, headers and body come back the same way.
pub async fn forward(
    client: &reqwest::Client,
    target: &RouteTarget,
    req: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let url = format!("http://{}{}", target.address, path_and_query);

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    tracing::debug!(
        service = %target.service,
        address = %target.address,
        method = %parts.method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    let upstream = client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| classify(&e, &target.address))?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    strip_hop_by_hop(&mut headers);

    let body = upstream
        .bytes()
        .await
        .map_err(|e| classify(&e, &target.address))?;

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

fn classify(err: &reqwest::Error, address: &str) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout {
            address: address.to_string(),
        }
    } else {
        ProxyError::UpstreamUnreachable {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }
}
