//! Sign-in, account and WebSocket endpoints driven through the full router.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{body_string, new_admin, test_state, PASSWORD};
use edge_gateway::server::build_router;

fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn authed(method: &str, uri: &str, bearer: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, bearer)
        .body(body)
        .unwrap()
}

#[tokio::test]
async fn test_login_returns_principal_and_bearer() {
    let state = test_state();
    state
        .admins
        .insert(new_admin("ada@example.com", "ada"))
        .await
        .unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/sessions",
            &json!({"email": "ADA@example.com ", "password": PASSWORD}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let bearer = response
        .headers()
        .get(header::AUTHORIZATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(bearer.starts_with("Bearer "));

    let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
    let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        ["email", "firstName", "id", "lastName", "photoURL", "userName"]
    );
    assert_eq!(body["email"], "ada@example.com");
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let state = test_state();
    state
        .admins
        .insert(new_admin("ada@example.com", "ada"))
        .await
        .unwrap();
    let app = build_router(state);

    for body in [
        json!({"email": "ada@example.com", "password": "wrong password"}),
        json!({"email": "nobody@example.com", "password": PASSWORD}),
        json!({"password": PASSWORD}),
    ] {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/sessions", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(response).await, "Invalid credentials");
    }

    let response = app
        .oneshot(
            Request::post("/v1/sessions")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_string(response)
        .await
        .starts_with("Error decoding request body: "));
}

#[tokio::test]
async fn test_account_lifecycle() {
    let app = build_router(test_state());

    // Sign up starts a session.
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/admins",
            &json!({
                "email": "grace@example.com",
                "password": PASSWORD,
                "passwordConf": PASSWORD,
                "userName": "grace",
                "firstName": "Grace",
                "lastName": "Hopper",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bearer = response
        .headers()
        .get(header::AUTHORIZATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // The session resolves to the new account.
    let response = app
        .clone()
        .oneshot(authed("GET", "/v1/admins/me", &bearer, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let me: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(me["userName"], "grace");

    // Renaming updates what the session returns.
    let response = app
        .clone()
        .oneshot(authed(
            "PATCH",
            "/v1/admins/me",
            &bearer,
            Body::from(json!({"firstName": "Rear Admiral", "lastName": "Hopper"}).to_string()),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .clone()
        .oneshot(authed("GET", "/v1/admins/me", &bearer, Body::empty()))
        .await
        .unwrap();
    let me: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(me["firstName"], "Rear Admiral");

    // Sign out, after which the token is dead.
    let response = app
        .clone()
        .oneshot(authed("DELETE", "/v1/sessions/mine", &bearer, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Signed out");

    let response = app
        .oneshot(authed("GET", "/v1/admins/me", &bearer, Body::empty()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(body_string(response)
        .await
        .starts_with("Error getting session state: "));
}

#[tokio::test]
async fn test_signup_rejections() {
    let state = test_state();
    state
        .admins
        .insert(new_admin("ada@example.com", "ada"))
        .await
        .unwrap();
    let app = build_router(state);

    let signup = |email: &str, user_name: &str, password_conf: &str| {
        json!({
            "email": email,
            "password": PASSWORD,
            "passwordConf": password_conf,
            "userName": user_name,
            "firstName": "Test",
            "lastName": "User",
        })
    };

    let cases = [
        (
            signup("ada@example.com", "someone", PASSWORD),
            "Admin with the same email already exists",
        ),
        (
            signup("other@example.com", "ada", PASSWORD),
            "Admin with the same username already exists",
        ),
        (
            signup("other@example.com", "other", "mismatch"),
            "Error validating new admin: Password must match password confirmation",
        ),
    ];

    for (body, expected) in cases {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/admins", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, expected);
    }
}

#[tokio::test]
async fn test_sign_out_requires_session() {
    let app = build_router(test_state());
    let response = app
        .oneshot(
            Request::delete("/v1/sessions/mine")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_websocket_requires_session() {
    let app = build_router(test_state());

    let response = app
        .clone()
        .oneshot(
            Request::get("/v1/ws")
                .header(header::CONNECTION, "upgrade")
                .header(header::UPGRADE, "websocket")
                .header(header::SEC_WEBSOCKET_VERSION, "13")
                .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(
            Request::get("/v1/ws?auth=Bearer%20forged")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_and_method_not_allowed() {
    let app = build_router(test_state());

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["services"], 0);

    let response = app
        .oneshot(Request::get("/v1/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
