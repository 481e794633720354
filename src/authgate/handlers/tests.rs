//! Route-level tests over the in-process account store.

use crate::authgate::router;
use crate::engine::{AuthEngine, LoginResponseMode, StorageStrategy};
use crate::hasher::{CredentialHasher, MIN_COST};
use crate::pool::PoolConfig;
use crate::store::{AccountStore, MemoryAccountStore};
use crate::token::TokenIssuer;
use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderMap, Method, Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use secrecy::SecretString;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

fn app(mode: LoginResponseMode) -> Result<(Router, Arc<AuthEngine>)> {
    let store: Arc<dyn AccountStore> = Arc::new(MemoryAccountStore::new(PoolConfig::new())?);
    let engine = Arc::new(AuthEngine::new(
        StorageStrategy::DirectPool(store),
        CredentialHasher::new(MIN_COST)?,
        TokenIssuer::new(&SecretString::from(
            "handler-tests-signing-secret-0123456789".to_string(),
        ))?,
        mode,
    )?);
    Ok((router(engine.clone()), engine))
}

async fn send(app: &Router, request: Request<Body>) -> Result<Response> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    Ok(Response {
        status,
        headers,
        body,
    })
}

fn post(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn alice() -> Value {
    json!({
        "name": "Alice",
        "handle": "alice",
        "email": "alice@example.com",
        "password": "hunter22"
    })
}

#[tokio::test]
async fn signup_returns_created_summary() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;

    let response = send(&app, post("/signup", &alice())?).await?;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["name"], "Alice");
    assert_eq!(response.body["handle"], "alice");
    assert!(response.body["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(response.body.get("password").is_none());
    assert!(response.body.get("password_hash").is_none());
    assert!(response.headers.contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn signup_accepts_username_alias() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;

    let response = send(
        &app,
        post(
            "/signup",
            &json!({
                "name": "Bob",
                "username": "bobby",
                "email": "bob@example.com",
                "password": "hunter22"
            }),
        )?,
    )
    .await?;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["handle"], "bobby");
    Ok(())
}

#[tokio::test]
async fn signup_validation_and_conflict_are_bad_requests() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;

    let mut short = alice();
    short["handle"] = json!("ab");
    let response = send(&app, post("/signup", &short)?).await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "validation_error");
    assert_eq!(response.body["errors"][0]["field"], "handle");

    send(&app, post("/signup", &alice())?).await?;
    let response = send(&app, post("/signup", &alice())?).await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "conflict");
    Ok(())
}

#[tokio::test]
async fn malformed_payload_is_a_validation_error() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/signup")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))?;
    let response = send(&app, request).await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["errors"][0]["field"], "body");

    let request = Request::builder()
        .method(Method::POST)
        .uri("/login")
        .body(Body::from(alice().to_string()))?;
    let response = send(&app, request).await?;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn token_login_then_session() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;
    let created = send(&app, post("/signup", &alice())?).await?;

    let response = send(
        &app,
        post("/login", &json!({ "handle": "alice", "password": "hunter22" }))?,
    )
    .await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["token_type"], "Bearer");
    assert_eq!(response.body["expires_in"], 3600);
    let token = response.body["token"].as_str().unwrap_or_default().to_string();

    let request = Request::builder()
        .uri("/session")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, created.body);

    let response = send(&app, get("/session")?).await?;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "invalid_token");
    Ok(())
}

#[tokio::test]
async fn summary_login_returns_the_account() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Summary)?;
    let created = send(&app, post("/signup", &alice())?).await?;

    let response = send(
        &app,
        post(
            "/login",
            &json!({ "email": "alice@example.com", "password": "hunter22" }),
        )?,
    )
    .await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, created.body);
    Ok(())
}

#[tokio::test]
async fn failed_logins_look_the_same() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;
    send(&app, post("/signup", &alice())?).await?;

    let unknown = send(
        &app,
        post("/login", &json!({ "handle": "mallory", "password": "hunter22" }))?,
    )
    .await?;
    let wrong = send(
        &app,
        post("/login", &json!({ "handle": "alice", "password": "hunter23" }))?,
    )
    .await?;

    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status, wrong.status);
    assert_eq!(unknown.body, wrong.body);
    assert_eq!(unknown.body["error"], "invalid_credentials");
    Ok(())
}

#[tokio::test]
async fn profile_routes() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;
    let created = send(&app, post("/signup", &alice())?).await?;
    let id = created.body["id"].as_str().unwrap_or_default().to_string();

    let response = send(&app, get(&format!("/profile/{id}"))?).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, created.body);

    let response = send(&app, get("/profile/does-not-exist")?).await?;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.body["error"], "not_found");

    for uri in ["/profile", "/profile/"] {
        let response = send(&app, get(uri)?).await?;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(response.body["errors"][0]["field"], "id");
    }
    Ok(())
}

#[tokio::test]
async fn health_reports_pool_and_build() -> Result<()> {
    let (app, engine) = app(LoginResponseMode::Token)?;

    let response = send(&app, get("/health")?).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(response.body["mode"], "direct");
    assert_eq!(response.body["storage"], "ok");
    assert_eq!(response.body["pool"]["in_use"], 0);
    let x_app = response
        .headers
        .get("X-App")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(x_app.starts_with(&format!(
        "{}:{}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )));

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/health")
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, Value::Null);

    engine.shutdown().await;
    let response = send(&app, get("/health")?).await?;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["pool"]["closed"], true);
    Ok(())
}

#[tokio::test]
async fn root_and_request_id() -> Result<()> {
    let (app, _) = app(LoginResponseMode::Token)?;

    let request = Request::builder()
        .uri("/")
        .header("x-request-id", "01J0000000000000000000TEST")
        .body(Body::empty())?;
    let response = send(&app, request).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response
            .headers
            .get("x-request-id")
            .and_then(|value| value.to_str().ok()),
        Some("01J0000000000000000000TEST")
    );
    assert!(
        response
            .body
            .as_str()
            .is_some_and(|text| text.starts_with(env!("CARGO_PKG_NAME")))
    );
    Ok(())
}
