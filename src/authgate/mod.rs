#![allow(clippy::needless_for_each)]

use crate::authgate::handlers::{
    health, health::__path_health, login, login::__path_login, profile, profile::__path_profile,
    session::__path_session, signup::__path_signup,
};
use crate::engine::{
    AuthEngine, ErrorBody, FieldError, LoginRequest, LoginResponse, SignupRequest, TokenResponse,
};
use crate::pool::PoolStatus;
use crate::store::AccountSummary;
use anyhow::Result;
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(health, signup, login, profile, session),
    components(
        schemas(
            health::Health,
            PoolStatus,
            SignupRequest,
            LoginRequest,
            LoginResponse,
            TokenResponse,
            AccountSummary,
            ErrorBody,
            FieldError
        )
    ),
    tags(
        (name = "authgate", description = "Credential authentication API"),
        (name = "health", description = "Service health"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the application router around a ready engine.
#[must_use]
pub fn router(engine: Arc<AuthEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    Router::new()
        .route("/", get(handlers::root))
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/profile", get(handlers::profile_missing_id))
        .route("/profile/", get(handlers::profile_missing_id))
        .route("/profile/{id}", get(handlers::profile))
        .route("/session", get(handlers::session))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(engine.clone())),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(engine))
}

/// Serve until SIGINT/SIGTERM, then close the engine's pool.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, engine: Arc<AuthEngine>) -> Result<()> {
    let app = router(engine.clone());

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Gracefully shutdown");
    engine.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = signal::ctrl_c() => info!("Received Ctrl+C"),
                }
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {err}");
                let _ = signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
