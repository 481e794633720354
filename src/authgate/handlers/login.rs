use crate::authgate::handlers::rejected_payload;
use crate::engine::{AuthEngine, AuthError, ErrorBody, LoginRequest, LoginResponse};
use axum::{Json, extract::Extension, extract::rejection::JsonRejection};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Authenticated; a token or the account summary depending on configuration", body = LoginResponse, content_type = "application/json"),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Identity provider is throttling sign-ins", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody),
    ),
    tag= "authgate"
)]
#[instrument(skip(engine, payload))]
pub async fn login(
    engine: Extension<Arc<AuthEngine>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let Json(request) = payload.map_err(|rejection| rejected_payload(&rejection))?;

    Ok(Json(engine.login(request).await?))
}
