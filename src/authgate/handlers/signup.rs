use crate::authgate::handlers::rejected_payload;
use crate::engine::{AuthEngine, AuthError, ErrorBody, SignupRequest};
use crate::store::AccountSummary;
use axum::{
    Json, extract::Extension, extract::rejection::JsonRejection, http::StatusCode,
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    post,
    path= "/signup",
    request_body = SignupRequest,
    responses (
        (status = 201, description = "Account created", body = AccountSummary, content_type = "application/json"),
        (status = 400, description = "Invalid input, or the handle or email is already registered", body = ErrorBody),
        (status = 429, description = "Identity provider is throttling sign-ups", body = ErrorBody),
        (status = 500, description = "Internal error", body = ErrorBody),
        (status = 503, description = "Storage unavailable", body = ErrorBody),
    ),
    tag= "authgate"
)]
#[instrument(skip(engine, payload))]
pub async fn signup(
    engine: Extension<Arc<AuthEngine>>,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountSummary>), AuthError> {
    let Json(request) = payload.map_err(|rejection| rejected_payload(&rejection))?;

    let summary = engine.register(request).await?;

    Ok((StatusCode::CREATED, Json(summary)))
}
