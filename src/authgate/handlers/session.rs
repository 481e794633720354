use crate::engine::{AuthEngine, AuthError, ErrorBody};
use crate::store::AccountSummary;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, header::AUTHORIZATION},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    get,
    path= "/session",
    responses (
        (status = 200, description = "The account the bearer token was issued for", body = AccountSummary, content_type = "application/json"),
        (status = 401, description = "Missing, invalid or expired token", body = ErrorBody),
    ),
    tag= "authgate"
)]
#[instrument(skip(engine, headers))]
pub async fn session(
    engine: Extension<Arc<AuthEngine>>,
    headers: HeaderMap,
) -> Result<Json<AccountSummary>, AuthError> {
    let token = bearer_token(&headers).ok_or(AuthError::InvalidToken)?;

    Ok(Json(engine.session(token).await?))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
