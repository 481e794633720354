use crate::engine::{AuthEngine, AuthError, ErrorBody};
use crate::store::AccountSummary;
use axum::{
    Json,
    extract::{Extension, Path},
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    get,
    path= "/profile/{id}",
    params(
        ("id" = String, Path, description = "Account id")
    ),
    responses (
        (status = 200, description = "Account summary", body = AccountSummary, content_type = "application/json"),
        (status = 400, description = "Missing id", body = ErrorBody),
        (status = 404, description = "No account with this id", body = ErrorBody),
    ),
    tag= "authgate"
)]
#[instrument(skip(engine))]
pub async fn profile(
    engine: Extension<Arc<AuthEngine>>,
    Path(id): Path<String>,
) -> Result<Json<AccountSummary>, AuthError> {
    Ok(Json(engine.profile(&id).await?))
}

// `/profile` and `/profile/`
pub async fn profile_missing_id(
    engine: Extension<Arc<AuthEngine>>,
) -> Result<Json<AccountSummary>, AuthError> {
    Ok(Json(engine.profile("").await?))
}
