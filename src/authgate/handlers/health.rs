//! `/health`: build metadata plus a storage round-trip through the pool.

use crate::GIT_COMMIT_HASH;
use crate::engine::AuthEngine;
use crate::pool::PoolStatus;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration, timeout};
use tracing::{debug, error, warn};
use utoipa::ToSchema;

const HEALTH_PROBE_TIMEOUT_SECONDS: u64 = 2;

#[derive(ToSchema, Serialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    mode: String,
    storage: String,
    pool: PoolStatus,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Storage is reachable", body = Health),
        (status = 503, description = "Storage is unreachable or the pool is closed", body = Health)
    ),
    tag = "health",
)]
/// Report build metadata, pool counters and storage reachability.
pub async fn health(method: Method, engine: Extension<Arc<AuthEngine>>) -> impl IntoResponse {
    let healthy = probe_storage(&engine).await;
    let pool = engine.pool_status();
    let healthy = healthy && !pool.closed;

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        mode: engine.strategy().name().to_string(),
        storage: if healthy {
            "ok".to_string()
        } else {
            "error".to_string()
        },
        pool,
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            debug!("Failed to parse X-App header: {}", err);
        })
        .unwrap_or_else(|()| HeaderMap::new());

    if healthy {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

async fn probe_storage(engine: &AuthEngine) -> bool {
    match timeout(
        Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECONDS),
        engine.ping(),
    )
    .await
    {
        Ok(Ok(())) => {
            debug!("Storage is healthy");
            true
        }
        Ok(Err(err)) => {
            error!("Storage ping failed: {}", err);
            false
        }
        Err(_) => {
            warn!("Storage health check timed out");
            false
        }
    }
}
