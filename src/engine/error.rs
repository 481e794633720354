//! Request-level failures and their HTTP rendering.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::hasher::HashError;
use crate::pool::PoolError;
use crate::provider::ProviderError;
use crate::store::{AccountId, StoreError, UniqueField};
use crate::token::TokenError;

/// One rejected input field.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// JSON body of every error response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid input")]
    Validation(Vec<FieldError>),

    #[error("The {} is already registered", .0.as_str())]
    Conflict(UniqueField),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Timed out waiting for a storage connection")]
    ResourceTimeout,

    #[error("Too many requests")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Backend unavailable: {0}")]
    Connectivity(String),

    #[error("Account {account_id} was created but its profile could not be stored")]
    ProfileWriteFailed { account_id: AccountId },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found")]
    NotFound,
}

impl AuthError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::InvalidCredentials | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ResourceTimeout | Self::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::ProfileWriteFailed { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::InvalidCredentials => "invalid_credentials",
            Self::InvalidToken => "invalid_token",
            Self::TokenExpired => "token_expired",
            Self::ResourceTimeout => "resource_timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Connectivity(_) => "unavailable",
            Self::ProfileWriteFailed { .. } => "profile_write_failed",
            Self::Internal(_) => "internal_error",
            Self::NotFound => "not_found",
        }
    }

    /// Text safe to show to the caller. Infrastructure details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            Self::ResourceTimeout | Self::Connectivity(_) => {
                "Service temporarily unavailable, try again later".to_string()
            }
            Self::Internal(_) => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let retry_after = match &self {
            Self::RateLimited {
                retry_after: Some(after),
            } => HeaderValue::from_str(&after.as_secs().to_string()).ok(),
            _ => None,
        };

        let body = ErrorBody {
            error: self.error_code().to_string(),
            message: self.public_message(),
            errors: match self {
                Self::Validation(errors) => errors,
                _ => Vec::new(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<PoolError> for AuthError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) | PoolError::Exhausted | PoolError::QueueFull(_) => {
                Self::ResourceTimeout
            }
            PoolError::Closed | PoolError::Connect(_) => Self::Connectivity(err.to_string()),
            PoolError::Config(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(field) => Self::Conflict(field),
            StoreError::Pool(err) => err.into(),
            StoreError::Unavailable(reason) => Self::Connectivity(reason),
            StoreError::Database(err) => Self::Internal(format!("database error: {err}")),
        }
    }
}

impl From<ProviderError> for AuthError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            ProviderError::AlreadyRegistered => Self::Conflict(UniqueField::Email),
            ProviderError::Rejected(reason) => {
                Self::Validation(vec![FieldError::new("account", reason)])
            }
            ProviderError::Unauthorized => Self::InvalidCredentials,
            ProviderError::Unavailable(reason) => Self::Connectivity(reason),
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Invalid => Self::InvalidToken,
            TokenError::WeakSecret | TokenError::Signing(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<HashError> for AuthError {
    fn from(err: HashError) -> Self {
        Self::Internal(err.to_string())
    }
}
