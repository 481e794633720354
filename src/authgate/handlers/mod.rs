//! HTTP handlers. Each one unpacks the request, calls the engine and lets
//! [`AuthError`](crate::engine::AuthError) render failures.

pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod profile;
pub use self::profile::{profile, profile_missing_id};

pub mod root;
pub use self::root::root;

pub mod session;
pub use self::session::session;

pub mod signup;
pub use self::signup::signup;

use crate::engine::{AuthError, FieldError};
use axum::extract::rejection::JsonRejection;

/// Unreadable or non-JSON bodies are a validation failure on `body`.
pub(crate) fn rejected_payload(rejection: &JsonRejection) -> AuthError {
    AuthError::Validation(vec![FieldError::new("body", rejection.body_text())])
}

#[cfg(test)]
mod tests;
