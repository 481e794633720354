//! Request/response types for the engine operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::store::AccountSummary;

#[derive(ToSchema, Serialize, Deserialize, Default, Clone)]
pub struct SignupRequest {
    pub name: Option<String>,
    /// Unique login handle; `username` is accepted as an alias.
    #[serde(alias = "username")]
    pub handle: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SignupRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignupRequest")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Exactly one of `handle` (alias `username`) or `email` identifies the account.
#[derive(ToSchema, Serialize, Deserialize, Default, Clone)]
pub struct LoginRequest {
    #[serde(alias = "username")]
    pub handle: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("handle", &self.handle)
            .field("email", &self.email)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: u64,
}

/// Body of a successful login, shaped by the configured response mode.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum LoginResponse {
    Token(TokenResponse),
    Summary(AccountSummary),
}
