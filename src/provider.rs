//! Delegated identity verification.
//!
//! In delegated mode the external identity provider owns account creation and
//! password verification. The engine only talks to it through
//! [`IdentityProvider`]; [`HttpIdentityProvider`] speaks the GoTrue-style REST
//! API (`/auth/v1/signup`, `/auth/v1/token?grant_type=password`).

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, debug, info_span, instrument, warn};
use url::Url;

use crate::APP_USER_AGENT;

/// Upper bound for a single provider round trip.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("identity provider is rate limiting requests")]
    RateLimited { retry_after: Option<Duration> },
    #[error("identity provider already has an account for this email")]
    AlreadyRegistered,
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),
    #[error("identity provider refused the credentials")]
    Unauthorized,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Account created by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAccount {
    pub id: String,
    pub email: String,
}

/// Result of a successful delegated sign-in.
#[derive(Debug)]
pub struct ExternalSession {
    pub account_id: String,
    pub access_token: SecretString,
    pub expires_in: Option<u64>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account at the provider.
    async fn delegate_sign_up(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalAccount, ProviderError>;

    /// Verify credentials at the provider.
    async fn delegate_sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalSession, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignUpBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user: Option<ProviderUser>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
    user: ProviderUser,
}

pub struct HttpIdentityProvider {
    client: Client,
    base_url: Url,
    api_key: SecretString,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpIdentityProvider {
    /// # Errors
    /// Returns `ProviderError::Unavailable` if the HTTP client cannot be built.
    pub fn new(base_url: Url, api_key: SecretString) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        // `join` would drop the last segment of a base URL without a trailing slash.
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{path}"))
            .map_err(|err| ProviderError::Unavailable(format!("invalid provider url: {err}")))
    }

    async fn post(&self, url: Url, body: Value) -> Result<reqwest::Response, ProviderError> {
        let span = info_span!(
            "provider.request",
            http.method = "POST",
            url.path = url.path()
        );
        self.client
            .post(url)
            .header("apikey", self.api_key.expose_secret())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .instrument(span)
            .await
            .map_err(|err| {
                warn!("identity provider request failed: {err}");
                ProviderError::Unavailable(err.to_string())
            })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, password))]
    async fn delegate_sign_up(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalAccount, ProviderError> {
        let url = self.endpoint("/auth/v1/signup")?;
        let response = self
            .post(
                url,
                json!({ "email": email, "password": password.expose_secret() }),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let detail = error_detail(response).await;
            return Err(sign_up_error(status, retry_after, detail));
        }

        let body: SignUpBody = response
            .json()
            .await
            .map_err(|err| ProviderError::Unavailable(format!("malformed sign-up response: {err}")))?;

        let account = match (body.user, body.id) {
            (Some(user), _) => ExternalAccount {
                id: user.id,
                email: user.email.unwrap_or_else(|| email.to_string()),
            },
            (None, Some(id)) => ExternalAccount {
                id,
                email: body.email.unwrap_or_else(|| email.to_string()),
            },
            (None, None) => {
                return Err(ProviderError::Unavailable(
                    "sign-up response carried no account id".to_string(),
                ));
            }
        };

        debug!(account_id = %account.id, "delegated sign-up accepted");
        Ok(account)
    }

    #[instrument(skip(self, password))]
    async fn delegate_sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<ExternalSession, ProviderError> {
        let mut url = self.endpoint("/auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");

        let response = self
            .post(
                url,
                json!({ "email": email, "password": password.expose_secret() }),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let detail = error_detail(response).await;
            return Err(sign_in_error(status, retry_after, detail.reason));
        }

        let body: TokenBody = response
            .json()
            .await
            .map_err(|err| ProviderError::Unavailable(format!("malformed token response: {err}")))?;

        Ok(ExternalSession {
            account_id: body.user.id,
            access_token: SecretString::from(body.access_token),
            expires_in: body.expires_in,
        })
    }
}

/// Error code and message pulled from a provider error body.
#[derive(Debug, Default)]
struct ErrorDetail {
    code: Option<String>,
    reason: String,
}

impl ErrorDetail {
    /// GoTrue answers a second sign-up for the same email with
    /// `user_already_exists` (older releases only send the message).
    fn is_duplicate_account(&self) -> bool {
        if self
            .code
            .as_deref()
            .is_some_and(|code| matches!(code, "user_already_exists" | "email_exists"))
        {
            return true;
        }
        let reason = self.reason.to_ascii_lowercase();
        reason.contains("already registered") || reason.contains("already exists")
    }
}

fn sign_up_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    detail: ErrorDetail,
) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::RateLimited { retry_after }
    } else if status.is_client_error() && detail.is_duplicate_account() {
        ProviderError::AlreadyRegistered
    } else if status.is_client_error() {
        ProviderError::Rejected(detail.reason)
    } else {
        ProviderError::Unavailable(format!("{status}: {}", detail.reason))
    }
}

fn sign_in_error(status: StatusCode, retry_after: Option<Duration>, reason: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after },
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => ProviderError::Unauthorized,
        _ if status.is_client_error() => ProviderError::Rejected(reason),
        _ => ProviderError::Unavailable(format!("{status}: {reason}")),
    }
}

/// `Retry-After` in its delta-seconds form. HTTP dates are ignored.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_detail(response: reqwest::Response) -> ErrorDetail {
    let status = response.status();
    let Ok(body) = response.json::<Value>().await else {
        return ErrorDetail {
            code: None,
            reason: status.to_string(),
        };
    };

    let reason = ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map_or_else(|| status.to_string(), str::to_string);

    ErrorDetail {
        code: body
            .get("error_code")
            .and_then(Value::as_str)
            .map(str::to_string),
        reason,
    }
}
