//! Stateless session tokens.
//!
//! Tokens are HS256 JWTs binding an account id (`sub`) to an expiry one hour
//! after issue. Nothing is stored server-side: a token is valid until `exp`
//! and there is no revocation list.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

use crate::store::AccountId;

/// Lifetime of every issued token.
pub const SESSION_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Shortest signing secret accepted at startup.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("signing secret must be at least {MIN_SECRET_LEN} bytes")]
    WeakSecret,
    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

/// A freshly issued token and when it stops being accepted.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: u64,
    pub expires_in: u64,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &Algorithm::HS256)
            .field("ttl", &SESSION_TOKEN_TTL)
            .finish_non_exhaustive()
    }
}

pub(crate) fn now_unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TokenIssuer {
    /// Build the issuer from the process-wide signing secret.
    ///
    /// # Errors
    /// Returns `TokenError::WeakSecret` if the secret is shorter than
    /// [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &SecretString) -> Result<Self, TokenError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(TokenError::WeakSecret);
        }

        // Expiry is checked by hand against an explicit clock; see `validate_at`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        })
    }

    /// Issue a token for `account_id`, valid for [`SESSION_TOKEN_TTL`].
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue(&self, account_id: &AccountId) -> Result<IssuedToken, TokenError> {
        self.issue_at(account_id, now_unix_seconds())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// Returns `TokenError::Signing` if the claims cannot be encoded.
    pub fn issue_at(&self, account_id: &AccountId, now: u64) -> Result<IssuedToken, TokenError> {
        let ttl = SESSION_TOKEN_TTL.as_secs();
        let claims = SessionClaims {
            sub: account_id.as_str().to_string(),
            iat: now,
            exp: now + ttl,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(TokenError::Signing)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
            expires_in: ttl,
        })
    }

    /// Resolve a token to the account it was issued for.
    ///
    /// # Errors
    /// `TokenError::Expired` once the expiry has passed, `TokenError::Invalid`
    /// for anything that fails signature or shape checks.
    pub fn validate(&self, token: &str) -> Result<AccountId, TokenError> {
        self.validate_at(token, now_unix_seconds())
    }

    /// [`Self::validate`] against an explicit clock. A token issued at `T`
    /// is accepted for `now` in `[T, T + ttl)`.
    ///
    /// # Errors
    /// See [`Self::validate`].
    pub fn validate_at(&self, token: &str, now: u64) -> Result<AccountId, TokenError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;

        if now >= data.claims.exp {
            return Err(TokenError::Expired);
        }
        if data.claims.sub.is_empty() {
            return Err(TokenError::Invalid);
        }

        Ok(AccountId::new(data.claims.sub))
    }
}
