//! The authentication engine.
//!
//! One engine serves both storage modes. Every operation walks the same
//! states and emits a `debug!` event on each transition:
//!
//! ```text
//! Validating -> Hashing | Delegating -> Persisting -> (Issuing) -> Complete
//!                                                    \-> Failed(kind)
//! ```
//!
//! In direct mode accounts and their bcrypt hashes live in the
//! [`AccountStore`]. In delegated mode the [`IdentityProvider`] owns
//! credentials and the store only keeps profile rows keyed by the provider's
//! account id.
//!
//! Pooled connections are held by RAII guards inside the store calls, so a
//! slot is released on every path out of an operation, including errors and
//! cancelled requests.

pub mod error;
pub mod types;
mod validation;

pub use self::error::{AuthError, ErrorBody, FieldError};
pub use self::types::{LoginRequest, LoginResponse, SignupRequest, TokenResponse};
pub use self::validation::{MIN_HANDLE_LEN, MIN_PASSWORD_LEN};

use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use self::validation::{LoginIdentifier, ValidLogin, ValidSignup, validate_login, validate_signup};
use crate::hasher::{CredentialHasher, HashError, HashedSecret};
use crate::pool::PoolStatus;
use crate::provider::IdentityProvider;
use crate::store::{Account, AccountId, AccountStore, AccountSummary, NewAccount, StoreError};
use crate::token::TokenIssuer;

/// Where account truth lives.
#[derive(Clone)]
pub enum StorageStrategy {
    /// Accounts and password hashes in the pooled store.
    DirectPool(Arc<dyn AccountStore>),
    /// Credentials at the provider, profile rows in the pooled store.
    DelegatedProvider {
        provider: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn AccountStore>,
    },
}

impl StorageStrategy {
    fn store(&self) -> &Arc<dyn AccountStore> {
        match self {
            Self::DirectPool(store) => store,
            Self::DelegatedProvider { profiles, .. } => profiles,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DirectPool(_) => "direct",
            Self::DelegatedProvider { .. } => "delegated",
        }
    }
}

impl fmt::Debug for StorageStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a successful login returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginResponseMode {
    /// `{token, token_type, expires_in}`
    Token,
    /// `{name, id, handle}`
    Summary,
}

impl LoginResponseMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Summary => "summary",
        }
    }
}

impl FromStr for LoginResponseMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "summary" => Ok(Self::Summary),
            other => Err(format!(
                "invalid login response mode '{other}', expected 'token' or 'summary'"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Validating,
    Hashing,
    Delegating,
    Persisting,
    Verifying,
    Issuing,
    Complete,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Hashing => "hashing",
            Self::Delegating => "delegating",
            Self::Persisting => "persisting",
            Self::Verifying => "verifying",
            Self::Issuing => "issuing",
            Self::Complete => "complete",
        }
    }
}

fn enter(operation: &'static str, stage: Stage) {
    debug!(operation, state = stage.as_str(), "auth state");
}

fn failed(operation: &'static str, err: &AuthError) {
    debug!(operation, state = "failed", kind = err.error_code(), "auth state");
}

// Verified against when the account does not exist, so unknown handles cost
// the same bcrypt work as wrong passwords.
const DUMMY_SECRET: &str = "authgate-dummy-credential";

pub struct AuthEngine {
    strategy: StorageStrategy,
    hasher: CredentialHasher,
    tokens: TokenIssuer,
    login_response: LoginResponseMode,
    dummy_hash: HashedSecret,
}

impl fmt::Debug for AuthEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthEngine")
            .field("strategy", &self.strategy)
            .field("hasher", &self.hasher)
            .field("login_response", &self.login_response)
            .finish_non_exhaustive()
    }
}

impl AuthEngine {
    /// # Errors
    /// Returns `HashError` if the dummy hash used for unknown accounts cannot
    /// be computed.
    pub fn new(
        strategy: StorageStrategy,
        hasher: CredentialHasher,
        tokens: TokenIssuer,
        login_response: LoginResponseMode,
    ) -> Result<Self, HashError> {
        let dummy_hash = hasher.hash(&SecretString::from(DUMMY_SECRET.to_string()))?;
        Ok(Self {
            strategy,
            hasher,
            tokens,
            login_response,
            dummy_hash,
        })
    }

    #[must_use]
    pub fn strategy(&self) -> &StorageStrategy {
        &self.strategy
    }

    #[must_use]
    pub fn login_response(&self) -> LoginResponseMode {
        self.login_response
    }

    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.strategy.store().pool_status()
    }

    /// Round-trip to storage through the pool.
    ///
    /// # Errors
    /// Returns the storage failure mapped to an `AuthError`.
    pub async fn ping(&self) -> Result<(), AuthError> {
        Ok(self.strategy.store().ping().await?)
    }

    /// Close the storage pool; pending and future requests fail fast.
    pub async fn shutdown(&self) {
        self.strategy.store().close().await;
    }

    /// Register a new account.
    ///
    /// # Errors
    /// `Validation` for bad input (nothing is written), `Conflict` when the
    /// handle or email is taken, `RateLimited` when the provider throttles,
    /// `ProfileWriteFailed` when a delegated account could not be mirrored
    /// locally, and infrastructure errors.
    #[instrument(skip(self, request), fields(mode = self.strategy.name()))]
    pub async fn register(&self, request: SignupRequest) -> Result<AccountSummary, AuthError> {
        let result = self.register_inner(request).await;
        if let Err(err) = &result {
            failed("register", err);
        }
        result
    }

    async fn register_inner(&self, request: SignupRequest) -> Result<AccountSummary, AuthError> {
        enter("register", Stage::Validating);
        let signup = validate_signup(request).map_err(AuthError::Validation)?;

        let account = match &self.strategy {
            StorageStrategy::DirectPool(store) => {
                self.register_direct(store.as_ref(), signup).await?
            }
            StorageStrategy::DelegatedProvider { provider, profiles } => {
                self.register_delegated(provider.as_ref(), profiles.as_ref(), signup)
                    .await?
            }
        };

        enter("register", Stage::Complete);
        Ok(AccountSummary::from(&account))
    }

    async fn register_direct(
        &self,
        store: &dyn AccountStore,
        signup: ValidSignup,
    ) -> Result<Account, AuthError> {
        enter("register", Stage::Hashing);
        let hash = self.hasher.hash_blocking(signup.password).await?;

        enter("register", Stage::Persisting);
        let account = store
            .insert_account(&NewAccount {
                name: signup.name,
                handle: signup.handle,
                email: signup.email,
                password_hash: Some(hash),
            })
            .await?;

        debug!(account_id = %account.id, "account created");
        Ok(account)
    }

    async fn register_delegated(
        &self,
        provider: &dyn IdentityProvider,
        profiles: &dyn AccountStore,
        signup: ValidSignup,
    ) -> Result<Account, AuthError> {
        enter("register", Stage::Delegating);
        // The provider cannot see local handles, so collisions are caught here
        // before an external account exists.
        if let Some(field) = profiles
            .identity_taken(&signup.handle, &signup.email)
            .await?
        {
            return Err(AuthError::Conflict(field));
        }

        let external = provider
            .delegate_sign_up(&signup.email, &signup.password)
            .await?;
        let account_id = AccountId::new(external.id);

        enter("register", Stage::Persisting);
        let profile = NewAccount {
            name: signup.name,
            handle: signup.handle,
            email: signup.email,
            password_hash: None,
        };

        match profiles.insert_profile(&account_id, &profile).await {
            Ok(account) => {
                debug!(account_id = %account.id, "profile created");
                Ok(account)
            }
            Err(err) => {
                error!(
                    account_id = %account_id,
                    name = %profile.name,
                    handle = %profile.handle,
                    email = %profile.email,
                    error = %err,
                    "External account created but profile write failed, manual reconciliation required"
                );
                match err {
                    StoreError::Conflict(field) => Err(AuthError::Conflict(field)),
                    _ => Err(AuthError::ProfileWriteFailed { account_id }),
                }
            }
        }
    }

    /// Authenticate and respond according to the configured
    /// [`LoginResponseMode`].
    ///
    /// # Errors
    /// `Validation` for bad input and `InvalidCredentials` for both unknown
    /// accounts and wrong passwords, plus throttling and infrastructure
    /// errors.
    #[instrument(skip(self, request), fields(mode = self.strategy.name()))]
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse, AuthError> {
        let result = self.login_inner(request).await;
        if let Err(err) = &result {
            failed("login", err);
        }
        result
    }

    async fn login_inner(&self, request: LoginRequest) -> Result<LoginResponse, AuthError> {
        enter("login", Stage::Validating);
        let login = validate_login(request).map_err(AuthError::Validation)?;

        let account_id = match &self.strategy {
            StorageStrategy::DirectPool(store) => self.verify_direct(store.as_ref(), login).await?,
            StorageStrategy::DelegatedProvider { provider, profiles } => {
                self.verify_delegated(provider.as_ref(), profiles.as_ref(), login)
                    .await?
            }
        };

        enter("login", Stage::Issuing);
        let response = match self.login_response {
            LoginResponseMode::Token => LoginResponse::Token(self.token_response(&account_id)?),
            LoginResponseMode::Summary => {
                let Some(account) = self.strategy.store().find_by_id(&account_id).await? else {
                    warn!(account_id = %account_id, "authenticated account has no profile");
                    return Err(AuthError::Internal(format!(
                        "no profile stored for account {account_id}"
                    )));
                };
                LoginResponse::Summary(AccountSummary::from(&account))
            }
        };

        enter("login", Stage::Complete);
        Ok(response)
    }

    async fn lookup(
        store: &dyn AccountStore,
        identifier: &LoginIdentifier,
    ) -> Result<Option<Account>, StoreError> {
        match identifier {
            LoginIdentifier::Handle(handle) => store.find_by_handle(handle).await,
            LoginIdentifier::Email(email) => store.find_by_email(email).await,
        }
    }

    async fn verify_direct(
        &self,
        store: &dyn AccountStore,
        login: ValidLogin,
    ) -> Result<AccountId, AuthError> {
        let account = Self::lookup(store, &login.identifier).await?;

        enter("login", Stage::Verifying);
        let (hash, account_id) = match account {
            Some(Account {
                id,
                password_hash: Some(hash),
                ..
            }) => (hash, Some(id)),
            _ => (self.dummy_hash.clone(), None),
        };

        let verified = self.hasher.verify_blocking(login.password, hash).await?;
        match account_id {
            Some(account_id) if verified => Ok(account_id),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn verify_delegated(
        &self,
        provider: &dyn IdentityProvider,
        profiles: &dyn AccountStore,
        login: ValidLogin,
    ) -> Result<AccountId, AuthError> {
        // The provider signs in by email only.
        let email = match login.identifier {
            LoginIdentifier::Email(email) => email,
            LoginIdentifier::Handle(handle) => {
                match profiles.find_by_handle(&handle).await? {
                    Some(account) => account.email,
                    None => return Err(AuthError::InvalidCredentials),
                }
            }
        };

        enter("login", Stage::Delegating);
        let session = provider.delegate_sign_in(&email, &login.password).await?;
        Ok(AccountId::new(session.account_id))
    }

    /// Look up the public profile of an account.
    ///
    /// # Errors
    /// `Validation` for an empty id, `NotFound` when no account matches.
    #[instrument(skip(self))]
    pub async fn profile(&self, id: &str) -> Result<AccountSummary, AuthError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(AuthError::Validation(vec![FieldError::new(
                "id",
                "is required",
            )]));
        }

        self.strategy
            .store()
            .find_by_id(&AccountId::new(id.to_string()))
            .await?
            .map(|account| AccountSummary::from(&account))
            .ok_or(AuthError::NotFound)
    }

    /// Resolve a session token to the account it was issued for.
    ///
    /// # Errors
    /// `TokenExpired` or `InvalidToken`; an account that no longer exists is
    /// also `InvalidToken`.
    #[instrument(skip(self, token))]
    pub async fn session(&self, token: &str) -> Result<AccountSummary, AuthError> {
        let account_id = self.tokens.validate(token)?;
        self.strategy
            .store()
            .find_by_id(&account_id)
            .await?
            .map(|account| AccountSummary::from(&account))
            .ok_or(AuthError::InvalidToken)
    }

    fn token_response(&self, account_id: &AccountId) -> Result<TokenResponse, AuthError> {
        let issued = self.tokens.issue(account_id)?;
        Ok(TokenResponse {
            token: issued.token,
            token_type: "Bearer".to_string(),
            expires_in: issued.expires_in,
        })
    }
}

#[cfg(test)]
mod tests;
