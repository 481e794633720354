//! Account persistence.
//!
//! Every store leases its connections from a [`ResourcePool`], so the
//! engine's concurrency is bounded by the pool no matter which backend is
//! plugged in.
//!
//! [`ResourcePool`]: crate::pool::ResourcePool

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryAccountStore;
pub use self::postgres::{PgAccountStore, PgConnector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

use crate::hasher::HashedSecret;
use crate::pool::{PoolError, PoolStatus};

/// Opaque, server-generated account identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which unique attribute a write collided with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniqueField {
    Handle,
    Email,
    Id,
}

impl UniqueField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handle => "handle",
            Self::Email => "email",
            Self::Id => "id",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} already registered", .0.as_str())]
    Conflict(UniqueField),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Attributes of an account about to be written.
#[derive(Clone, Debug)]
pub struct NewAccount {
    pub name: String,
    pub handle: String,
    pub email: String,
    /// `None` for profiles whose credentials live with the identity provider.
    pub password_hash: Option<HashedSecret>,
}

/// A stored account.
#[derive(Clone, Debug)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub handle: String,
    pub email: String,
    pub password_hash: Option<HashedSecret>,
}

/// Public view of an account.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountSummary {
    pub name: String,
    pub id: String,
    pub handle: String,
}

impl From<&Account> for AccountSummary {
    fn from(account: &Account) -> Self {
        Self {
            name: account.name.clone(),
            id: account.id.as_str().to_string(),
            handle: account.handle.clone(),
        }
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert an account and return it with its generated id.
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    /// Insert a profile row keyed by an id issued elsewhere.
    async fn insert_profile(&self, id: &AccountId, account: &NewAccount)
    -> Result<Account, StoreError>;

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// First unique attribute among `handle` and `email` already in use, if any.
    async fn identity_taken(
        &self,
        handle: &str,
        email: &str,
    ) -> Result<Option<UniqueField>, StoreError>;

    /// Round-trip to the backend through a pooled connection.
    async fn ping(&self) -> Result<(), StoreError>;

    fn pool_status(&self) -> PoolStatus;

    /// Release every pooled connection. Further calls fail with `Closed`.
    async fn close(&self);
}
