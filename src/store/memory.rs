//! In-process account store.
//!
//! Accounts live in a shared table, but every operation still leases a
//! connection from a [`ResourcePool`], so pool limits, queueing and release
//! behave exactly as with the database store. Used by the test suites; the
//! latency and failure hooks need the `test-support` feature outside this
//! crate's own tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::Duration;
use uuid::Uuid;

use super::{Account, AccountId, AccountStore, NewAccount, StoreError, UniqueField};
use crate::pool::{Connector, PoolConfig, PoolError, PoolStatus, ResourcePool, Slot};

#[derive(Default)]
struct Table {
    accounts: HashMap<String, Account>,
}

impl Table {
    fn taken(&self, id: Option<&str>, handle: &str, email: &str) -> Option<UniqueField> {
        if id.is_some_and(|id| self.accounts.contains_key(id)) {
            return Some(UniqueField::Id);
        }
        self.accounts.values().find_map(|account| {
            if account.handle == handle {
                Some(UniqueField::Handle)
            } else if account.email == email {
                Some(UniqueField::Email)
            } else {
                None
            }
        })
    }

    fn insert(&mut self, account: Account) -> Result<Account, StoreError> {
        if let Some(field) = self.taken(Some(account.id.as_str()), &account.handle, &account.email)
        {
            return Err(StoreError::Conflict(field));
        }
        self.accounts
            .insert(account.id.as_str().to_string(), account.clone());
        Ok(account)
    }
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    table: Arc<Mutex<Table>>,
}

/// Handle onto the shared table, leased through the pool.
pub struct MemoryConnection {
    table: Arc<Mutex<Table>>,
}

impl MemoryConnection {
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, PoolError> {
        Ok(MemoryConnection {
            table: Arc::clone(&self.table),
        })
    }
}

pub struct MemoryAccountStore {
    pool: ResourcePool<MemoryConnector>,
    latency: Duration,
    fail_profile_writes: AtomicBool,
    writes: AtomicUsize,
}

impl std::fmt::Debug for MemoryAccountStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAccountStore")
            .field("pool", &self.pool)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl MemoryAccountStore {
    /// # Errors
    /// Returns `PoolError::Config` if the pool configuration is invalid.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            pool: ResourcePool::new(MemoryConnector::default(), config)?,
            latency: Duration::ZERO,
            fail_profile_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        })
    }

    /// Hold every leased connection for `latency` before touching the table.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make `insert_profile` fail as if the backend went away.
    #[cfg(any(test, feature = "test-support"))]
    pub fn fail_profile_writes(&self, fail: bool) {
        self.fail_profile_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert attempts that reached the table.
    #[cfg(any(test, feature = "test-support"))]
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn account_count(&self) -> usize {
        self.pool.connector().table.lock().map_or(0, |table| table.accounts.len())
    }

    async fn lease(&self) -> Result<Slot<MemoryConnector>, StoreError> {
        let slot = self.pool.acquire().await?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(slot)
    }

    async fn find<F>(&self, predicate: F) -> Result<Option<Account>, StoreError>
    where
        F: Fn(&Account) -> bool + Send,
    {
        let slot = self.lease().await?;
        let found = slot
            .table()
            .accounts
            .values()
            .find(|account| predicate(account))
            .cloned();
        Ok(found)
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let slot = self.lease().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut table = slot.table();
        table.insert(Account {
            id: AccountId::new(Uuid::new_v4().to_string()),
            name: account.name.clone(),
            handle: account.handle.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
        })
    }

    async fn insert_profile(
        &self,
        id: &AccountId,
        account: &NewAccount,
    ) -> Result<Account, StoreError> {
        let slot = self.lease().await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            slot.discard();
            return Err(StoreError::Unavailable("connection reset by peer".to_string()));
        }
        let mut table = slot.table();
        table.insert(Account {
            id: id.clone(),
            name: account.name.clone(),
            handle: account.handle.clone(),
            email: account.email.clone(),
            password_hash: None,
        })
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Account>, StoreError> {
        self.find(|account| account.handle == handle).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.find(|account| account.email == email).await
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.find(|account| &account.id == id).await
    }

    async fn identity_taken(
        &self,
        handle: &str,
        email: &str,
    ) -> Result<Option<UniqueField>, StoreError> {
        let slot = self.lease().await?;
        let taken = slot.table().taken(None, handle, email);
        Ok(taken)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.lease().await.map(drop)
    }

    fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
