//! `PostgreSQL` account store on top of the crate's own pool.

use async_trait::async_trait;
use sqlx::{
    Connection, PgConnection, Row,
    postgres::{PgConnectOptions, PgRow},
};
use tracing::{Instrument, debug, error, info, info_span, instrument};

use super::{Account, AccountId, AccountStore, NewAccount, StoreError, UniqueField};
use crate::hasher::HashedSecret;
use crate::pool::{Connector, PoolConfig, PoolError, PoolStatus, ResourcePool, Slot};

/// Account schema, applied by `authgate setup-database`.
pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// Split a SQL script into its statements. Chunks holding only whitespace
/// or `--` comments are dropped.
#[must_use]
pub fn schema_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|chunk| {
            chunk.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            })
        })
        .collect()
}

/// Opens plain `PgConnection`s for the [`ResourcePool`].
#[derive(Clone, Debug)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    #[must_use]
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, PoolError> {
        let span = info_span!(
            "db.connect",
            db.system = "postgresql",
            db.operation = "CONNECT"
        );
        PgConnection::connect_with(&self.options)
            .instrument(span)
            .await
            .map_err(|err| {
                error!("Failed to connect to database: {}", err);
                PoolError::connect(err)
            })
    }

    async fn close(&self, connection: PgConnection) {
        if let Err(err) = connection.close().await {
            debug!("Error closing database connection: {}", err);
        }
    }
}

#[derive(Debug)]
pub struct PgAccountStore {
    pool: ResourcePool<PgConnector>,
}

impl PgAccountStore {
    /// # Errors
    /// Returns `PoolError::Config` if the pool configuration is invalid.
    pub fn new(options: PgConnectOptions, config: PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            pool: ResourcePool::new(PgConnector::new(options), config)?,
        })
    }

    async fn lease(&self) -> Result<Slot<PgConnector>, StoreError> {
        let span = info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        Ok(self.pool.acquire().instrument(span).await?)
    }

    /// Run [`SCHEMA`] statement by statement on one leased connection.
    /// Every statement is idempotent, so running it twice is harmless.
    ///
    /// # Errors
    /// Returns the first statement failure; later statements are not run.
    #[instrument(skip(self))]
    pub async fn apply_schema(&self) -> Result<usize, StoreError> {
        let statements = schema_statements(SCHEMA);
        let mut slot = self.lease().await?;
        let result = run_statements(&mut *slot, &statements).await;
        settle(slot, result)
    }

    async fn fetch_account(
        &self,
        query: &'static str,
        value: &str,
    ) -> Result<Option<Account>, StoreError> {
        let mut slot = self.lease().await?;
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(value)
            .fetch_optional(&mut *slot)
            .instrument(span)
            .await;

        settle(slot, result)?.map(|row| account_from_row(&row)).transpose()
    }
}

async fn run_statements(
    connection: &mut PgConnection,
    statements: &[&str],
) -> Result<usize, sqlx::Error> {
    for statement in statements {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = *statement
        );
        sqlx::raw_sql(*statement)
            .execute(&mut *connection)
            .instrument(span)
            .await?;
        info!("Statement executed: {}", statement);
    }
    Ok(statements.len())
}

/// Release the slot according to how the statement ended. Connections that
/// failed at the transport level are discarded instead of reused.
fn settle<T>(slot: Slot<PgConnector>, result: Result<T, sqlx::Error>) -> Result<T, StoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            if is_connection_error(&err) {
                debug!(slot = slot.id(), "discarding broken database connection");
                slot.discard();
            }
            if let Some(field) = unique_violation(&err) {
                return Err(StoreError::Conflict(field));
            }
            Err(StoreError::Database(err))
        }
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Map SQLSTATE `23505` to the column it protects.
fn unique_violation(err: &sqlx::Error) -> Option<UniqueField> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    if db_err.code().as_deref() != Some("23505") {
        return None;
    }

    Some(match db_err.constraint() {
        Some("accounts_email_key") => UniqueField::Email,
        Some("accounts_pkey") => UniqueField::Id,
        _ => UniqueField::Handle,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let password_hash: Option<String> = row.try_get("password_hash")?;
    Ok(Account {
        id: AccountId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        handle: row.try_get("handle")?,
        email: row.try_get("email")?,
        password_hash: password_hash.map(HashedSecret::new),
    })
}

#[async_trait]
impl AccountStore for PgAccountStore {
    #[instrument(skip(self, account), fields(handle = %account.handle))]
    async fn insert_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let mut slot = self.lease().await?;
        let query = r"
            INSERT INTO accounts
                (name, handle, email, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING id
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&account.name)
            .bind(&account.handle)
            .bind(&account.email)
            .bind(account.password_hash.as_ref().map(HashedSecret::as_str))
            .fetch_one(&mut *slot)
            .instrument(span)
            .await;

        let row = settle(slot, result)?;
        Ok(Account {
            id: AccountId::new(row.try_get("id")?),
            name: account.name.clone(),
            handle: account.handle.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
        })
    }

    #[instrument(skip(self, account), fields(handle = %account.handle))]
    async fn insert_profile(
        &self,
        id: &AccountId,
        account: &NewAccount,
    ) -> Result<Account, StoreError> {
        let mut slot = self.lease().await?;
        let query = r"
            INSERT INTO accounts
                (id, name, handle, email, password_hash)
            VALUES ($1, $2, $3, $4, NULL)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id.as_str())
            .bind(&account.name)
            .bind(&account.handle)
            .bind(&account.email)
            .execute(&mut *slot)
            .instrument(span)
            .await;

        settle(slot, result)?;
        Ok(Account {
            id: id.clone(),
            name: account.name.clone(),
            handle: account.handle.clone(),
            email: account.email.clone(),
            password_hash: None,
        })
    }

    async fn find_by_handle(&self, handle: &str) -> Result<Option<Account>, StoreError> {
        self.fetch_account(
            "SELECT id, name, handle, email, password_hash FROM accounts WHERE handle = $1",
            handle,
        )
        .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.fetch_account(
            "SELECT id, name, handle, email, password_hash FROM accounts WHERE email = $1",
            email,
        )
        .await
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.fetch_account(
            "SELECT id, name, handle, email, password_hash FROM accounts WHERE id = $1",
            id.as_str(),
        )
        .await
    }

    async fn identity_taken(
        &self,
        handle: &str,
        email: &str,
    ) -> Result<Option<UniqueField>, StoreError> {
        let mut slot = self.lease().await?;
        let query = r"
            SELECT
                COALESCE(bool_or(handle = $1), false) AS handle_taken,
                COALESCE(bool_or(email = $2), false) AS email_taken
            FROM accounts
            WHERE handle = $1 OR email = $2
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(handle)
            .bind(email)
            .fetch_one(&mut *slot)
            .instrument(span)
            .await;

        let row = settle(slot, result)?;
        let handle_taken: bool = row.try_get("handle_taken")?;
        let email_taken: bool = row.try_get("email_taken")?;

        Ok(if handle_taken {
            Some(UniqueField::Handle)
        } else if email_taken {
            Some(UniqueField::Email)
        } else {
            None
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut slot = self.lease().await?;
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let result = slot.ping().instrument(span).await;
        settle(slot, result)
    }

    fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
