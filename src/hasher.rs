//! One-way password hashing.
//!
//! Hashes are bcrypt modular-crypt strings (`$2b$<cost>$<salt><digest>`), so
//! the salt and cost needed for verification travel with the hash. Every call
//! to [`CredentialHasher::hash`] draws a fresh salt.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use thiserror::Error;

/// Cost used when nothing else is configured.
pub const DEFAULT_COST: u32 = 10;
pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

/// bcrypt only digests the first 72 bytes of its input. Longer secrets are
/// refused instead of silently truncated.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid bcrypt cost {0}, expected {min}..={max}", min = MIN_COST, max = MAX_COST)]
    InvalidCost(u32),
    #[error("password exceeds {MAX_PASSWORD_BYTES} bytes")]
    PasswordTooLong,
    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("password hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A stored password hash. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct HashedSecret(String);

impl HashedSecret {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for HashedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashedSecret(***)")
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CredentialHasher {
    cost: u32,
}

impl CredentialHasher {
    /// # Errors
    /// Returns `HashError::InvalidCost` outside of the bcrypt cost range.
    pub fn new(cost: u32) -> Result<Self, HashError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(HashError::InvalidCost(cost));
        }
        Ok(Self { cost })
    }

    #[must_use]
    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash with a fresh random salt.
    ///
    /// # Errors
    /// `HashError::PasswordTooLong` above [`MAX_PASSWORD_BYTES`], otherwise
    /// only on infrastructure faults inside bcrypt (e.g. the OS RNG).
    pub fn hash(&self, plaintext: &SecretString) -> Result<HashedSecret, HashError> {
        let plaintext = plaintext.expose_secret();
        if plaintext.len() > MAX_PASSWORD_BYTES {
            return Err(HashError::PasswordTooLong);
        }
        let hashed = bcrypt::hash(plaintext, self.cost)?;
        Ok(HashedSecret(hashed))
    }

    /// `true` only when `plaintext` produced `hashed`.
    ///
    /// bcrypt compares digests in constant time. Malformed hashes and
    /// plaintexts that could never have been hashed are a mismatch, not an
    /// error.
    #[must_use]
    pub fn verify(&self, plaintext: &SecretString, hashed: &HashedSecret) -> bool {
        let plaintext = plaintext.expose_secret();
        plaintext.len() <= MAX_PASSWORD_BYTES
            && bcrypt::verify(plaintext, hashed.as_str()).unwrap_or(false)
    }

    /// [`Self::hash`] on the blocking pool so the expensive work cannot stall
    /// the request-accepting threads.
    ///
    /// # Errors
    /// Returns `HashError` if hashing fails or the blocking task panics.
    pub async fn hash_blocking(&self, plaintext: SecretString) -> Result<HashedSecret, HashError> {
        let hasher = *self;
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext)).await?
    }

    /// [`Self::verify`] on the blocking pool.
    ///
    /// # Errors
    /// Returns `HashError::Join` only if the blocking task panics.
    pub async fn verify_blocking(
        &self,
        plaintext: SecretString,
        hashed: HashedSecret,
    ) -> Result<bool, HashError> {
        let hasher = *self;
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &hashed)).await?)
    }
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            cost: DEFAULT_COST,
        }
    }
}
