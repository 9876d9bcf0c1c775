//! Transactional storage for accounts, confirmations and refresh tokens.
//!
//! Every operation of the auth service runs inside exactly one [`StoreTx`].
//! Two backends are provided: [`PgStore`] for deployments and [`MemoryStore`]
//! for development and tests.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{Account, Confirmation, RefreshToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Name of the unique constraint on `accounts.email`.
pub const ACCOUNTS_EMAIL_KEY: &str = "accounts_email_key";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A row this transaction relied on was changed or removed by a
    /// concurrent transaction.
    #[error("Concurrent modification")]
    Conflict,

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_email_taken(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(name) if name == ACCOUNTS_EMAIL_KEY)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Cheap liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// An open transaction. Reads observe this transaction's own uncommitted
/// writes. Dropping without `commit` discards every write.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Looks up an account and locks it for the rest of the transaction.
    async fn find_account(&mut self, id: &str) -> Result<Option<Account>, StoreError>;

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Overwrites every mutable column. Fails with `Conflict` if the row was
    /// changed by another transaction since this one read it.
    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Sets `last_login_at` and `updated_at` only.
    async fn record_login(&mut self, account_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn insert_confirmation(&mut self, confirmation: &Confirmation) -> Result<(), StoreError>;

    /// Looks up a confirmation and locks it for the rest of the transaction.
    async fn find_confirmation(&mut self, id: &str) -> Result<Option<Confirmation>, StoreError>;

    async fn delete_confirmation(&mut self, id: &str) -> Result<(), StoreError>;

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<(), StoreError>;

    /// Removes a refresh token and returns it, or `None` if no such token
    /// exists.
    async fn take_refresh_token(&mut self, id: &str) -> Result<Option<RefreshToken>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_email_constraint_means_email_taken() {
        assert!(StoreError::UniqueViolation(ACCOUNTS_EMAIL_KEY.to_string()).is_email_taken());
        assert!(!StoreError::UniqueViolation("accounts_pkey".to_string()).is_email_taken());
        assert!(!StoreError::Conflict.is_email_taken());
    }
}
