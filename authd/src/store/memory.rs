//! In-process store.
//!
//! A transaction reads from a private snapshot taken at `begin` and records
//! its writes. `commit` replays the writes against the current tables under
//! the write lock and fails if a unique key is taken, an account it rewrites
//! has meanwhile changed, or a row it deletes has disappeared. Postgres gives
//! the same outcomes through row locks and constraints.

use super::{Store, StoreError, StoreTx, ACCOUNTS_EMAIL_KEY};
use crate::models::{Account, Confirmation, RefreshToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: HashMap<String, Account>,
    confirmations: HashMap<String, Confirmation>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

impl Tables {
    fn email_taken(&self, email: &str, except_id: &str) -> bool {
        self.accounts
            .values()
            .any(|a| a.email == email && a.id != except_id)
    }

    fn apply(&mut self, write: Write) -> Result<(), StoreError> {
        match write {
            Write::InsertAccount(account) => {
                if self.accounts.contains_key(&account.id) {
                    return Err(StoreError::UniqueViolation("accounts_pkey".to_string()));
                }
                if self.email_taken(&account.email, &account.id) {
                    return Err(StoreError::UniqueViolation(ACCOUNTS_EMAIL_KEY.to_string()));
                }
                self.accounts.insert(account.id.clone(), account);
            }
            Write::UpdateAccount { before, account } => {
                if self.accounts.get(&account.id) != Some(&before) {
                    return Err(StoreError::Conflict);
                }
                if self.email_taken(&account.email, &account.id) {
                    return Err(StoreError::UniqueViolation(ACCOUNTS_EMAIL_KEY.to_string()));
                }
                self.accounts.insert(account.id.clone(), account);
            }
            Write::RecordLogin { account_id, at } => {
                let account = self
                    .accounts
                    .get_mut(&account_id)
                    .ok_or(StoreError::Conflict)?;
                account.last_login_at = Some(at);
                account.updated_at = at;
            }
            Write::InsertConfirmation(confirmation) => {
                if !self.accounts.contains_key(&confirmation.account_id) {
                    return Err(StoreError::Backend(anyhow::anyhow!(
                        "confirmation {} references missing account {}",
                        confirmation.id,
                        confirmation.account_id
                    )));
                }
                if self.confirmations.contains_key(&confirmation.id) {
                    return Err(StoreError::UniqueViolation("confirmations_pkey".to_string()));
                }
                self.confirmations
                    .insert(confirmation.id.clone(), confirmation);
            }
            Write::DeleteConfirmation(id) => {
                self.confirmations
                    .remove(&id)
                    .ok_or(StoreError::Conflict)?;
            }
            Write::InsertRefreshToken(token) => {
                if !self.accounts.contains_key(&token.account_id) {
                    return Err(StoreError::Backend(anyhow::anyhow!(
                        "refresh token references missing account {}",
                        token.account_id
                    )));
                }
                if self.refresh_tokens.contains_key(&token.id) {
                    return Err(StoreError::UniqueViolation("refresh_tokens_pkey".to_string()));
                }
                self.refresh_tokens.insert(token.id.clone(), token);
            }
            Write::DeleteRefreshToken(id) => {
                self.refresh_tokens
                    .remove(&id)
                    .ok_or(StoreError::Conflict)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Write {
    InsertAccount(Account),
    /// `before` is the row as this transaction last saw it.
    UpdateAccount { before: Account, account: Account },
    RecordLogin {
        account_id: String,
        at: DateTime<Utc>,
    },
    InsertConfirmation(Confirmation),
    DeleteConfirmation(String),
    InsertRefreshToken(RefreshToken),
    DeleteRefreshToken(String),
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed accounts, ordered by creation time.
    pub async fn accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> =
            self.tables.read().await.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.created_at);
        accounts
    }

    pub async fn account_by_email(&self, email: &str) -> Option<Account> {
        self.tables
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned()
    }

    /// Committed confirmations, ordered by creation time.
    pub async fn confirmations(&self) -> Vec<Confirmation> {
        let mut confirmations: Vec<Confirmation> = self
            .tables
            .read()
            .await
            .confirmations
            .values()
            .cloned()
            .collect();
        confirmations.sort_by_key(|c| c.created_at);
        confirmations
    }

    pub async fn refresh_tokens(&self) -> Vec<RefreshToken> {
        self.tables
            .read()
            .await
            .refresh_tokens
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let snapshot = self.tables.read().await.clone();
        Ok(Box::new(MemoryTx {
            tables: Arc::clone(&self.tables),
            view: snapshot,
            writes: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    view: Tables,
    writes: Vec<Write>,
}

impl MemoryTx {
    fn record(&mut self, write: Write) -> Result<(), StoreError> {
        self.view.apply(write.clone())?;
        self.writes.push(write);
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .view
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn find_account(&mut self, id: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.view.accounts.get(id).cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.record(Write::InsertAccount(account.clone()))
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let before = self
            .view
            .accounts
            .get(&account.id)
            .cloned()
            .ok_or(StoreError::Conflict)?;
        self.record(Write::UpdateAccount {
            before,
            account: account.clone(),
        })
    }

    async fn record_login(&mut self, account_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.record(Write::RecordLogin {
            account_id: account_id.to_string(),
            at,
        })
    }

    async fn insert_confirmation(&mut self, confirmation: &Confirmation) -> Result<(), StoreError> {
        self.record(Write::InsertConfirmation(confirmation.clone()))
    }

    async fn find_confirmation(&mut self, id: &str) -> Result<Option<Confirmation>, StoreError> {
        Ok(self.view.confirmations.get(id).cloned())
    }

    async fn delete_confirmation(&mut self, id: &str) -> Result<(), StoreError> {
        self.record(Write::DeleteConfirmation(id.to_string()))
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<(), StoreError> {
        self.record(Write::InsertRefreshToken(token.clone()))
    }

    async fn take_refresh_token(&mut self, id: &str) -> Result<Option<RefreshToken>, StoreError> {
        let Some(token) = self.view.refresh_tokens.get(id).cloned() else {
            return Ok(None);
        };
        self.record(Write::DeleteRefreshToken(id.to_string()))?;
        Ok(Some(token))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { tables, writes, .. } = *self;
        if writes.is_empty() {
            return Ok(());
        }

        let mut guard = tables.write().await;
        let mut next = guard.clone();
        for write in writes {
            next.apply(write)?;
        }
        *guard = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
