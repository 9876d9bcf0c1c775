//! PostgreSQL store backed by a `sqlx` pool.

use super::{Store, StoreError, StoreTx};
use crate::models::{Account, Confirmation, Purpose, RefreshToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

const SERIALIZATION_FAILURE: &str = "40001";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation(
                    db_err.constraint().unwrap_or_default().to_string(),
                );
            }
            if db_err.code().as_deref() == Some(SERIALIZATION_FAILURE) {
                return StoreError::Conflict;
            }
        }
        StoreError::Backend(anyhow::Error::new(err))
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct ConfirmationRow {
    id: String,
    account_id: String,
    purpose: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<ConfirmationRow> for Confirmation {
    type Error = StoreError;

    fn try_from(row: ConfirmationRow) -> Result<Self, Self::Error> {
        let purpose: Purpose = row
            .purpose
            .parse()
            .map_err(|e: String| StoreError::Backend(anyhow::anyhow!(e)))?;

        Ok(Confirmation {
            id: row.id,
            account_id: row.account_id,
            purpose,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, email, password_hash, active, created_at, updated_at, last_login_at";

#[async_trait]
impl StoreTx for PgTx {
    async fn find_account_by_email(&mut self, email: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE email = $1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(account)
    }

    async fn find_account(&mut self, id: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(account)
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, password_hash, active, created_at, updated_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.active)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.last_login_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET email = $2, password_hash = $3, active = $4, updated_at = $5, last_login_at = $6
            WHERE id = $1
            "#,
        )
        .bind(&account.id)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.active)
        .bind(account.updated_at)
        .bind(account.last_login_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn record_login(&mut self, account_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE accounts SET last_login_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(account_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn insert_confirmation(&mut self, confirmation: &Confirmation) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO confirmations (id, account_id, purpose, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&confirmation.id)
        .bind(&confirmation.account_id)
        .bind(confirmation.purpose.as_str())
        .bind(confirmation.created_at)
        .bind(confirmation.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_confirmation(&mut self, id: &str) -> Result<Option<Confirmation>, StoreError> {
        let row = sqlx::query_as::<_, ConfirmationRow>(
            r#"
            SELECT id, account_id, purpose, created_at, expires_at
            FROM confirmations
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(Confirmation::try_from).transpose()
    }

    async fn delete_confirmation(&mut self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM confirmations WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn insert_refresh_token(&mut self, token: &RefreshToken) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, account_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&token.id)
        .bind(&token.account_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn take_refresh_token(&mut self, id: &str) -> Result<Option<RefreshToken>, StoreError> {
        let token = sqlx::query_as::<_, RefreshToken>(
            r#"
            DELETE FROM refresh_tokens
            WHERE id = $1
            RETURNING id, account_id, created_at, expires_at
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(token)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
