//! Account model - the credential record owned by this service.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Account entity.
///
/// `password_hash` is a PHC string produced by [`crate::utils::PasswordHasher`].
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new, not yet confirmed account.
    pub fn new(email: String, password_hash: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email,
            password_hash,
            active: false,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_is_inactive() {
        let now = Utc::now();
        let account = Account::new("user@example.com".to_string(), "hash".to_string(), now);

        assert!(!account.active);
        assert_eq!(account.created_at, now);
        assert!(account.last_login_at.is_none());
        assert!(Uuid::parse_str(&account.id).is_ok());
    }
}
