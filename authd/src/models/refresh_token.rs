use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;

/// Refresh token record. The id itself is the bearer secret handed to the
/// client; it is exchanged exactly once.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct RefreshToken {
    pub id: String,
    pub account_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(id: String, account_id: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id,
            account_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
