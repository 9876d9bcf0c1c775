//! Single-use confirmations delivered by email.
//!
//! A confirmation is either live (row present), consumed (row deleted), or
//! expired. Presenting an expired confirmation deletes it and sends a fresh
//! one of the same purpose to the same recipient.

use crate::models::{Account, Confirmation, Purpose};
use crate::services::auth::ConfirmationSettings;
use crate::services::clock::Clock;
use crate::services::email::{MailRequest, Mailer};
use crate::services::error::AuthError;
use crate::services::Redeemed;
use crate::store::StoreTx;
use crate::utils::generate_random_token;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct ConfirmationLedger {
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    sign_up: ConfirmationSettings,
    password_reset: ConfirmationSettings,
}

impl ConfirmationLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        mailer: Arc<dyn Mailer>,
        sign_up: ConfirmationSettings,
        password_reset: ConfirmationSettings,
    ) -> Self {
        Self {
            clock,
            mailer,
            sign_up,
            password_reset,
        }
    }

    fn settings(&self, purpose: Purpose) -> &ConfirmationSettings {
        match purpose {
            Purpose::SignUp => &self.sign_up,
            Purpose::PasswordReset => &self.password_reset,
        }
    }

    /// Store a new confirmation for `account` and mail it. A delivery
    /// failure fails the call, so the caller's transaction is rolled back.
    pub async fn issue(
        &self,
        tx: &mut dyn StoreTx,
        account: &Account,
        purpose: Purpose,
    ) -> Result<String, AuthError> {
        let settings = self.settings(purpose);
        let confirmation = Confirmation::new(
            generate_random_token(),
            account.id.clone(),
            purpose,
            self.clock.now(),
            settings.ttl,
        );

        tx.insert_confirmation(&confirmation).await?;

        let request = MailRequest {
            template: settings.template.clone(),
            args: BTreeMap::from([
                ("link".to_string(), settings.link.clone()),
                ("id".to_string(), confirmation.id.clone()),
            ]),
            to: account.email.clone(),
        };

        self.mailer.send(&request).await.map_err(|e| {
            tracing::error!(
                error = %e,
                account_id = %account.id,
                purpose = ?purpose,
                "Failed to deliver confirmation"
            );
            AuthError::Internal(anyhow::Error::new(e))
        })?;

        tracing::info!(account_id = %account.id, purpose = ?purpose, "Confirmation issued");

        Ok(confirmation.id)
    }

    /// Redeem a confirmation of the given purpose.
    ///
    /// Unknown ids and ids of another purpose are `NotFound`. An expired
    /// confirmation is replaced and refused with `Expired`; `mutate` is not
    /// applied. Otherwise `mutate` runs on the owning account, the account is
    /// saved and the confirmation deleted.
    pub async fn consume<F>(
        &self,
        tx: &mut dyn StoreTx,
        id: &str,
        purpose: Purpose,
        mutate: F,
    ) -> Result<Redeemed<Account>, AuthError>
    where
        F: FnOnce(&mut Account) -> Result<(), AuthError> + Send,
    {
        let confirmation = match tx.find_confirmation(id).await? {
            Some(c) if c.purpose == purpose => c,
            _ => {
                record(purpose, "not_found");
                return Err(AuthError::NotFound);
            }
        };

        let Some(mut account) = tx.find_account(&confirmation.account_id).await? else {
            record(purpose, "not_found");
            return Err(AuthError::NotFound);
        };

        let now = self.clock.now();
        if confirmation.is_expired(now) {
            tx.delete_confirmation(&confirmation.id).await?;
            self.issue(tx, &account, purpose).await?;

            tracing::info!(
                account_id = %account.id,
                purpose = ?purpose,
                "Expired confirmation regenerated"
            );
            record(purpose, "expired");
            return Ok(Redeemed::Refused(AuthError::Expired));
        }

        mutate(&mut account)?;
        account.updated_at = now;
        tx.update_account(&account).await?;
        tx.delete_confirmation(&confirmation.id).await?;

        tracing::info!(account_id = %account.id, purpose = ?purpose, "Confirmation consumed");
        record(purpose, "consumed");

        Ok(Redeemed::Accepted(account))
    }
}

fn record(purpose: Purpose, outcome: &'static str) {
    metrics::counter!(
        "authd_confirmations_total",
        "purpose" => purpose.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::email::RecordingMailer;
    use crate::services::error::ErrorKind;
    use crate::store::{MemoryStore, Store};
    use chrono::{DateTime, Duration, Utc};

    struct Fixture {
        clock: ManualClock,
        mailer: RecordingMailer,
        store: MemoryStore,
        ledger: ConfirmationLedger,
        account: Account,
    }

    async fn fixture() -> Fixture {
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let mailer = RecordingMailer::new();
        let store = MemoryStore::new();
        let ledger = ConfirmationLedger::new(
            Arc::new(clock.clone()),
            Arc::new(mailer.clone()),
            ConfirmationSettings {
                ttl: Duration::hours(1),
                link: "https://example.com/confirm".to_string(),
                template: "signup.msg".to_string(),
            },
            ConfirmationSettings {
                ttl: Duration::minutes(30),
                link: "https://example.com/reset".to_string(),
                template: "resetpw.msg".to_string(),
            },
        );

        let account = Account::new("user@example.com".to_string(), "hash".to_string(), Utc::now());
        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();
        tx.commit().await.unwrap();

        Fixture {
            clock,
            mailer,
            store,
            ledger,
            account,
        }
    }

    async fn issue(f: &Fixture, purpose: Purpose) -> String {
        let mut tx = f.store.begin().await.unwrap();
        let id = f.ledger.issue(tx.as_mut(), &f.account, purpose).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    fn activate(account: &mut Account) -> Result<(), AuthError> {
        account.active = true;
        Ok(())
    }

    #[tokio::test]
    async fn issue_stores_and_mails() {
        let f = fixture().await;
        let id = issue(&f, Purpose::PasswordReset).await;

        let stored = f.store.confirmations().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].expires_at - stored[0].created_at, Duration::minutes(30));

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, "resetpw.msg");
        assert_eq!(sent[0].to, "user@example.com");
        assert_eq!(sent[0].args["id"], id);
        assert_eq!(sent[0].args["link"], "https://example.com/reset");
    }

    #[tokio::test]
    async fn consume_applies_mutation_once() {
        let f = fixture().await;
        let id = issue(&f, Purpose::SignUp).await;

        let mut tx = f.store.begin().await.unwrap();
        let outcome = f
            .ledger
            .consume(tx.as_mut(), &id, Purpose::SignUp, activate)
            .await
            .unwrap();
        assert!(matches!(outcome, Redeemed::Accepted(ref a) if a.active));
        tx.commit().await.unwrap();

        assert!(f.store.confirmations().await.is_empty());

        let mut tx = f.store.begin().await.unwrap();
        let err = f
            .ledger
            .consume(tx.as_mut(), &id, Purpose::SignUp, activate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn wrong_purpose_is_not_found() {
        let f = fixture().await;
        let id = issue(&f, Purpose::SignUp).await;

        let mut tx = f.store.begin().await.unwrap();
        let err = f
            .ledger
            .consume(tx.as_mut(), &id, Purpose::PasswordReset, |_| Ok(()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn expired_is_replaced_without_mutation() {
        let f = fixture().await;
        let id = issue(&f, Purpose::SignUp).await;
        f.mailer.clear();

        f.clock.advance(Duration::hours(1) + Duration::seconds(1));

        let mut tx = f.store.begin().await.unwrap();
        let outcome = f
            .ledger
            .consume(tx.as_mut(), &id, Purpose::SignUp, activate)
            .await
            .unwrap();
        assert!(matches!(outcome, Redeemed::Refused(AuthError::Expired)));
        tx.commit().await.unwrap();

        let stored = f.store.confirmations().await;
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].id, id);
        assert_eq!(stored[0].purpose, Purpose::SignUp);

        let sent = f.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].args["id"], stored[0].id);

        let account = f.store.account_by_email("user@example.com").await.unwrap();
        assert!(!account.active);
    }

    #[tokio::test]
    async fn failed_delivery_fails_issue() {
        let f = fixture().await;
        f.mailer.set_failing(true);

        let mut tx = f.store.begin().await.unwrap();
        let err = f
            .ledger
            .issue(tx.as_mut(), &f.account, Purpose::SignUp)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn mutation_error_propagates() {
        let f = fixture().await;
        let id = issue(&f, Purpose::PasswordReset).await;

        let mut tx = f.store.begin().await.unwrap();
        let err = f
            .ledger
            .consume(tx.as_mut(), &id, Purpose::PasswordReset, |_| {
                Err(AuthError::internal("hash backend down"))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
