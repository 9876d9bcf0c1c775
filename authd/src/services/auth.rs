use crate::models::{Account, Purpose};
use crate::services::clock::Clock;
use crate::services::confirmation::ConfirmationLedger;
use crate::services::email::{Mailer, RESETPW_TEMPLATE, SIGNUP_TEMPLATE};
use crate::services::error::AuthError;
use crate::services::rules::FieldRules;
use crate::services::tokens::{AccessClaims, Signer, Token, TokenIssuer};
use crate::services::Redeemed;
use crate::store::{Store, StoreError, StoreTx};
use crate::utils::{HashCost, Password, PasswordHasher};
use chrono::Duration;
use std::sync::Arc;

/// Everything the auth service needs to know besides its collaborators.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub password: PasswordSettings,
    pub sign_up: ConfirmationSettings,
    pub password_reset: ConfirmationSettings,
}

#[derive(Debug, Clone)]
pub struct PasswordSettings {
    pub min_length: usize,
    pub cost: HashCost,
}

#[derive(Debug, Clone)]
pub struct ConfirmationSettings {
    pub ttl: Duration,
    /// Base link handed to the template as `link`.
    pub link: String,
    pub template: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_ttl: Duration::minutes(60),
            refresh_ttl: Duration::hours(120),
            password: PasswordSettings {
                min_length: 6,
                cost: HashCost::default(),
            },
            sign_up: ConfirmationSettings {
                ttl: Duration::hours(120),
                link: "http://localhost:3000/signup/confirm".to_string(),
                template: SIGNUP_TEMPLATE.to_string(),
            },
            password_reset: ConfirmationSettings {
                ttl: Duration::hours(12),
                link: "http://localhost:3000/pwreset/confirm".to_string(),
                template: RESETPW_TEMPLATE.to_string(),
            },
        }
    }
}

/// Account lifecycle: sign-up, confirmation, password reset, sign-in and
/// token refresh. Each operation runs in one store transaction.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    hasher: PasswordHasher,
    rules: FieldRules,
    ledger: ConfirmationLedger,
    issuer: TokenIssuer,
}

impl AuthService {
    pub fn new(
        settings: AuthSettings,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        signer: Arc<dyn Signer>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, AuthError> {
        let hasher = PasswordHasher::new(settings.password.cost)?;
        let rules = FieldRules::new(settings.password.min_length);
        let ledger = ConfirmationLedger::new(
            clock.clone(),
            mailer,
            settings.sign_up,
            settings.password_reset,
        );
        let issuer = TokenIssuer::new(
            signer,
            clock.clone(),
            settings.access_ttl,
            settings.refresh_ttl,
        );

        Ok(Self {
            store,
            clock,
            hasher,
            rules,
            ledger,
            issuer,
        })
    }

    /// Create an inactive account and mail its sign-up confirmation.
    pub async fn sign_up(&self, email: &str, password: &Password) -> Result<(), AuthError> {
        let mut tx = self.store.begin().await?;
        let result = self.sign_up_in(tx.as_mut(), email, password).await;
        let account_id = finish(tx, result, internal_conflict).await?;

        tracing::info!(account_id = %account_id, "Account created");
        metrics::counter!("authd_signups_total").increment(1);
        Ok(())
    }

    async fn sign_up_in(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
        password: &Password,
    ) -> Result<String, AuthError> {
        self.rules
            .validate_account_creation(tx, email, password.as_str())
            .await?
            .into_result()?;

        let password_hash = self.hasher.hash(password)?;
        let account = Account::new(email.to_string(), password_hash, self.clock.now());

        tx.insert_account(&account).await?;
        self.ledger.issue(tx, &account, Purpose::SignUp).await?;

        Ok(account.id)
    }

    /// Activate the account owning a sign-up confirmation.
    pub async fn confirm_user(&self, confirmation_id: &str) -> Result<(), AuthError> {
        let mut tx = self.store.begin().await?;
        let result = self
            .ledger
            .consume(tx.as_mut(), confirmation_id, Purpose::SignUp, |account| {
                account.active = true;
                Ok(())
            })
            .await;

        settle(tx, result, || AuthError::NotFound).await?;
        Ok(())
    }

    /// Mail a password-reset confirmation. Unknown addresses succeed
    /// silently and nothing is sent.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.rules.validate_email(email).await?.into_result()?;

        let mut tx = self.store.begin().await?;
        let result = self.request_password_reset_in(tx.as_mut(), email).await;
        finish(tx, result, internal_conflict).await
    }

    async fn request_password_reset_in(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
    ) -> Result<(), AuthError> {
        let Some(account) = tx.find_account_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        self.ledger
            .issue(tx, &account, Purpose::PasswordReset)
            .await?;
        Ok(())
    }

    /// Replace the password of the account owning a reset confirmation.
    pub async fn update_password(
        &self,
        confirmation_id: &str,
        password: &Password,
    ) -> Result<(), AuthError> {
        self.rules
            .validate_password(password.as_str())
            .await?
            .into_result()?;

        let hasher = &self.hasher;
        let mut tx = self.store.begin().await?;
        let result = self
            .ledger
            .consume(
                tx.as_mut(),
                confirmation_id,
                Purpose::PasswordReset,
                |account| {
                    account.password_hash = hasher.hash(password)?;
                    Ok(())
                },
            )
            .await;

        settle(tx, result, || AuthError::NotFound).await?;
        Ok(())
    }

    /// Exchange credentials for a token pair. Unknown email, inactive
    /// account and wrong password are indistinguishable.
    pub async fn sign_in(&self, email: &str, password: &Password) -> Result<Token, AuthError> {
        let mut tx = self.store.begin().await?;
        let result = self.sign_in_in(tx.as_mut(), email, password).await;
        finish(tx, result, internal_conflict).await
    }

    async fn sign_in_in(
        &self,
        tx: &mut dyn StoreTx,
        email: &str,
        password: &Password,
    ) -> Result<Token, AuthError> {
        let account = tx.find_account_by_email(email).await?;
        let hash = account
            .as_ref()
            .map_or(self.hasher.decoy_hash(), |a| a.password_hash.as_str());
        // One Argon2 verification on every path, known email or not.
        let matches = self.hasher.verify(hash, password);

        let mut account = match account {
            Some(account) if matches && account.active => account,
            _ => return Err(AuthError::Unauthorized),
        };

        self.issuer.grant(tx, &mut account).await
    }

    /// Exchange a refresh token for a new pair. Every refresh token is
    /// single-use, including expired ones.
    pub async fn refresh(&self, refresh_id: &str) -> Result<Token, AuthError> {
        let mut tx = self.store.begin().await?;
        let result = self.issuer.refresh(tx.as_mut(), refresh_id).await;
        settle(tx, result, || AuthError::Unauthorized).await
    }

    /// Verify an access token's signature and expiry.
    pub fn authenticate(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.issuer.verify(access_token)
    }

    /// Store liveness, for health checks.
    pub async fn ping(&self) -> Result<(), AuthError> {
        self.store.ping().await?;
        Ok(())
    }
}

fn internal_conflict() -> AuthError {
    AuthError::internal("concurrent modification")
}

/// Commit on success, roll back on error.
async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, AuthError>,
    on_conflict: fn() -> AuthError,
) -> Result<T, AuthError> {
    match result {
        Ok(value) => {
            commit(tx, on_conflict).await?;
            Ok(value)
        }
        Err(err) => {
            rollback(tx).await;
            Err(err)
        }
    }
}

/// Like [`finish`], but a refused redemption keeps its writes.
async fn settle<T>(
    tx: Box<dyn StoreTx>,
    result: Result<Redeemed<T>, AuthError>,
    on_conflict: fn() -> AuthError,
) -> Result<T, AuthError> {
    match result {
        Ok(Redeemed::Accepted(value)) => {
            commit(tx, on_conflict).await?;
            Ok(value)
        }
        Ok(Redeemed::Refused(err)) => {
            commit(tx, on_conflict).await?;
            Err(err)
        }
        Err(err) => {
            rollback(tx).await;
            Err(err)
        }
    }
}

async fn commit(tx: Box<dyn StoreTx>, on_conflict: fn() -> AuthError) -> Result<(), AuthError> {
    match tx.commit().await {
        Ok(()) => Ok(()),
        Err(StoreError::Conflict) => Err(on_conflict()),
        Err(err) => {
            if !err.is_email_taken() {
                tracing::error!(error = %err, "Failed to commit transaction");
            }
            Err(err.into())
        }
    }
}

async fn rollback(tx: Box<dyn StoreTx>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "Failed to roll back transaction");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::services::email::RecordingMailer;
    use crate::services::error::ErrorKind;
    use crate::services::tokens::JwtSigner;
    use crate::store::MemoryStore;
    use chrono::{DateTime, Utc};

    fn settings() -> AuthSettings {
        AuthSettings {
            password: PasswordSettings {
                min_length: 6,
                cost: HashCost {
                    memory_kib: 1024,
                    iterations: 1,
                    parallelism: 1,
                },
            },
            ..AuthSettings::default()
        }
    }

    fn service() -> (AuthService, MemoryStore, RecordingMailer) {
        let store = MemoryStore::new();
        let mailer = RecordingMailer::new();
        let clock = ManualClock::new(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap());
        let service = AuthService::new(
            settings(),
            Arc::new(store.clone()),
            Arc::new(clock),
            Arc::new(JwtSigner::hmac(b"unit-test-secret")),
            Arc::new(mailer.clone()),
        )
        .unwrap();
        (service, store, mailer)
    }

    #[test]
    fn default_settings() {
        let settings = AuthSettings::default();
        assert_eq!(settings.access_ttl, Duration::minutes(60));
        assert_eq!(settings.refresh_ttl, Duration::hours(120));
        assert_eq!(settings.password.min_length, 6);
        assert_eq!(settings.sign_up.template, "signup.msg");
        assert_eq!(settings.password_reset.ttl, Duration::hours(12));
    }

    #[tokio::test]
    async fn failed_delivery_rolls_back_sign_up() {
        let (service, store, mailer) = service();
        mailer.set_failing(true);

        let err = service
            .sign_up("user@example.com", &Password::new("secret"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(store.accounts().await.is_empty());
        assert!(store.confirmations().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_sign_up_reports_all_fields() {
        let (service, store, mailer) = service();

        let err = service
            .sign_up("nope", &Password::new("abc"))
            .await
            .unwrap_err();

        match err {
            AuthError::Argument(fields) => {
                assert_eq!(fields.get("email"), Some(&["email-invalid"][..]));
                assert_eq!(fields.get("password"), Some(&["password-short"][..]));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.accounts().await.is_empty());
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn update_password_validates_before_consuming() {
        let (service, _store, _mailer) = service();

        let err = service
            .update_password("whatever", &Password::new("abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
    }
}
