use crate::config::JwtConfig;
use crate::models::{Account, RefreshToken};
use crate::services::clock::Clock;
use crate::services::error::AuthError;
use crate::services::Redeemed;
use crate::store::StoreTx;
use crate::utils::generate_random_token;
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (account ID)
    pub sub: String,
    pub email: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Result of a successful sign-in or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub access: String,
    pub refresh: String,
    /// Access token expiry as a Unix timestamp.
    pub expires: i64,
}

pub trait Signer: Send + Sync {
    fn sign(&self, claims: &AccessClaims) -> Result<String, AuthError>;

    /// Checks the signature only. Expiry is judged against the service clock.
    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError>;
}

/// JWT signer, HS256 with a shared secret or RS256 with PEM keys.
#[derive(Clone)]
pub struct JwtSigner {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtSigner {
    pub fn hmac(secret: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::HS256,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Load an RS256 key pair from PEM files.
    pub fn rsa_from_files(private_key_path: &str, public_key_path: &str) -> Result<Self, anyhow::Error> {
        let private_key_pem = fs::read_to_string(private_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read private key from {}: {}",
                private_key_path,
                e
            )
        })?;

        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse private key: {}", e))?;

        let public_key_pem = fs::read_to_string(public_key_path).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read public key from {}: {}",
                public_key_path,
                e
            )
        })?;

        let decoding_key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to parse public key: {}", e))?;

        Ok(Self {
            algorithm: Algorithm::RS256,
            encoding_key,
            decoding_key,
        })
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let signer = match config {
            JwtConfig::Secret(secret) => Self::hmac(secret.expose_secret().as_bytes()),
            JwtConfig::Rsa {
                private_key_path,
                public_key_path,
            } => Self::rsa_from_files(private_key_path, public_key_path)?,
        };

        tracing::info!(algorithm = ?signer.algorithm, "JWT signer initialized");
        Ok(signer)
    }
}

impl Signer for JwtSigner {
    fn sign(&self, claims: &AccessClaims) -> Result<String, AuthError> {
        encode(&Header::new(self.algorithm), claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("Failed to encode access token: {}", e)))
    }

    fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Access token rejected");
                AuthError::Unauthorized
            })
    }
}

/// Mints access/refresh pairs and exchanges refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            signer,
            clock,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Sign an access token, store a fresh refresh token and record the
    /// login on `account`, all within `tx`.
    pub async fn grant(
        &self,
        tx: &mut dyn StoreTx,
        account: &mut Account,
    ) -> Result<Token, AuthError> {
        let now = self.clock.now();
        let expires = now + self.access_ttl;

        let claims = AccessClaims {
            sub: account.id.clone(),
            email: account.email.clone(),
            exp: expires.timestamp(),
            iat: now.timestamp(),
        };
        let access = self.signer.sign(&claims)?;

        let refresh = RefreshToken::new(
            generate_random_token(),
            account.id.clone(),
            now,
            self.refresh_ttl,
        );
        tx.insert_refresh_token(&refresh).await?;

        tx.record_login(&account.id, now).await?;
        account.last_login_at = Some(now);
        account.updated_at = now;

        tracing::info!(account_id = %account.id, "Tokens granted");
        metrics::counter!("authd_grants_total").increment(1);

        Ok(Token {
            access,
            refresh: refresh.id,
            expires: expires.timestamp(),
        })
    }

    /// Exchange a refresh token. The presented token is removed before its
    /// expiry is checked, so an expired token is refused but still consumed.
    pub async fn refresh(
        &self,
        tx: &mut dyn StoreTx,
        refresh_id: &str,
    ) -> Result<Redeemed<Token>, AuthError> {
        let Some(token) = tx.take_refresh_token(refresh_id).await? else {
            metrics::counter!("authd_refresh_rejected_total").increment(1);
            return Err(AuthError::Unauthorized);
        };

        if token.is_expired(self.clock.now()) {
            tracing::info!(account_id = %token.account_id, "Expired refresh token presented");
            metrics::counter!("authd_refresh_rejected_total").increment(1);
            return Ok(Redeemed::Refused(AuthError::Unauthorized));
        }

        let Some(mut account) = tx.find_account(&token.account_id).await? else {
            return Err(AuthError::Unauthorized);
        };

        self.grant(tx, &mut account).await.map(Redeemed::Accepted)
    }

    /// Verify an access token's signature and expiry.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims = self.signer.verify(token)?;
        if claims.exp < self.clock.now().timestamp() {
            return Err(AuthError::Unauthorized);
        }
        Ok(claims)
    }
}
