use crate::services::Token;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CredentialsRequest {
    #[schema(example = "user@example.com")]
    pub email: String,

    #[schema(example = "password123")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    #[schema(example = "user@example.com")]
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PasswordUpdateRequest {
    #[schema(example = "newPassword123")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefreshRequest {
    #[schema(example = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08")]
    pub refresh: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// Signed access token (JWT)
    pub access: String,
    /// Single-use refresh token
    pub refresh: String,
    /// Access token expiry (Unix timestamp)
    #[schema(example = 1700003600)]
    pub expires: i64,
}

impl From<Token> for TokenResponse {
    fn from(token: Token) -> Self {
        Self {
            access: token.access,
            refresh: token.refresh,
            expires: token.expires,
        }
    }
}
