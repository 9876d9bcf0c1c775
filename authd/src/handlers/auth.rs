use service_core::{
    axum::{
        extract::{Path, State},
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::{
        auth::{
            CredentialsRequest, PasswordResetRequest, PasswordUpdateRequest, RefreshRequest,
            TokenResponse,
        },
        ErrorResponse, MessageResponse,
    },
    handlers::AppJson,
    utils::Password,
    AppState,
};

pub const SIGNUP_MESSAGE: &str = "confirmation email has been sent";
pub const CONFIRMED_MESSAGE: &str = "user has been activated";
pub const PWRESET_MESSAGE: &str = "password reset email has been sent";
pub const PASSWORD_UPDATED_MESSAGE: &str = "password has been updated";

/// Register a new account
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Account created, confirmation sent", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn sign_up(
    State(state): State<AppState>,
    AppJson(req): AppJson<CredentialsRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth
        .sign_up(&req.email, &Password::new(req.password))
        .await?;
    Ok(Json(MessageResponse::new(SIGNUP_MESSAGE)))
}

/// Activate an account with its sign-up confirmation
#[utoipa::path(
    post,
    path = "/v1/auth/signup/confirm/{id}",
    params(("id" = String, Path, description = "Confirmation id")),
    responses(
        (status = 200, description = "Account activated", body = MessageResponse),
        (status = 404, description = "Confirmation not found", body = ErrorResponse),
        (status = 408, description = "Confirmation expired, a new one has been sent", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_sign_up(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.confirm_user(&id).await?;
    Ok(Json(MessageResponse::new(CONFIRMED_MESSAGE)))
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/v1/auth/pwreset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Reset email sent if the account exists", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    AppJson(req): AppJson<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.request_password_reset(&req.email).await?;
    Ok(Json(MessageResponse::new(PWRESET_MESSAGE)))
}

/// Set a new password with a password-reset confirmation
#[utoipa::path(
    post,
    path = "/v1/auth/pwreset/confirm/{id}",
    params(("id" = String, Path, description = "Confirmation id")),
    request_body = PasswordUpdateRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Confirmation not found", body = ErrorResponse),
        (status = 408, description = "Confirmation expired, a new one has been sent", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(req): AppJson<PasswordUpdateRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth
        .update_password(&id, &Password::new(req.password))
        .await?;
    Ok(Json(MessageResponse::new(PASSWORD_UPDATED_MESSAGE)))
}

/// Sign in with email and password
#[utoipa::path(
    post,
    path = "/v1/auth/signin",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn sign_in(
    State(state): State<AppState>,
    AppJson(req): AppJson<CredentialsRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state
        .auth
        .sign_in(&req.email, &Password::new(req.password))
        .await?;
    Ok(Json(token.into()))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid or expired refresh token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(req): AppJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = state.auth.refresh(&req.refresh).await?;
    Ok(Json(token.into()))
}
