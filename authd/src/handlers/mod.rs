//! HTTP handlers for authd.

pub mod auth;
pub mod health;
pub mod metrics;

pub use auth::*;

use axum::extract::FromRequest;
use service_core::error::AppError;

/// JSON body extractor whose rejections use the service error format.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
