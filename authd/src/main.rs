use authd::{
    build_router,
    config::AuthdConfig,
    db,
    services::{AuthService, JwtSigner, LogMailer, Mailer, SmtpMailer, SystemClock},
    store::{MemoryStore, PgStore, Store},
    AppState,
};
use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthdConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::ConfigError)?;

    let metrics = init_metrics().map_err(AppError::ConfigError)?;

    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "Starting authd"
    );

    let store: Arc<dyn Store> = match &config.database {
        Some(database) => {
            let pool = db::create_pool(database)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(
            SmtpMailer::new(smtp).map_err(|e| AppError::EmailError(e.to_string()))?,
        ),
        None => {
            tracing::warn!("SMTP_HOST not set, outbound mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    let signer = JwtSigner::from_config(&config.jwt).map_err(AppError::ConfigError)?;

    let auth = AuthService::new(
        config.auth.clone(),
        store,
        Arc::new(SystemClock),
        Arc::new(signer),
        mailer,
    )
    .map_err(|e| AppError::ConfigError(e.into()))?;

    let state = AppState {
        service_name: config.service_name.clone(),
        auth,
        metrics: Some(metrics),
    };
    let app = build_router(state);

    let addr = config.common.socket_addr();
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
