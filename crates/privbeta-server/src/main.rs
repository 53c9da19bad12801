//! `privbeta` server entry point.
//!
//! Bootstraps the repository, mailer and gate, then starts the Axum HTTP
//! server with graceful shutdown. A background worker purges expired
//! sessions alongside the server and is cancelled on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use privbeta_core::mail::{EmailSender, EmailTemplates, LogEmailSender, SmtpEmailSender};
use privbeta_core::models::User;
use privbeta_core::password::hash_password;
use privbeta_core::repository::{BetaRepository, MemoryRepository};

use privbeta_server::build_router;
use privbeta_server::config::{ServerConfig, StorageBackendType};
use privbeta_server::routes;
use privbeta_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        gate_enabled = config.gate.enabled,
        "privbeta starting"
    );

    let state = Arc::new(build_app_state(&config).await?);
    bootstrap_admin(&state, &config).await?;

    // Shutdown signal channel.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn session purge background worker.
    let purge_worker_handle = {
        let repo = Arc::clone(&state.repo);
        let mut rx = shutdown_rx.clone();
        let interval_secs = config.session_purge_interval_secs;
        tokio::spawn(async move {
            session_purge_worker(repo, &mut rx, interval_secs).await;
        })
    };

    let app = build_router(Arc::clone(&state), routes::home::router());

    // Bind and serve.
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "privbeta server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    // Wait for background workers to finish (with timeout).
    info!("waiting for background workers to stop");
    let _ = tokio::time::timeout(Duration::from_secs(10), purge_worker_handle).await;

    info!("privbeta server stopped");
    Ok(())
}

/// Build the shared application state.
async fn build_app_state(config: &ServerConfig) -> anyhow::Result<AppState> {
    let repo: Arc<dyn BetaRepository> = match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Arc::new(MemoryRepository::new())
        }
        #[cfg(feature = "postgres")]
        StorageBackendType::Postgres { url } => {
            info!(url = %"[redacted]", "using PostgreSQL storage");
            Arc::new(
                privbeta_core::repository::PostgresRepository::connect(url)
                    .await
                    .context("failed to connect to PostgreSQL storage")?,
            )
        }
        #[cfg(not(feature = "postgres"))]
        StorageBackendType::Postgres { .. } => {
            anyhow::bail!("PostgreSQL storage requested but feature 'postgres' is not enabled");
        }
    };

    let sender: Arc<dyn EmailSender> = if let Some(smtp) = &config.smtp {
        info!(host = %smtp.host, port = smtp.port, "sending invite emails over SMTP");
        Arc::new(
            SmtpEmailSender::new(smtp, &config.from_email)
                .context("failed to configure SMTP transport")?,
        )
    } else {
        warn!("SMTP_HOST not set, invite emails will only be logged");
        Arc::new(LogEmailSender::new())
    };

    let templates = match &config.email_templates_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "loading email templates");
            EmailTemplates::load(dir).context("failed to load email templates")?
        }
        None => EmailTemplates::default(),
    };

    Ok(AppState::new(config, repo, sender, templates))
}

/// Create the configured staff account unless its email is already taken.
async fn bootstrap_admin(state: &AppState, config: &ServerConfig) -> anyhow::Result<()> {
    let Some(admin) = &config.admin else {
        return Ok(());
    };

    if state
        .repo
        .find_user_by_email(&admin.email)
        .await
        .context("failed to look up admin account")?
        .is_some()
    {
        return Ok(());
    }

    let password = admin.password.clone();
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .context("password hashing task failed")?
        .context("failed to hash admin password")?;

    let user = state
        .repo
        .create_user(&User::new(&admin.username, &admin.email, hash, true))
        .await
        .context("failed to create admin account")?;

    info!(user_id = %user.id, username = %user.username, "staff account created");
    Ok(())
}

/// Background worker that periodically deletes expired sessions.
async fn session_purge_worker(
    repo: Arc<dyn BetaRepository>,
    shutdown: &mut watch::Receiver<bool>,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let mut consecutive_failures: u32 = 0;
    info!(interval_secs, "session purge worker started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match repo.purge_expired_sessions(Utc::now()).await {
                    Ok(0) => { consecutive_failures = 0; }
                    Ok(purged) => {
                        consecutive_failures = 0;
                        info!(purged, "expired sessions purged");
                    }
                    Err(e) => {
                        consecutive_failures = consecutive_failures.saturating_add(1);
                        if consecutive_failures >= 5 {
                            tracing::error!(
                                error = %e,
                                consecutive_failures,
                                "session purge persistently failing, storage may be down"
                            );
                        } else {
                            warn!(error = %e, consecutive_failures, "session purge failed");
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("session purge worker shutting down");
                return;
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping server");
    let _ = shutdown_tx.send(true);
}
