//! Shared application state for the `privbeta` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers and middleware via `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use privbeta_core::gate::BetaGate;
use privbeta_core::invitation::InvitationService;
use privbeta_core::mail::{EmailSender, EmailTemplates, InviteMailer};
use privbeta_core::repository::BetaRepository;
use privbeta_core::signing::CookieSigner;

use crate::config::ServerConfig;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Users, codes, invitations and sessions.
    pub repo: Arc<dyn BetaRepository>,
    /// Invitation lifecycle.
    pub invitations: Arc<InvitationService>,
    /// Per-request access decision.
    pub gate: BetaGate,
    /// Signs the invitation code cookie.
    pub signer: CookieSigner,
    /// Lifetime of a session.
    pub session_ttl: chrono::Duration,
    /// Where redeemed codes and verified visitors are sent.
    pub verified_redirect: String,
    /// Mark cookies `Secure`.
    pub secure_cookies: bool,
    /// Directory served under `/static/`.
    pub static_dir: Option<PathBuf>,
}

impl AppState {
    /// Wire the core services from configuration.
    #[must_use]
    pub fn new(
        config: &ServerConfig,
        repo: Arc<dyn BetaRepository>,
        sender: Arc<dyn EmailSender>,
        templates: EmailTemplates,
    ) -> Self {
        let mailer = InviteMailer::new(sender, templates, &config.public_url);
        let invitations = Arc::new(InvitationService::new(Arc::clone(&repo), mailer));
        let gate = BetaGate::new(config.gate.clone(), Arc::clone(&invitations));

        let signer = if let Some(key) = &config.secret_key {
            CookieSigner::new(key.as_bytes())
        } else {
            tracing::warn!(
                "PRIVBETA_SECRET_KEY not set, using a random key; code cookies will not survive a restart"
            );
            CookieSigner::ephemeral()
        };

        let session_ttl = chrono::Duration::from_std(std::time::Duration::from_secs(
            config.session_ttl_secs,
        ))
        .unwrap_or_else(|_| chrono::Duration::days(14));

        Self {
            repo,
            invitations,
            gate,
            signer,
            session_ttl,
            verified_redirect: config.verified_redirect.clone(),
            secure_cookies: config.secure_cookies,
            static_dir: config.static_dir.clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("gate", &self.gate.config())
            .field("verified_redirect", &self.verified_redirect)
            .finish_non_exhaustive()
    }
}
