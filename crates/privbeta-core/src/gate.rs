//! The private beta gate.
//!
//! [`BetaGate::evaluate`] decides, for one request, whether the visitor may
//! proceed. The checks run in a fixed order and the first one that applies
//! wins:
//!
//! 1. gate disabled
//! 2. allow-listed path, route prefix, or route
//! 3. anonymous visitor → redirect
//! 4. staff
//! 5. session already marked in beta
//! 6. no invitations and no code cookie → record a request, redirect
//! 7. an invitation already used
//! 8. an invitation granted but unused → mark it used
//! 9. the code cookie resolves to an invitation for the user's email →
//!    redeem it
//! 10. otherwise redirect
//!
//! The gate never touches HTTP. It reports side effects for the caller to
//! apply: caching the decision in the session and dropping a stale cookie.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{GateError, InvitationError, RepositoryError};
use crate::invitation::{CookieInvite, InvitationService};
use crate::models::{Invitation, User};

/// Route prefixes that always pass: the beta pages themselves, login,
/// the staff API and static assets.
pub const BUILTIN_ALLOW_PREFIXES: &[&str] = &["/beta/", "/auth/", "/admin/", "/static/"];

/// Default redirect for visitors without access.
pub const DEFAULT_REDIRECT: &str = "/beta/not-in-beta";

/// Gate settings.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// When false every request passes.
    pub enabled: bool,
    /// Where visitors without access are sent.
    pub redirect: String,
    /// Exact paths that always pass (public pages).
    pub allow_paths: Vec<String>,
    /// Path prefixes that always pass, in addition to the built-ins.
    pub allow_prefixes: Vec<String>,
    /// Route patterns (e.g. `/docs/{page}`) or paths that always pass.
    pub always_allow_views: Vec<String>,
    /// Also match `allow_paths` with a trailing slash appended.
    pub append_slash: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redirect: DEFAULT_REDIRECT.to_owned(),
            allow_paths: Vec::new(),
            allow_prefixes: Vec::new(),
            always_allow_views: Vec::new(),
            append_slash: true,
        }
    }
}

/// What the gate knows about one request.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub path: &'a str,
    /// The matched route pattern, when the router resolved one.
    pub route: Option<&'a str>,
    pub user: Option<&'a User>,
    pub session_in_beta: bool,
    /// Invitation code from a cookie whose signature verified.
    pub cookie_code: Option<&'a str>,
}

/// Allow the request or send the visitor elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Redirect(String),
}

/// Which check decided the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Disabled,
    AllowListed,
    Anonymous,
    Staff,
    SessionInBeta,
    RequestRecorded,
    AlreadyUsed,
    InvitationActivated,
    CookieRedeemed,
    NoAccess,
}

/// The decision for one request plus the side effects to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateOutcome {
    pub verdict: Verdict,
    pub reason: Reason,
    /// Record `in_beta` in the session.
    pub mark_in_beta: bool,
    /// Remove the invitation code cookie from the client.
    pub delete_cookie: bool,
}

impl GateOutcome {
    fn allow(reason: Reason) -> Self {
        Self {
            verdict: Verdict::Allow,
            reason,
            mark_in_beta: false,
            delete_cookie: false,
        }
    }

    fn admit(reason: Reason) -> Self {
        Self {
            mark_in_beta: true,
            ..Self::allow(reason)
        }
    }

    fn redirect(to: &str, reason: Reason) -> Self {
        Self {
            verdict: Verdict::Redirect(to.to_owned()),
            reason,
            mark_in_beta: false,
            delete_cookie: false,
        }
    }

    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

/// Per-request access decision.
#[derive(Debug, Clone)]
pub struct BetaGate {
    config: GateConfig,
    invitations: Arc<InvitationService>,
}

impl BetaGate {
    #[must_use]
    pub fn new(config: GateConfig, invitations: Arc<InvitationService>) -> Self {
        Self {
            config,
            invitations,
        }
    }

    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Whether the path or route passes without looking at the visitor.
    #[must_use]
    pub fn is_allow_listed(&self, path: &str, route: Option<&str>) -> bool {
        let c = &self.config;

        if c.allow_paths.iter().any(|p| p == path)
            || (c.append_slash && c.allow_paths.iter().any(|p| *p == format!("{path}/")))
        {
            return true;
        }

        if BUILTIN_ALLOW_PREFIXES
            .iter()
            .copied()
            .chain(c.allow_prefixes.iter().map(String::as_str))
            .any(|prefix| path.starts_with(prefix))
        {
            return true;
        }

        c.always_allow_views
            .iter()
            .any(|v| v == path || route.is_some_and(|r| r == v))
    }

    /// Decide one request.
    ///
    /// May write to the repository: a waitlist request is recorded for a
    /// user with nothing at all, a granted invitation is marked used, and a
    /// cookie invitation is redeemed.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] if the repository fails.
    pub async fn evaluate(&self, req: &GateRequest<'_>) -> Result<GateOutcome, GateError> {
        if !self.config.enabled {
            return Ok(GateOutcome::allow(Reason::Disabled));
        }

        if self.is_allow_listed(req.path, req.route) {
            return Ok(GateOutcome::allow(Reason::AllowListed));
        }

        let Some(user) = req.user else {
            return Ok(GateOutcome::redirect(&self.config.redirect, Reason::Anonymous));
        };

        if user.is_staff {
            return Ok(GateOutcome::allow(Reason::Staff));
        }

        // Cached from an earlier request; skips the queries below.
        if req.session_in_beta {
            return Ok(GateOutcome::allow(Reason::SessionInBeta));
        }

        let repo = self.invitations.repository();
        let invitations = repo.invitations_for_user(user.id).await?;

        if invitations.is_empty() && req.cookie_code.is_none() {
            repo.create_invitation(&Invitation::request_for(user))
                .await?;
            tracing::info!(user_id = %user.id, "beta access requested");
            return Ok(GateOutcome::redirect(
                &self.config.redirect,
                Reason::RequestRecorded,
            ));
        }

        if invitations.iter().any(Invitation::is_used) {
            return Ok(GateOutcome::admit(Reason::AlreadyUsed));
        }

        if let Some(pending) = invitations.into_iter().find(Invitation::is_pending) {
            let mut activated = pending;
            activated.used = Some(Utc::now());
            repo.update_invitation(&activated).await?;
            tracing::info!(user_id = %user.id, invitation_id = %activated.id, "invitation activated");
            return Ok(GateOutcome::admit(Reason::InvitationActivated));
        }

        match self
            .invitations
            .invite_from_cookie_and_email(req.cookie_code, &user.email)
            .await?
        {
            CookieInvite::Found(invitation) => {
                match self.invitations.accept_invite(&invitation, user).await {
                    Ok(_) => Ok(GateOutcome::admit(Reason::CookieRedeemed)),
                    Err(InvitationError::Repository(RepositoryError::Exhausted { code })) => {
                        tracing::info!(user_id = %user.id, code = %code, "invitation code ran out");
                        Ok(GateOutcome {
                            delete_cookie: true,
                            ..GateOutcome::redirect(&self.config.redirect, Reason::NoAccess)
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            }
            CookieInvite::Stale => Ok(GateOutcome {
                delete_cookie: true,
                ..GateOutcome::redirect(&self.config.redirect, Reason::NoAccess)
            }),
            CookieInvite::NoCookie => Ok(GateOutcome::redirect(
                &self.config.redirect,
                Reason::NoAccess,
            )),
        }
    }
}
