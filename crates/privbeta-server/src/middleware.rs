//! Session, beta gate and staff middleware.
//!
//! [`session_middleware`] wraps every route: it loads the session named by
//! the `privbeta_session` cookie, injects a [`SessionHandle`] and the
//! [`CurrentUser`] into the request extensions, and writes the session back
//! after the handler if it changed.
//!
//! [`beta_gate`] runs inside it as a route layer, so the matched route
//! pattern is known. [`require_staff`] guards the admin API.

use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::http::header::SET_COOKIE;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tokio::sync::Mutex;
use uuid::Uuid;

use privbeta_core::error::RepositoryError;
use privbeta_core::gate::{GateRequest, Verdict};
use privbeta_core::models::{Session, User};

use crate::cookies::{self, CODE_COOKIE, SESSION_COOKIE};
use crate::error::AppError;
use crate::state::AppState;

/// The signed-in user, if any. Injected by [`session_middleware`].
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<User>);

impl CurrentUser {
    /// The user, or 401.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unauthorized`] for anonymous requests.
    pub fn require(self) -> Result<User, AppError> {
        self.0
            .ok_or_else(|| AppError::Unauthorized("sign in required".to_owned()))
    }
}

#[derive(Debug)]
struct SessionSlot {
    session: Session,
    ttl: chrono::Duration,
    /// Row exists in the repository.
    persisted: bool,
    dirty: bool,
    destroyed: bool,
    /// Previous ID after a login rotated the session.
    replaced: Option<String>,
}

/// Request-scoped access to the current session.
#[derive(Debug, Clone)]
pub struct SessionHandle(Arc<Mutex<SessionSlot>>);

impl SessionHandle {
    fn new(loaded: Option<Session>, ttl: chrono::Duration) -> Self {
        let persisted = loaded.is_some();
        Self(Arc::new(Mutex::new(SessionSlot {
            session: loaded.unwrap_or_else(|| Session::new(ttl)),
            ttl,
            persisted,
            dirty: false,
            destroyed: false,
            replaced: None,
        })))
    }

    pub async fn user_id(&self) -> Option<Uuid> {
        self.0.lock().await.session.user_id
    }

    pub async fn in_beta(&self) -> bool {
        self.0.lock().await.session.in_beta
    }

    /// Cache a positive gate decision.
    pub async fn mark_in_beta(&self) {
        let mut slot = self.0.lock().await;
        if !slot.session.in_beta {
            slot.session.in_beta = true;
            slot.dirty = true;
        }
    }

    /// Bind the session to `user_id` under a fresh session ID.
    pub async fn login(&self, user_id: Uuid) {
        let mut slot = self.0.lock().await;
        let mut fresh = Session::new(slot.ttl);
        fresh.user_id = Some(user_id);
        if slot.persisted {
            slot.replaced = Some(slot.session.id.clone());
        }
        slot.session = fresh;
        slot.destroyed = false;
        slot.dirty = true;
    }

    /// Drop the session and its cookie.
    pub async fn logout(&self) {
        let mut slot = self.0.lock().await;
        slot.destroyed = true;
        slot.dirty = false;
    }

    /// Persist changes and set or clear the session cookie.
    async fn commit(
        &self,
        state: &AppState,
        response: &mut Response,
        stale_cookie: bool,
    ) -> Result<(), AppError> {
        let slot = self.0.lock().await;

        if let Some(old) = &slot.replaced {
            state.repo.delete_session(old).await?;
        }

        if slot.destroyed {
            if slot.persisted {
                state.repo.delete_session(&slot.session.id).await?;
            }
            response
                .headers_mut()
                .append(SET_COOKIE, cookies::removal(SESSION_COOKIE));
        } else if slot.dirty {
            state.repo.save_session(&slot.session).await?;
            let cookie = cookies::set(
                SESSION_COOKIE,
                &slot.session.id,
                Some(slot.ttl.num_seconds()),
                state.secure_cookies,
            )?;
            response.headers_mut().append(SET_COOKIE, cookie);
        } else if stale_cookie {
            response
                .headers_mut()
                .append(SET_COOKIE, cookies::removal(SESSION_COOKIE));
        }

        Ok(())
    }
}

/// Middleware that loads the session and the signed-in user.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the session store fails.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie_id = cookies::read(req.headers(), SESSION_COOKIE);

    let loaded = match &cookie_id {
        Some(id) => state.repo.load_session(id).await?,
        None => None,
    };
    let stale_cookie = cookie_id.is_some() && loaded.is_none();

    let user = match loaded.as_ref().and_then(|s| s.user_id) {
        Some(id) => match state.repo.get_user(id).await {
            Ok(user) => Some(user),
            Err(RepositoryError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        },
        None => None,
    };

    let handle = SessionHandle::new(loaded, state.session_ttl);
    req.extensions_mut().insert(handle.clone());
    req.extensions_mut().insert(CurrentUser(user));

    let mut response = next.run(req).await;
    handle.commit(&state, &mut response, stale_cookie).await?;
    Ok(response)
}

/// Middleware that enforces the private beta.
///
/// Redirects visitors without access, caches positive decisions in the
/// session and drops invitation code cookies that are stale or whose
/// signature does not verify.
///
/// # Errors
///
/// Returns [`AppError::Internal`] if the gate cannot reach the repository.
pub async fn beta_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = req.uri().path().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned());
    let session = req.extensions().get::<SessionHandle>().cloned();
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .and_then(|c| c.0.clone());

    let raw_code = cookies::read(req.headers(), CODE_COOKIE);
    let cookie_code = raw_code.as_deref().and_then(|v| state.signer.verify(v));
    let tampered = raw_code.is_some() && cookie_code.is_none();
    if tampered {
        tracing::warn!(path = %path, "invitation code cookie failed signature check");
    }

    let session_in_beta = match &session {
        Some(s) => s.in_beta().await,
        None => false,
    };

    let outcome = state
        .gate
        .evaluate(&GateRequest {
            path: &path,
            route: route.as_deref(),
            user: user.as_ref(),
            session_in_beta,
            cookie_code: cookie_code.as_deref(),
        })
        .await?;

    tracing::debug!(
        path = %path,
        user_id = ?user.as_ref().map(|u| u.id),
        reason = ?outcome.reason,
        allowed = outcome.is_allowed(),
        "beta gate decision"
    );

    if outcome.mark_in_beta {
        if let Some(s) = &session {
            s.mark_in_beta().await;
        }
    }

    let mut response = match outcome.verdict {
        Verdict::Allow => next.run(req).await,
        Verdict::Redirect(to) => Redirect::to(&to).into_response(),
    };

    // A handler that sets a new code cookie wins over the removal.
    if (outcome.delete_cookie || tampered) && !cookies::is_set(response.headers(), CODE_COOKIE) {
        response
            .headers_mut()
            .append(SET_COOKIE, cookies::removal(CODE_COOKIE));
    }

    Ok(response)
}

/// Middleware that admits staff users only.
///
/// # Errors
///
/// Returns [`AppError::Unauthorized`] for anonymous requests and
/// [`AppError::Forbidden`] for non-staff users.
pub async fn require_staff(req: Request, next: Next) -> Result<Response, AppError> {
    let is_staff = req
        .extensions()
        .get::<CurrentUser>()
        .and_then(|c| c.0.as_ref())
        .map(|u| u.is_staff);

    match is_staff {
        None => Err(AppError::Unauthorized("sign in required".to_owned())),
        Some(false) => Err(AppError::Forbidden("staff only".to_owned())),
        Some(true) => Ok(next.run(req).await),
    }
}
