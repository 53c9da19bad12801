//! Beta routes: `/beta/*`
//!
//! Always reachable through the gate. Handles code redemption links, the
//! waitlist page and invites sent by users who own a code.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::http::header::SET_COOKIE;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Extension, Form, Router};
use serde::Deserialize;

use privbeta_core::invitation::Access;
use privbeta_core::models::MAX_CODE_LEN;

use super::page;
use crate::cookies::{self, CODE_COOKIE};
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Build the `/beta` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verify/{code}", get(verify_invite))
        .route("/not-in-beta", get(not_in_beta))
        .route("/verified", get(verified))
        .route("/invalid", get(invalid))
        .route("/invite", post(send_invite))
}

/// Remember the code in a signed cookie and send the visitor on.
///
/// The code is checked later, by the gate, once the visitor is signed in.
async fn verify_invite(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    if code.len() > MAX_CODE_LEN {
        return Ok(Redirect::to("/beta/invalid").into_response());
    }

    let cookie = cookies::set(
        CODE_COOKIE,
        &state.signer.sign(&code),
        None,
        state.secure_cookies,
    )?;
    tracing::info!(code = %code, "invitation link followed");

    Ok((
        [(SET_COOKIE, cookie)],
        Redirect::to(&state.verified_redirect),
    )
        .into_response())
}

/// Waitlist page. Visitors who already have access are sent on, and a code
/// cookie that no longer resolves is dropped.
async fn not_in_beta(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut access = Access::Denied;
    if let Some(user) = &current.0 {
        let cookie_code = cookies::read(&headers, CODE_COOKIE)
            .and_then(|v| state.signer.verify(&v));
        access = state
            .invitations
            .has_access(user, cookie_code.as_deref())
            .await?;
    }

    if access.is_granted() {
        return Ok(Redirect::to(&state.verified_redirect).into_response());
    }

    let mut response = Html(page(
        "You're on the list",
        "<p>This site is in private beta. We have recorded your interest \
         and will email you an invitation as soon as a spot opens up.</p>",
    ))
    .into_response();
    if access == Access::DeniedStaleCookie {
        tracing::debug!("dropping stale invitation code cookie");
        response
            .headers_mut()
            .append(SET_COOKIE, cookies::removal(CODE_COOKIE));
    }
    Ok(response)
}

async fn verified() -> Html<String> {
    Html(page(
        "Invitation accepted",
        "<p>Thanks! Sign in or create an account with the email address the \
         invitation was sent to.</p>\n<p><a href=\"/\">Continue</a></p>",
    ))
}

async fn invalid() -> Html<String> {
    Html(page(
        "Invalid invitation",
        "<p>This invitation code is invalid or has already been used.</p>",
    ))
}

/// Form body for `POST /beta/invite`.
#[derive(Debug, Deserialize)]
struct InviteForm {
    email: String,
}

/// Invite an email address with a code the signed-in user owns.
async fn send_invite(
    State(state): State<Arc<AppState>>,
    Extension(current): Extension<CurrentUser>,
    Form(form): Form<InviteForm>,
) -> Result<Redirect, AppError> {
    let owner = current.require()?;
    let email = form.email.trim();

    state.invitations.invite_by_owner(&owner, email).await?;

    Ok(Redirect::to("/beta/verified"))
}
