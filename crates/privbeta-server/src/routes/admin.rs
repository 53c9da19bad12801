//! Staff API: `/admin/*`
//!
//! JSON endpoints for managing invitation codes and granting access. Every
//! route requires a staff user (see `require_staff`).

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use privbeta_core::invitation::{CodeSummary, NewCode, SavedInvitation};
use privbeta_core::mail::Delivery;
use privbeta_core::models::{Invitation, InvitationCode};

use crate::error::AppError;
use crate::state::AppState;

/// Build the `/admin` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/codes", get(list_codes).post(create_code))
        .route("/codes/{code}/send", post(send_code))
        .route("/invitations", get(list_invitations).post(create_invitation))
        .route("/invitations/{id}/send", post(send_invitation))
}

// ── Request / Response types ─────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_invites() -> u16 {
    1
}

/// Request body for `POST /admin/codes`.
#[derive(Debug, Deserialize)]
pub struct CreateCodeRequest {
    /// Empty or missing to generate one.
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_true")]
    pub private: bool,
    #[serde(default = "default_invites")]
    pub max_invites: u16,
    /// Username allowed to hand the code out.
    pub owner: Option<String>,
}

/// Request body for `POST /admin/invitations`.
///
/// At least one of `email` and `username` is required.
#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    /// Code string to attach.
    pub code: Option<String>,
    /// Grant access now.
    #[serde(default)]
    pub invited: bool,
    /// Send the invite email when access is granted.
    #[serde(default = "default_true")]
    pub notify: bool,
}

/// Request body for `POST /admin/codes/{code}/send`.
#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

/// An invitation and the outcome of its email, if one was attempted.
#[derive(Debug, Serialize)]
pub struct InvitationResponse {
    pub invitation: Invitation,
    pub delivery: Option<Delivery>,
}

impl From<SavedInvitation> for InvitationResponse {
    fn from(saved: SavedInvitation) -> Self {
        Self {
            invitation: saved.invitation,
            delivery: saved.delivery,
        }
    }
}

/// Response body for `POST /admin/codes/{code}/send`.
#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub delivery: Delivery,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn list_codes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CodeSummary>>, AppError> {
    Ok(Json(state.invitations.code_summaries().await?))
}

async fn create_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateCodeRequest>,
) -> Result<(StatusCode, Json<InvitationCode>), AppError> {
    let owner_id = match body.owner.as_deref() {
        Some(username) => Some(
            state
                .repo
                .find_user_by_username(username)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user not found: {username}")))?
                .id,
        ),
        None => None,
    };

    let code = state
        .invitations
        .create_code(NewCode {
            code: body.code.trim().to_owned(),
            private: body.private,
            max_invites: body.max_invites,
            owner_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(code)))
}

async fn send_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(body): Json<SendCodeRequest>,
) -> Result<Json<DeliveryResponse>, AppError> {
    let delivery = state
        .invitations
        .send_code(&code, body.email.trim())
        .await?;
    Ok(Json(DeliveryResponse { delivery }))
}

async fn list_invitations(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Invitation>>, AppError> {
    Ok(Json(state.repo.list_invitations().await?))
}

async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), AppError> {
    let user = match body.username.as_deref() {
        Some(username) => Some(
            state
                .repo
                .find_user_by_username(username)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("user not found: {username}")))?,
        ),
        None => None,
    };

    let email = body.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    let mut invitation = match (&user, email) {
        (Some(user), _) => Invitation::request_for(user),
        (None, Some(email)) => Invitation::for_address(email),
        (None, None) => {
            return Err(AppError::BadRequest(
                "one of 'email' or 'username' is required".to_owned(),
            ));
        }
    };
    if let Some(email) = email {
        invitation.email = email.to_owned();
    }

    if let Some(code) = body.code.as_deref() {
        let code = state
            .repo
            .find_code(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("invitation code not found: {code}")))?;
        invitation.code_id = Some(code.id);
    }

    if body.invited {
        invitation.invited = Some(Utc::now());
    }

    let saved = state
        .invitations
        .save_invitation(invitation, body.notify)
        .await?;

    tracing::info!(invitation = %saved.invitation, "invitation created by staff");
    Ok((StatusCode::CREATED, Json(saved.into())))
}

async fn send_invitation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<InvitationResponse>, AppError> {
    let saved = state.invitations.send_invitation(id).await?;
    Ok(Json(saved.into()))
}
