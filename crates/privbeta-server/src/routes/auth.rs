//! Account routes: `/auth/*`
//!
//! Minimal username/password accounts so the gate has someone to gate.
//! Passwords are hashed with argon2 on the blocking pool.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};
use serde::Deserialize;

use privbeta_core::models::User;
use privbeta_core::password::{hash_password, verify_password};

use crate::error::AppError;
use crate::middleware::SessionHandle;
use crate::state::AppState;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Build the `/auth` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

// ── Request types ────────────────────────────────────────────────────

/// Request body for `POST /auth/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for `POST /auth/login`. `username` may also be an email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn register(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let username = body.username.trim();
    let email = body.email.trim();

    if username.is_empty() {
        return Err(AppError::BadRequest("username is required".to_owned()));
    }
    if !email.contains('@') {
        return Err(AppError::BadRequest("a valid email is required".to_owned()));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let password = body.password;
    let hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))??;

    let user = state
        .repo
        .create_user(&User::new(username, email, hash, false))
        .await?;
    session.login(user.id).await;

    tracing::info!(user_id = %user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<SessionHandle>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<User>, AppError> {
    let invalid = || AppError::Unauthorized("invalid credentials".to_owned());
    let name = body.username.trim();

    let user = match state.repo.find_user_by_username(name).await? {
        Some(user) => user,
        None => state
            .repo
            .find_user_by_email(name)
            .await?
            .ok_or_else(invalid)?,
    };

    // Accounts created without a password cannot sign in.
    if user.password_hash.is_empty() {
        return Err(invalid());
    }

    let stored = user.password_hash.clone();
    let password = body.password;
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {e}")))??;

    if !ok {
        tracing::info!(username = %name, "login failed");
        return Err(invalid());
    }

    session.login(user.id).await;
    tracing::info!(user_id = %user.id, "user signed in");
    Ok(Json(user))
}

async fn logout(Extension(session): Extension<SessionHandle>) -> StatusCode {
    if let Some(user_id) = session.user_id().await {
        tracing::info!(user_id = %user_id, "user signed out");
    }
    session.logout().await;
    StatusCode::NO_CONTENT
}
