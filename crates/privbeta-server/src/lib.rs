//! `privbeta` HTTP server.
//!
//! Puts an invitation-only private beta in front of an Axum application.
//! [`build_router`] wraps the host's routes, together with the beta, auth and
//! staff routes, in the session and gate middleware.

pub mod config;
pub mod cookies;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS};
use axum::middleware as axum_mw;
use axum::routing::get;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{beta_gate, require_staff, session_middleware};
use crate::state::AppState;

/// Concurrent requests allowed on `/auth/*` (argon2 is memory-hungry).
pub const AUTH_CONCURRENCY_LIMIT: usize = 16;

/// Build the Axum router with all routes and middleware.
///
/// `app_routes` are the host application's routes; they sit behind the gate
/// like everything else except `/health`.
pub fn build_router(state: Arc<AppState>, app_routes: Router<Arc<AppState>>) -> Router {
    let auth_routes = routes::auth::router()
        .layer(tower::limit::ConcurrencyLimitLayer::new(AUTH_CONCURRENCY_LIMIT));

    let admin_routes = routes::admin::router().route_layer(axum_mw::from_fn(require_staff));

    let mut gated = Router::new()
        .nest("/beta", routes::beta::router())
        .nest("/auth", auth_routes)
        .nest("/admin", admin_routes)
        .merge(app_routes);

    if let Some(dir) = &state.static_dir {
        gated = gated.nest_service("/static", ServeDir::new(dir));
    }

    gated
        .route_layer(axum_mw::from_fn_with_state(Arc::clone(&state), beta_gate))
        .route("/health", get(routes::health))
        .layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            session_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
