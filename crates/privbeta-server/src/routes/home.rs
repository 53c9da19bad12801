//! The demo page behind the gate.

use std::sync::Arc;

use axum::response::Html;
use axum::routing::get;
use axum::{Extension, Router};

use privbeta_core::mail::html_escape;

use super::page;
use crate::middleware::CurrentUser;
use crate::state::AppState;

/// Build the home router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(home))
}

async fn home(Extension(current): Extension<CurrentUser>) -> Html<String> {
    let name = current
        .0
        .as_ref()
        .map_or_else(|| "there".to_owned(), |u| html_escape(&u.username));
    Html(page(
        "Welcome to the beta",
        &format!("<p>Hi {name}, you're in.</p>"),
    ))
}
