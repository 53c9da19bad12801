//! HTTP route handlers for `privbeta`.
//!
//! Routes are organized by audience:
//! - `beta`: code redemption, waitlist pages, user-to-user invites
//! - `auth`: registration, login, logout
//! - `admin`: staff JSON API over codes and invitations
//! - `home`: the demo page behind the gate

pub mod admin;
pub mod auth;
pub mod beta;
pub mod home;

use axum::Json;
use serde::Serialize;

use privbeta_core::mail::html_escape;

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe. Sits outside the gate.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

const PAGE_CSS: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<style>
body{font-family:system-ui,sans-serif;max-width:36rem;margin:4rem auto;padding:0 1rem;color:#1f2328}
h1{font-size:1.5rem}
form{display:flex;gap:.5rem;margin-top:1.5rem}
input{flex:1;padding:.5rem}
button{padding:.5rem 1rem}
</style>
"#;

/// Render a minimal standalone page. `title` is escaped, `content` is not.
pub(crate) fn page(title: &str, content: &str) -> String {
    let title = html_escape(title);
    let mut html = String::with_capacity(PAGE_CSS.len() + content.len() + 128);
    html.push_str(PAGE_CSS);
    html.push_str("<title>");
    html.push_str(&title);
    html.push_str("</title>\n</head>\n<body>\n<h1>");
    html.push_str(&title);
    html.push_str("</h1>\n");
    html.push_str(content);
    html.push_str("\n</body>\n</html>");
    html
}
