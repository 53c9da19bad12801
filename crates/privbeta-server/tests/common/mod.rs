//! Shared fixtures for router integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::get;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use privbeta_core::mail::{EmailTemplates, LogEmailSender};
use privbeta_core::models::{Session, User};
use privbeta_core::password::hash_password;
use privbeta_core::repository::{BetaRepository, MemoryRepository};
use privbeta_server::build_router;
use privbeta_server::config::ServerConfig;
use privbeta_server::cookies::SESSION_COOKIE;
use privbeta_server::routes;
use privbeta_server::state::AppState;

pub struct TestApp {
    pub app: Router,
    pub state: Arc<AppState>,
    pub repo: MemoryRepository,
    pub outbox: LogEmailSender,
}

/// App with default configuration and a few host routes.
pub fn test_app() -> TestApp {
    test_app_with(&[])
}

/// App with configuration overrides given as environment variables.
pub fn test_app_with(vars: &[(&str, &str)]) -> TestApp {
    let mut env: HashMap<String, String> = HashMap::from([
        ("PRIVBETA_SECRET_KEY".to_owned(), "test-secret".to_owned()),
        (
            "PRIVBETA_PUBLIC_URL".to_owned(),
            "http://beta.test".to_owned(),
        ),
    ]);
    for (k, v) in vars {
        env.insert((*k).to_owned(), (*v).to_owned());
    }
    let config = ServerConfig::from_vars(|k| env.get(k).cloned());

    let repo = MemoryRepository::new();
    let outbox = LogEmailSender::new();
    let state = Arc::new(AppState::new(
        &config,
        Arc::new(repo.clone()),
        Arc::new(outbox.clone()),
        EmailTemplates::default(),
    ));

    let host_routes = routes::home::router()
        .route("/invited-only", get(|| async { "secret stuff" }))
        .route("/always-allow", get(|| async { "public" }))
        .route("/docs/{page}", get(|| async { "docs" }))
        .route("/about/", get(|| async { "about" }));

    TestApp {
        app: build_router(Arc::clone(&state), host_routes),
        state,
        repo,
        outbox,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(req).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: &str) -> Response<Body> {
        let mut builder = Request::builder().uri(uri);
        if !cookie.is_empty() {
            builder = builder.header("cookie", cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, cookie: &str, body: &Value) -> Response<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if !cookie.is_empty() {
            builder = builder.header("cookie", cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    pub async fn post_form(&self, uri: &str, cookie: &str, body: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/x-www-form-urlencoded")
                .header("cookie", cookie)
                .body(Body::from(body.to_owned()))
                .unwrap(),
        )
        .await
    }

    /// Create a user directly in the repository.
    pub async fn user(&self, username: &str, staff: bool) -> User {
        self.repo
            .create_user(&User::new(
                username,
                &format!("{username}@example.com"),
                String::new(),
                staff,
            ))
            .await
            .unwrap()
    }

    /// A session cookie signed in as `user`.
    pub async fn session_for(&self, user: &User) -> String {
        let mut session = Session::new(chrono::Duration::hours(1));
        session.user_id = Some(user.id);
        self.repo.save_session(&session).await.unwrap();
        format!("{SESSION_COOKIE}={}", session.id)
    }

    /// Register through the API and return the session cookie.
    pub async fn register(&self, username: &str, password: &str) -> String {
        let response = self
            .post_json(
                "/auth/register",
                "",
                &serde_json::json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": password,
                }),
            )
            .await;
        assert_eq!(response.status(), 201, "registration should succeed");
        cookie_pair(&response, SESSION_COOKIE).expect("session cookie should be set")
    }

    /// Create a user with a real password hash.
    pub async fn user_with_password(&self, username: &str, password: &str, staff: bool) -> User {
        let hash = hash_password(password).unwrap();
        self.repo
            .create_user(&User::new(
                username,
                &format!("{username}@example.com"),
                hash,
                staff,
            ))
            .await
            .unwrap()
    }
}

/// `name=value` from the response's `Set-Cookie` for `name`.
pub fn cookie_pair(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookie(response, name).and_then(|c| c.split(';').next().map(str::to_owned))
}

/// The full `Set-Cookie` header for `name`.
pub fn set_cookie(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&format!("{name}=")))
        .map(str::to_owned)
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
