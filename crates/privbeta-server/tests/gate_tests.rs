#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the beta gate as seen through the router: the
//! redirect for visitors without access, the code cookie flow, the session
//! cache and staff access.

mod common;

use axum::http::StatusCode;
use chrono::Utc;
use privbeta_core::models::{Invitation, InvitationCode};
use privbeta_core::repository::BetaRepository;
use privbeta_server::cookies::{CODE_COOKIE, SESSION_COOKIE};

use common::{body_text, cookie_pair, location, set_cookie, test_app, test_app_with};

#[tokio::test]
async fn anonymous_visitors_are_redirected() {
    let t = test_app();

    let response = t.get("/invited-only", "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/beta/not-in-beta"));
}

#[tokio::test]
async fn health_and_beta_pages_are_public() {
    let t = test_app();

    assert_eq!(t.get("/health", "").await.status(), StatusCode::OK);
    for path in ["/beta/not-in-beta", "/beta/verified", "/beta/invalid"] {
        assert_eq!(t.get(path, "").await.status(), StatusCode::OK, "{path}");
    }
}

#[tokio::test]
async fn allow_listed_views_and_paths() {
    let t = test_app_with(&[
        ("PRIVBETA_ALWAYS_ALLOW_VIEWS", "/docs/{page},/always-allow"),
        ("PRIVBETA_ALLOW_PATHS", "/about/"),
    ]);

    assert_eq!(t.get("/docs/intro", "").await.status(), StatusCode::OK);
    assert_eq!(t.get("/always-allow", "").await.status(), StatusCode::OK);
    assert_eq!(t.get("/about/", "").await.status(), StatusCode::OK);
    assert_eq!(
        t.get("/invited-only", "").await.status(),
        StatusCode::SEE_OTHER
    );
}

#[tokio::test]
async fn disabled_gate_lets_everyone_in() {
    let t = test_app_with(&[("PRIVBETA_ENABLE", "false")]);
    assert_eq!(t.get("/invited-only", "").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn staff_are_always_let_in() {
    let t = test_app();
    let admin = t.user("admin", true).await;
    let cookie = t.session_for(&admin).await;

    let response = t.get("/invited-only", &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "secret stuff");
}

#[tokio::test]
async fn uninvited_user_joins_the_waitlist() {
    let t = test_app();
    let cary = t.user("cary", false).await;
    let cookie = t.session_for(&cary).await;

    let response = t.get("/invited-only", &cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    // A second visit does not add another request.
    t.get("/invited-only", &cookie).await;

    let invitations = t.repo.invitations_for_user(cary.id).await.unwrap();
    assert_eq!(invitations.len(), 1);
    assert_eq!(invitations[0].email, "cary@example.com");
    assert!(invitations[0].invited.is_none());
}

#[tokio::test]
async fn code_link_then_signup_grants_access() {
    let t = test_app();
    let code = t
        .repo
        .create_code(&InvitationCode::new("foobar").with_invites(100))
        .await
        .unwrap();
    t.repo
        .create_invitation(
            &Invitation::for_email(&code, "dany@example.com").invited_at(Utc::now()),
        )
        .await
        .unwrap();

    // Following the link stores a signed code cookie.
    let response = t.get("/beta/verify/foobar", "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/beta/verified"));
    let code_cookie = cookie_pair(&response, CODE_COOKIE).unwrap();
    assert!(code_cookie.starts_with("privbeta_code=foobar%3A"));

    let dany = t.user("dany", false).await;
    let session = t.session_for(&dany).await;

    let response = t
        .get("/invited-only", &format!("{session}; {code_cookie}"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let invitations = t.repo.invitations_for_user(dany.id).await.unwrap();
    assert_eq!(invitations.len(), 1);
    assert!(invitations[0].is_used());
    assert_eq!(t.repo.get_code(code.id).await.unwrap().num_invites, 99);

    // The decision is cached in the session; the cookie is no longer needed.
    let response = t.get("/invited-only", &session).await;
    assert_eq!(response.status(), StatusCode::OK);
    let sid = session.trim_start_matches(&format!("{SESSION_COOKIE}="));
    assert!(t.repo.load_session(sid).await.unwrap().unwrap().in_beta);
}

#[tokio::test]
async fn granted_waitlist_request_is_activated() {
    let t = test_app();
    let cary = t.user("cary", false).await;
    let cookie = t.session_for(&cary).await;
    t.get("/invited-only", &cookie).await;

    let mut invitation = t.repo.invitations_for_user(cary.id).await.unwrap().remove(0);
    invitation.invited = Some(Utc::now());
    t.repo.update_invitation(&invitation).await.unwrap();

    let response = t.get("/invited-only", &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        t.repo
            .get_invitation(invitation.id)
            .await
            .unwrap()
            .is_used()
    );
}

#[tokio::test]
async fn tampered_code_cookie_is_removed() {
    let t = test_app();
    t.repo
        .create_code(&InvitationCode::new("foobar").with_invites(5))
        .await
        .unwrap();
    let eve = t.user("eve", false).await;
    let session = t.session_for(&eve).await;

    let response = t
        .get(
            "/invited-only",
            &format!("{session}; {CODE_COOKIE}=foobar%3Adeadbeef"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let removal = set_cookie(&response, CODE_COOKIE).unwrap();
    assert!(removal.contains("Max-Age=0"));
}

#[tokio::test]
async fn stale_code_cookie_is_removed() {
    let t = test_app();
    t.repo
        .create_code(&InvitationCode::new("foobar").with_invites(5))
        .await
        .unwrap();
    let code_cookie = cookie_pair(&t.get("/beta/verify/foobar", "").await, CODE_COOKIE).unwrap();

    // eve has no invitation on the code.
    let eve = t.user("eve", false).await;
    let session = t.session_for(&eve).await;

    let response = t
        .get("/invited-only", &format!("{session}; {code_cookie}"))
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(
        set_cookie(&response, CODE_COOKIE)
            .unwrap()
            .contains("Max-Age=0")
    );
}

#[tokio::test]
async fn overlong_code_goes_to_invalid_page() {
    let t = test_app();
    let response = t.get(&format!("/beta/verify/{}", "x".repeat(31)), "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/beta/invalid"));
    assert!(set_cookie(&response, CODE_COOKIE).is_none());
}

#[tokio::test]
async fn not_in_beta_page_forwards_users_with_access() {
    let t = test_app();
    let cary = t.user("cary", false).await;
    let cookie = t.session_for(&cary).await;

    let response = t.get("/beta/not-in-beta", &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut invitation = Invitation::request_for(&cary);
    invitation.invited = Some(Utc::now());
    t.repo.create_invitation(&invitation).await.unwrap();

    let response = t.get("/beta/not-in-beta", &cookie).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/beta/verified"));
}

#[tokio::test]
async fn not_in_beta_page_drops_a_stale_code_cookie() {
    let t = test_app();
    t.repo
        .create_code(&InvitationCode::new("foobar").with_invites(5))
        .await
        .unwrap();
    let code_cookie = cookie_pair(&t.get("/beta/verify/foobar", "").await, CODE_COOKIE).unwrap();

    // eve has no invitation on the code.
    let eve = t.user("eve", false).await;
    let session = t.session_for(&eve).await;

    let response = t
        .get("/beta/not-in-beta", &format!("{session}; {code_cookie}"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        set_cookie(&response, CODE_COOKIE)
            .unwrap()
            .contains("Max-Age=0")
    );

    // Without a cookie there is nothing to drop.
    let response = t.get("/beta/not-in-beta", &session).await;
    assert!(set_cookie(&response, CODE_COOKIE).is_none());
}

#[tokio::test]
async fn oversized_session_ttl_is_ignored() {
    let t = test_app_with(&[("PRIVBETA_SESSION_TTL_SECS", "100000000000000")]);
    assert_eq!(t.get("/health", "").await.status(), StatusCode::OK);

    let response = t.get("/invited-only", "").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn security_headers_are_set() {
    let t = test_app();
    let response = t.get("/health", "").await;
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["cache-control"], "no-store");
}
