#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the staff API and user-to-user invites.

mod common;

use axum::http::StatusCode;
use privbeta_core::models::{Invitation, InvitationCode};
use privbeta_core::repository::BetaRepository;
use serde_json::json;

use common::{body_json, location, test_app};

#[tokio::test]
async fn admin_requires_staff() {
    let t = test_app();

    let response = t.get("/admin/codes", "").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "unauthorized");

    let bob = t.user("bob", false).await;
    let cookie = t.session_for(&bob).await;
    let response = t.get("/admin/codes", &cookie).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_and_list_codes() {
    let t = test_app();
    let admin = t.user("admin", true).await;
    let cookie = t.session_for(&admin).await;
    t.user("alice", false).await;

    let response = t
        .post_json(
            "/admin/codes",
            &cookie,
            &json!({ "code": "launch", "max_invites": 3, "owner": "alice" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let code = body_json(response).await;
    assert_eq!(code["code"], "launch");
    assert_eq!(code["num_invites"], 3);
    assert_eq!(code["private"], true);

    // Generated code.
    let response = t.post_json("/admin/codes", &cookie, &json!({})).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["code"].as_str().unwrap().len(), 16);

    // Duplicate.
    let response = t
        .post_json("/admin/codes", &cookie, &json!({ "code": "launch" }))
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Unknown owner.
    let response = t
        .post_json("/admin/codes", &cookie, &json!({ "owner": "nobody" }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = t.get("/admin/codes", &cookie).await;
    assert_eq!(response.status(), StatusCode::OK);
    let codes = body_json(response).await;
    let launch = codes
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["code"] == "launch")
        .unwrap();
    assert_eq!(launch["remaining_invites"], 3);
}

#[tokio::test]
async fn staff_grants_a_waitlist_request() {
    let t = test_app();
    let admin = t.user("admin", true).await;
    let staff_cookie = t.session_for(&admin).await;

    let cary = t.user("cary", false).await;
    let cary_cookie = t.session_for(&cary).await;
    assert_eq!(
        t.get("/", &cary_cookie).await.status(),
        StatusCode::SEE_OTHER
    );

    let response = t.get("/admin/invitations", &staff_cookie).await;
    let invitations = body_json(response).await;
    let id = invitations[0]["id"].as_str().unwrap().to_owned();

    let response = t
        .post_json(&format!("/admin/invitations/{id}/send"), &staff_cookie, &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["delivery"], "sent");
    assert!(body["invitation"]["invited"].is_string());

    let outbox = t.outbox.outbox();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].to, "cary@example.com");
    assert!(outbox[0].email.text.contains("http://beta.test/"));

    assert_eq!(t.get("/", &cary_cookie).await.status(), StatusCode::OK);

    // Sending again after use is rejected.
    let response = t
        .post_json(&format!("/admin/invitations/{id}/send"), &staff_cookie, &json!({}))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn staff_creates_email_invitation_with_code() {
    let t = test_app();
    let admin = t.user("admin", true).await;
    let cookie = t.session_for(&admin).await;
    t.repo
        .create_code(&InvitationCode::new("welcome").with_invites(10))
        .await
        .unwrap();

    let response = t
        .post_json(
            "/admin/invitations",
            &cookie,
            &json!({ "email": "dany@example.com", "code": "welcome", "invited": true }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["delivery"], "sent");
    assert_eq!(body["invitation"]["email"], "dany@example.com");

    let outbox = t.outbox.outbox();
    assert!(outbox[0].email.text.contains("http://beta.test/beta/verify/welcome"));

    // Neither email nor username.
    let response = t
        .post_json("/admin/invitations", &cookie, &json!({ "invited": true }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Not granted yet, so nothing is sent.
    let response = t
        .post_json(
            "/admin/invitations",
            &cookie,
            &json!({ "email": "later@example.com", "code": "welcome" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(body_json(response).await["delivery"].is_null());
    assert_eq!(t.outbox.outbox().len(), 1);
}

#[tokio::test]
async fn send_code_emails_a_bare_code() {
    let t = test_app();
    let admin = t.user("admin", true).await;
    let cookie = t.session_for(&admin).await;
    t.repo
        .create_code(&InvitationCode::new("bare").with_invites(1))
        .await
        .unwrap();

    let response = t
        .post_json(
            "/admin/codes/bare/send",
            &cookie,
            &json!({ "email": "friend@example.com" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["delivery"], "sent");
    assert!(t.repo.list_invitations().await.unwrap().is_empty());

    let response = t
        .post_json(
            "/admin/codes/missing/send",
            &cookie,
            &json!({ "email": "friend@example.com" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn users_invite_with_an_owned_code() {
    let t = test_app();
    let alice = t.user("alice", false).await;
    let cookie = t.session_for(&alice).await;

    // No owned code yet.
    let response = t
        .post_form("/beta/invite", &cookie, "email=bob%40example.com")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let code = t
        .repo
        .create_code(
            &InvitationCode::new("alicecode")
                .with_invites(2)
                .with_owner(alice.id),
        )
        .await
        .unwrap();

    let response = t
        .post_form("/beta/invite", &cookie, "email=bob%40example.com")
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response).as_deref(), Some("/beta/verified"));

    let sent: Vec<Invitation> = t
        .repo
        .list_invitations()
        .await
        .unwrap()
        .into_iter()
        .filter(|i| i.code_id == Some(code.id))
        .collect();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].email, "bob@example.com");
    assert!(sent[0].is_pending());

    let outbox = t.outbox.outbox();
    assert_eq!(outbox[0].to, "bob@example.com");
    assert!(outbox[0].email.text.contains("/beta/verify/alicecode"));

    // Anonymous visitors cannot send invites.
    let response = t.post_form("/beta/invite", "", "email=x%40example.com").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
