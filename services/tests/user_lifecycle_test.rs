//! End-to-end tests for the user lifecycle over the full router.

mod common;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::TestApp;
use roster_services::{
    config::Config,
    identity::IdentityCall,
    users::storage::{UserStatus, UserStorage},
};
use serde_json::{Value, json};
use uuid::Uuid;

#[tokio::test]
async fn duplicate_email_registration_is_rejected() {
    let app = TestApp::new();
    let body = json!({
        "name": "Alice",
        "email": "alice@example.com",
        "authId": Uuid::new_v4(),
    });

    let first = app.server.post("/users/register").json(&body).await;
    first.assert_status(StatusCode::OK);

    let second = app
        .server
        .post("/users/register")
        .json(&json!({
            "name": "Alice Again",
            "email": "alice@example.com",
            "authId": Uuid::new_v4(),
        }))
        .await;

    second.assert_status(StatusCode::CONFLICT);
    let error: Value = second.json();
    assert_eq!(error["error"], "user_already_exists");
    assert_eq!(error["message"], "A user with this email already exists.");
    assert_eq!(app.storage.len(), 1);
}

#[tokio::test]
async fn login_strictly_advances_last_login() {
    let app = TestApp::new();
    let alice = app.seed_user("Alice", "alice@example.com", UserStatus::Active);

    let mut previous = alice.user.last_login;
    for _ in 0..3 {
        let response = app
            .server
            .post("/users/login")
            .authorization_bearer(&alice.token)
            .await;
        response.assert_status(StatusCode::OK);

        let body: Value = response.json();
        assert_eq!(body["success"], true);
        let last_login: DateTime<Utc> = serde_json::from_value(body["lastLogin"].clone()).unwrap();
        assert!(last_login > previous);
        previous = last_login;
    }
}

#[tokio::test]
async fn login_requires_a_local_record() {
    let app = TestApp::new();
    let auth_id = app.identity.register_account("ghost@example.com", "pw");
    let token = app.identity.issue_session(auth_id);

    let response = app
        .server
        .post("/users/login")
        .authorization_bearer(&token)
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(app.storage.is_empty());
}

#[tokio::test]
async fn blocked_caller_cannot_change_status_but_active_caller_can() {
    let app = TestApp::new();
    let active = app.seed_user("Active", "active@example.com", UserStatus::Active);
    let blocked = app.seed_user("Blocked", "blocked@example.com", UserStatus::Blocked);
    let target = app.seed_user("Target", "target@example.com", UserStatus::Active);

    let rejected = app
        .server
        .patch("/users/status")
        .authorization_bearer(&blocked.token)
        .json(&json!({"ids": [target.user.id], "status": "blocked"}))
        .await;
    rejected.assert_status(StatusCode::FORBIDDEN);
    let body: Value = rejected.json();
    assert_eq!(body["error"], "account_blocked");

    let accepted = app
        .server
        .patch("/users/status")
        .authorization_bearer(&active.token)
        .json(&json!({"ids": [target.user.id], "status": "blocked"}))
        .await;
    accepted.assert_status(StatusCode::OK);
    let body: Value = accepted.json();
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn active_user_can_unblock_a_blocked_user() {
    let app = TestApp::new();
    let active = app.seed_user("Active", "active@example.com", UserStatus::Active);
    let blocked = app.seed_user("Blocked", "blocked@example.com", UserStatus::Blocked);

    app.server
        .patch("/users/status")
        .authorization_bearer(&active.token)
        .json(&json!({"ids": [blocked.user.id], "status": "active"}))
        .await
        .assert_status(StatusCode::OK);

    let stored = app
        .storage
        .get_user(blocked.user.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, UserStatus::Active);
}

#[tokio::test]
async fn blocking_is_visible_in_status_query() {
    let app = TestApp::new();
    let admin = app.seed_user("Admin", "admin@example.com", UserStatus::Active);
    let x = app.seed_user("X", "x@example.com", UserStatus::Active);

    app.server
        .patch("/users/status")
        .authorization_bearer(&admin.token)
        .json(&json!({"ids": [x.user.id], "status": "blocked"}))
        .await
        .assert_status(StatusCode::OK);

    let response = app
        .server
        .get("/users/status")
        .authorization_bearer(&x.token)
        .await;
    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["id"], x.user.id.to_string());
    assert_eq!(body["status"], "blocked");
}

#[tokio::test]
async fn status_query_without_session_is_401() {
    let app = TestApp::new();

    app.server
        .get("/users/status")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_is_accepted_by_the_gate() {
    let app = TestApp::new();
    let alice = app.seed_user("Alice", "alice@example.com", UserStatus::Active);

    let response = app
        .server
        .get("/users/status")
        .add_header("cookie", format!("sb-access-token={}", alice.token))
        .await;

    response.assert_status(StatusCode::OK);
}

#[tokio::test]
async fn self_delete_signs_out_before_any_provider_delete() {
    let app = TestApp::new();
    let alice = app.seed_user("Alice", "alice@example.com", UserStatus::Active);
    let bob = app.seed_user("Bob", "bob@example.com", UserStatus::Active);

    let response = app
        .server
        .delete(&format!("/users?ids={},{}", alice.user.id, bob.user.id))
        .authorization_bearer(&alice.token)
        .await;
    response.assert_status(StatusCode::OK);

    let calls = app.identity.calls();
    let sign_out = calls
        .iter()
        .position(|c| {
            matches!(c, IdentityCall::SignOut { access_token } if *access_token == alice.token)
        })
        .expect("caller was signed out");
    let first_delete = calls
        .iter()
        .position(|c| matches!(c, IdentityCall::AdminDeleteUser { .. }))
        .expect("provider delete issued");
    assert!(sign_out < first_delete);

    // The revoked session no longer passes the gate.
    app.server
        .get("/users")
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn self_delete_can_be_disabled() {
    let app = TestApp::with_config(Config::new_for_test_with_self_actions(true, false));
    let alice = app.seed_user("Alice", "alice@example.com", UserStatus::Active);

    let response = app
        .server
        .delete(&format!("/users?ids={}", alice.user.id))
        .authorization_bearer(&alice.token)
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"], "self_action_denied");
    assert!(app.identity.calls().iter().all(|c| matches!(c, IdentityCall::GetUser { .. })));
    assert_eq!(app.storage.len(), 1);
}

#[tokio::test]
async fn targets_without_auth_id_make_no_provider_call() {
    let app = TestApp::new();
    let admin = app.seed_user("Admin", "admin@example.com", UserStatus::Active);
    let legacy = app.seed_legacy_user("Legacy", "legacy@example.com");

    let response = app
        .server
        .delete(&format!("/users?ids={}", legacy.id))
        .authorization_bearer(&admin.token)
        .await;

    response.assert_status(StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["message"], "Successfully deleted users");
    assert!(app.provider_deletes().is_empty());
    assert!(app.storage.get_user(legacy.id).await.unwrap().is_none());
}

#[tokio::test]
async fn listing_is_sorted_by_email() {
    let app = TestApp::new();
    let caller = app.seed_user("Mallory", "mallory@example.com", UserStatus::Active);
    app.seed_user("Zoe", "zoe@example.com", UserStatus::Active);
    app.seed_legacy_user("Adam", "adam@example.com");
    app.seed_user("Carl", "carl@example.com", UserStatus::Blocked);

    let response = app
        .server
        .get("/users")
        .authorization_bearer(&caller.token)
        .await;
    response.assert_status(StatusCode::OK);

    let users: Vec<Value> = response.json();
    let emails: Vec<&str> = users.iter().map(|u| u["email"].as_str().unwrap()).collect();
    assert_eq!(
        emails,
        vec![
            "adam@example.com",
            "carl@example.com",
            "mallory@example.com",
            "zoe@example.com"
        ]
    );
}

#[tokio::test]
async fn listing_allows_blocked_callers() {
    let app = TestApp::new();
    let blocked = app.seed_user("Blocked", "blocked@example.com", UserStatus::Blocked);

    app.server
        .get("/users")
        .authorization_bearer(&blocked.token)
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn full_lifecycle_scenario() {
    let app = TestApp::new();
    let admin = app.seed_user("Admin", "admin@example.com", UserStatus::Active);
    let a = app.seed_legacy_user("A", "a@example.com");
    let b = app.seed_user("B", "b@example.com", UserStatus::Active);

    // Block A, then unblock it again.
    for status in ["blocked", "active"] {
        app.server
            .patch("/users/status")
            .authorization_bearer(&admin.token)
            .json(&json!({"ids": [a.id], "status": status}))
            .await
            .assert_status(StatusCode::OK);
    }
    let stored_a = app.storage.get_user(a.id).await.unwrap().unwrap();
    assert_eq!(stored_a.status, UserStatus::Active);

    // Delete A and B; only B has a provider account.
    let response = app
        .server
        .delete(&format!("/users?ids={},{}", a.id, b.user.id))
        .authorization_bearer(&admin.token)
        .await;
    response.assert_status(StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["message"], "Successfully deleted users");
    assert_eq!(body["status"], 200);
    assert_eq!(app.provider_deletes(), vec![b.auth_id]);

    let outcomes: Vec<(&str, &str)> = body["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| (r["id"].as_str().unwrap(), r["outcome"].as_str().unwrap()))
        .collect();
    let a_id = a.id.to_string();
    let b_id = b.user.id.to_string();
    assert!(outcomes.contains(&(a_id.as_str(), "local_only")));
    assert!(outcomes.contains(&(b_id.as_str(), "deleted")));

    assert_eq!(app.storage.len(), 1);
    assert!(!app.identity.account_exists(b.auth_id));
}
