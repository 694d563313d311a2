#![cfg(feature = "inmem-store")]

use actix_web::{test, App};
use askboard::auth::{create_jwt, Role};
use askboard::models::{NewUser, User};
use askboard::repo::inmem::InMemRepo;
use askboard::{config, AppState, SecurityHeaders};
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::Arc;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

async fn account(state: &AppState, name: &str, role: Role) -> (User, String) {
    let user = state
        .services
        .users
        .provision(NewUser { username: name.into(), email: format!("{name}@example.com"), role })
        .await
        .unwrap();
    let token = create_jwt(user.id, name, vec![role]).unwrap();
    (user, format!("Bearer {token}"))
}

fn state() -> AppState {
    AppState::new(Arc::new(InMemRepo::new()))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .wrap(SecurityHeaders::new())
                .app_data(actix_web::web::Data::new($state.clone()))
                .configure(config),
        )
        .await
    };
}

#[actix_web::test]
#[serial]
async fn question_moderation_and_vote_flow() {
    setup_env();
    let state = state();
    let (_, alice) = account(&state, "alice", Role::User).await;
    let (_, bob) = account(&state, "bob", Role::User).await;
    let (_, manager) = account(&state, "manager", Role::Manager).await;
    let app = app!(state);

    // create question (user) -> pending approval
    let req = test::TestRequest::post()
        .uri("/api/v1/questions")
        .insert_header(("Authorization", alice.clone()))
        .set_json(json!({"title": "How do I borrow twice?", "body": "details", "tags": ["Rust"]}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let q: Value = test::read_body_json(resp).await;
    let qid = q["id"].as_i64().unwrap();
    assert_eq!(q["is_approved"], false);
    assert_eq!(q["tags"], json!(["rust"]));

    // hidden from others until approved
    let req = test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "not_found");

    // users cannot moderate
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/mod/questions/{qid}/approve"))
        .insert_header(("Authorization", bob.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/mod/questions/{qid}/approve"))
        .insert_header(("Authorization", manager.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let approved: Value = test::read_body_json(resp).await;
    assert_eq!(approved["is_approved"], true);

    // anonymous view counts
    let req = test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}")).to_request();
    let viewed: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(viewed["views"], 1);

    // upvote toggles
    let upvote = || {
        test::TestRequest::post()
            .uri(&format!("/api/v1/questions/{qid}/upvote"))
            .insert_header(("Authorization", bob.clone()))
            .to_request()
    };
    let tally: Value = test::read_body_json(test::call_service(&app, upvote()).await).await;
    assert_eq!((tally["votes"].as_i64(), tally["voted"].as_bool()), (Some(1), Some(true)));
    let tally: Value = test::read_body_json(test::call_service(&app, upvote()).await).await;
    assert_eq!(tally["votes"], 0);

    // downvote without an upvote is a conflict
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/questions/{qid}/downvote"))
        .insert_header(("Authorization", bob.clone()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let err: Value = test::read_body_json(resp).await;
    assert_eq!(err["error"], "invalid_state");

    // unknown moderation verb is a path error
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/mod/questions/{qid}/destroy"))
        .insert_header(("Authorization", manager.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // alice was told about the approval
    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread-count")
        .insert_header(("Authorization", alice.clone()))
        .to_request();
    let count: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(count["count"], 1);
}

#[actix_web::test]
#[serial]
async fn report_resolution_over_http() {
    setup_env();
    let state = state();
    let (_, alice) = account(&state, "alice", Role::User).await;
    let (_, bob) = account(&state, "bob", Role::User).await;
    let (_, admin) = account(&state, "admin", Role::Admin).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/questions")
        .insert_header(("Authorization", admin.clone()))
        .set_json(json!({"title": "Staff post", "body": "approved at once"}))
        .to_request();
    let q: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let qid = q["id"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/questions/{qid}/answers"))
        .insert_header(("Authorization", bob.clone()))
        .set_json(json!({"body": "buy my product"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let a: Value = test::read_body_json(resp).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(("Authorization", alice.clone()))
        .set_json(json!({"entity_type": "ANSWER", "entity_id": a["id"], "reason": "spam"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: Value = test::read_body_json(resp).await;
    let rid = report["id"].as_i64().unwrap();
    assert_eq!(report["status"], "PENDING");

    let resolve = || {
        test::TestRequest::post()
            .uri(&format!("/api/v1/mod/reports/{rid}/resolve"))
            .insert_header(("Authorization", admin.clone()))
            .set_json(json!({"resolution": "removed"}))
            .to_request()
    };
    let resp = test::call_service(&app, resolve()).await;
    assert_eq!(resp.status(), 200);
    let outcome: Value = test::read_body_json(resp).await;
    assert_eq!(outcome["remediation"], "answer_deleted");
    assert_eq!(outcome["report"]["status"], "RESOLVED");

    let resp = test::call_service(&app, resolve()).await;
    assert_eq!(resp.status(), 409);

    let req = test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}/answers")).to_request();
    let answers: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(answers.as_array().unwrap().len(), 0);

    // audit trail is admin visible, user forbidden
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/activity?action=RESOLVE_REPORT")
        .insert_header(("Authorization", admin.clone()))
        .to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["total_elements"], 1);
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/activity")
        .insert_header(("Authorization", alice.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}

#[actix_web::test]
#[serial]
async fn authentication_failures() {
    setup_env();
    let state = state();
    let (user, token) = account(&state, "carol", Role::User).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/questions")
        .set_json(json!({"title": "t", "body": "b"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    // valid signature, unknown account
    let ghost = format!("Bearer {}", create_jwt(user.id + 100, "ghost", vec![Role::Admin]).unwrap());
    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(("Authorization", ghost)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    // role comes from the account, not the token
    let forged = format!("Bearer {}", create_jwt(user.id, "carol", vec![Role::Admin]).unwrap());
    let req = test::TestRequest::get().uri("/api/v1/admin/dashboard").insert_header(("Authorization", forged)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(("Authorization", token.clone())).to_request();
    let me: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(me["username"], "carol");
    assert_eq!(me["role"], "USER");

    let req = test::TestRequest::post().uri("/api/v1/auth/refresh").insert_header(("Authorization", token)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[actix_web::test]
#[serial]
async fn banned_accounts_are_read_only() {
    setup_env();
    let state = state();
    let (admin_user, admin) = account(&state, "admin", Role::Admin).await;
    let (bob_user, bob) = account(&state, "bob", Role::User).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/users/{}/ban", bob_user.id))
        .insert_header(("Authorization", admin.clone()))
        .set_json(json!({"reason": "spam"}))
        .to_request();
    let banned: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(banned["is_banned"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/questions")
        .insert_header(("Authorization", bob.clone()))
        .set_json(json!({"title": "Still here", "body": "?"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get().uri("/api/v1/notifications").insert_header(("Authorization", bob.clone())).to_request();
    let inbox: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(inbox[0]["type"], "ACCOUNT_BANNED");

    // admins cannot ban themselves
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/admin/users/{}/ban", admin_user.id))
        .insert_header(("Authorization", admin))
        .set_json(json!({}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
}

#[actix_web::test]
#[serial]
async fn edits_tallies_and_admin_deletes_over_http() {
    setup_env();
    let state = state();
    let (_, alice) = account(&state, "alice", Role::User).await;
    let (bob_user, bob) = account(&state, "bob", Role::User).await;
    let (_, admin) = account(&state, "admin", Role::Admin).await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/questions")
        .insert_header(("Authorization", admin.clone()))
        .set_json(json!({"title": "Original", "body": "text", "tags": ["rust"]}))
        .to_request();
    let q: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let qid = q["id"].as_i64().unwrap();

    let put = |token: &String, title: &str| {
        test::TestRequest::put()
            .uri(&format!("/api/v1/questions/{qid}"))
            .insert_header(("Authorization", token.clone()))
            .set_json(json!({"title": title, "body": "text", "tags": ["Rust", "Actix"]}))
            .to_request()
    };
    assert_eq!(test::call_service(&app, put(&bob, "Taken over")).await.status(), 403);
    let resp = test::call_service(&app, put(&admin, "Edited")).await;
    assert_eq!(resp.status(), 200);
    let edited: Value = test::read_body_json(resp).await;
    assert_eq!(edited["title"], "Edited");
    assert_eq!(edited["tags"], json!(["rust", "actix"]));

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/questions/{qid}/upvote"))
        .insert_header(("Authorization", alice.clone()))
        .to_request();
    test::call_service(&app, req).await;
    let req = test::TestRequest::get().uri(&format!("/api/v1/questions/{qid}/votes")).to_request();
    let tally: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!((tally["votes"].as_i64(), tally["voted"].as_bool()), (Some(1), Some(false)));

    let req = test::TestRequest::post()
        .uri("/api/v1/reports")
        .insert_header(("Authorization", bob.clone()))
        .set_json(json!({"entity_type": "QUESTION", "entity_id": qid, "reason": "dupe"}))
        .to_request();
    let report: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let rid = report["id"].as_i64().unwrap();
    let delete_report = |token: &String| {
        test::TestRequest::delete()
            .uri(&format!("/api/v1/mod/reports/{rid}"))
            .insert_header(("Authorization", token.clone()))
            .to_request()
    };
    assert_eq!(test::call_service(&app, delete_report(&bob)).await.status(), 403);
    assert_eq!(test::call_service(&app, delete_report(&admin)).await.status(), 204);
    assert_eq!(test::call_service(&app, delete_report(&admin)).await.status(), 404);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/admin/users/{}", bob_user.id))
        .insert_header(("Authorization", admin.clone()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    // bob's token no longer resolves to an account
    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(("Authorization", bob)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::get()
        .uri("/api/v1/admin/activity/counts/EDIT_QUESTION")
        .insert_header(("Authorization", admin.clone()))
        .to_request();
    let count: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(count["count"], 1);
    let req = test::TestRequest::get()
        .uri("/api/v1/admin/activity/counts/DELETE_USER")
        .insert_header(("Authorization", alice))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}
