//! End-to-end HTTP scenarios (§8) driven through the REST layer with the
//! in-memory fakes, grounded on `daemon/tests/*`'s style of spinning up a
//! real `actix_web::App` with `actix_web::test::init_service` rather than
//! calling handlers directly.

use std::sync::Arc;

use actix_web::{test, web, App};
use mailing_list_core::bus::subject;
use mailing_list_core::bus::test_support::InMemoryBus;
use mailing_list_core::provider::mock::MockGroupsIoClient;
use mailing_list_core::storage::InMemoryKv;
use mailing_list_service::rest;
use mailing_list_service::state::AppState;
use serde_json::json;

fn test_state() -> (AppState, Arc<InMemoryBus>) {
    let bus = Arc::new(InMemoryBus::new());
    let state = AppState::new(
        Arc::new(InMemoryKv::new()),
        bus.clone(),
        Arc::new(MockGroupsIoClient::new()),
        b"test-secret".to_vec(),
    );
    (state, bus)
}

#[actix_web::test]
async fn service_create_primary_then_duplicate_then_get() {
    let (state, bus) = test_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(rest::configure),
    )
    .await;

    bus.queue_reply(subject::PROJECT_GET_SLUG, b"proj-one".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Project One".to_vec()).await;

    let body = json!({
        "type": "primary",
        "provider_domain": "groups.io",
        "status": "pending",
        "owners": ["owner@example.com"],
        "project_uid": "P1",
        "project_slug": "proj-one",
        "project_name": "Project One",
        "group_name": "proj-one",
        "public": true,
    });

    let req = test::TestRequest::post()
        .uri("/groupsio/services")
        .set_json(&body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert_eq!(etag, "\"1\"");
    let created: serde_json::Value = test::read_body_json(resp).await;
    let uid = created["uid"].as_str().unwrap().to_string();
    assert_eq!(created["group_name"], "proj-one");
    assert_eq!(created["revision"], 1);

    // A second identical POST (same project, same type) collides on the
    // primary-service uniqueness key.
    let dup_req = test::TestRequest::post()
        .uri("/groupsio/services")
        .set_json(&body)
        .to_request();
    let dup_resp = test::call_service(&app, dup_req).await;
    assert_eq!(dup_resp.status(), 409);

    let get_req = test::TestRequest::get()
        .uri(&format!("/groupsio/services/{uid}"))
        .to_request();
    let get_resp = test::call_service(&app, get_req).await;
    assert_eq!(get_resp.status(), 200);
    assert_eq!(get_resp.headers().get("etag").unwrap().to_str().unwrap(), "\"1\"");
}

#[actix_web::test]
async fn formation_list_group_name_must_start_with_service_prefix() {
    let (state, bus) = test_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(rest::configure),
    )
    .await;

    bus.queue_reply(subject::PROJECT_GET_SLUG, b"alpha".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Alpha".to_vec()).await;

    let service_body = json!({
        "type": "formation",
        "provider_domain": "groups.io",
        "status": "active",
        "owners": ["owner@example.com"],
        "url_prefix": "alpha",
        "project_uid": "P1",
        "project_slug": "alpha",
        "project_name": "Alpha",
        "group_name": "alpha",
        "public": true,
    });
    let req = test::TestRequest::post()
        .uri("/groupsio/services")
        .set_json(&service_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let service: serde_json::Value = test::read_body_json(resp).await;
    let service_uid = service["uid"].as_str().unwrap().to_string();

    let good_list = json!({
        "group_name": "alpha-dev",
        "public": true,
        "type": "discussion_open",
        "description": "Dev discussions here.",
        "title": "Dev",
        "service_uid": service_uid,
        "project_uid": "P1",
    });
    let req = test::TestRequest::post()
        .uri("/groupsio/mailing-lists")
        .set_json(&good_list)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);

    let bad_list = json!({
        "group_name": "dev",
        "public": true,
        "type": "discussion_open",
        "description": "Dev discussions here.",
        "title": "Dev",
        "service_uid": service_uid,
        "project_uid": "P1",
    });
    let req = test::TestRequest::post()
        .uri("/groupsio/mailing-lists")
        .set_json(&bad_list)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["field"], "group_name");
}

#[actix_web::test]
async fn optimistic_concurrency_conflict_on_stale_if_match() {
    let (state, bus) = test_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(rest::configure),
    )
    .await;

    bus.queue_reply(subject::PROJECT_GET_SLUG, b"proj-one".to_vec()).await;
    bus.queue_reply(subject::PROJECT_GET_NAME, b"Project One".to_vec()).await;

    let service_body = json!({
        "type": "primary",
        "provider_domain": "groups.io",
        "status": "active",
        "owners": ["owner@example.com"],
        "project_uid": "P1",
        "project_slug": "proj-one",
        "project_name": "Project One",
        "group_name": "proj-one",
        "public": true,
    });
    let req = test::TestRequest::post()
        .uri("/groupsio/services")
        .set_json(&service_body)
        .to_request();
    let service: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let service_uid = service["uid"].as_str().unwrap().to_string();

    let list_body = json!({
        "group_name": "announce",
        "public": true,
        "type": "announcement",
        "description": "Announcements list.",
        "title": "Announce",
        "service_uid": service_uid,
        "project_uid": "P1",
    });
    let req = test::TestRequest::post()
        .uri("/groupsio/mailing-lists")
        .set_json(&list_body)
        .to_request();
    let created: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    let list_uid = created["uid"].as_str().unwrap().to_string();
    assert_eq!(created["revision"], 1);

    // Client A updates with If-Match: 1 — succeeds, revision becomes 2.
    let mut updated_a = created.clone();
    updated_a["title"] = json!("Announce (A)");
    let req = test::TestRequest::put()
        .uri(&format!("/groupsio/mailing-lists/{list_uid}"))
        .insert_header(("if-match", "1"))
        .set_json(&updated_a)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    // Client B still has the stale rev=1 view and PUTs with If-Match: 1 —
    // must be rejected with the current revision named in the message.
    let mut updated_b = created.clone();
    updated_b["title"] = json!("Announce (B)");
    let req = test::TestRequest::put()
        .uri(&format!("/groupsio/mailing-lists/{list_uid}"))
        .insert_header(("if-match", "1"))
        .set_json(&updated_b)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
}

#[actix_web::test]
async fn liveness_and_readiness_probes() {
    let (state, _bus) = test_state();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(rest::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/livez").to_request()).await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/readyz").to_request()).await;
    assert_eq!(resp.status(), 200);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/openapi.json").to_request()).await;
    assert_eq!(resp.status(), 200);
}
