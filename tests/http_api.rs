//! HTTP surface tests, run against the full route tree with
//! `actix_web::test`.

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use serde_json::{json, Value};
use tempfile::tempdir;

use sketchboard_server::error::json_error_handler;
use sketchboard_server::handlers;
use sketchboard_server::registry::Registry;
use sketchboard_server::store::BoardStore;

macro_rules! test_app {
    ($registry:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($registry))
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .configure(handlers::root),
        )
        .await
    };
}

#[actix_web::test]
async fn create_element_stamps_metadata_and_auto_creates_the_session() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    // Reads against an unreferenced session are not-found.
    let req = test::TestRequest::get()
        .uri("/api/sessions/alpha/elements")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "session not found");

    let req = test::TestRequest::post()
        .uri("/api/sessions/alpha/elements")
        .set_json(json!({ "type": "rectangle", "x": 10, "y": 20, "width": 30, "height": 40 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let stored: Value = test::read_body_json(resp).await;
    assert_eq!(stored["type"], "rectangle");
    assert_eq!(stored["x"], 10);
    assert_eq!(stored["createdBy"], "api");
    assert!(stored["timestamp"].as_u64().unwrap() > 0);
    let element_id = stored["id"].as_str().unwrap().to_owned();
    assert!(!element_id.is_empty());

    let req = test::TestRequest::get()
        .uri("/api/sessions/alpha")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let info: Value = test::read_body_json(resp).await;
    assert_eq!(info["id"], "alpha");
    assert_eq!(info["elementCount"], 1);
    assert_eq!(info["userCount"], 0);
    assert!(info["createdAt"].as_u64().unwrap() > 0);
    assert_eq!(info["elements"][0]["id"], Value::String(element_id.clone()));

    let req = test::TestRequest::get()
        .uri(&format!("/api/sessions/alpha/elements/{}", element_id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri("/api/sessions/alpha/elements/missing")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn batch_with_an_invalid_element_commits_nothing() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let req = test::TestRequest::post()
        .uri("/api/sessions/beta/elements/batch")
        .set_json(json!([
            { "type": "rectangle", "x": 1, "y": 1, "width": 5, "height": 5 },
            { "type": "hexagon" }
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unknown element type: hexagon");

    // The invalid batch never referenced the session.
    let req = test::TestRequest::get()
        .uri("/api/sessions/beta/elements")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/api/sessions/beta/elements/batch")
        .set_json(json!([
            { "type": "line", "x1": 0, "y1": 0, "x2": 1, "y2": 1 },
            { "type": "text", "x": 5, "y": 5, "text": "hello" }
        ]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let stored: Value = test::read_body_json(resp).await;
    assert_eq!(stored.as_array().unwrap().len(), 2);

    let req = test::TestRequest::get()
        .uri("/api/sessions/beta/elements")
        .to_request();
    let elements: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(elements.as_array().unwrap().len(), 2);
    assert_eq!(elements[0]["type"], "line");
    assert_eq!(elements[1]["type"], "text");
}

#[actix_web::test]
async fn put_merges_the_patch_and_preserves_identity() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let req = test::TestRequest::post()
        .uri("/api/sessions/merge/elements")
        .set_json(json!({ "type": "note", "x": 1, "y": 2, "width": 3, "height": 4,
                          "text": "draft", "glow": true }))
        .to_request();
    let stored: Value = test::call_and_read_body_json(&app, req).await;
    let element_id = stored["id"].as_str().unwrap().to_owned();

    let req = test::TestRequest::put()
        .uri(&format!("/api/sessions/merge/elements/{}", element_id))
        .set_json(json!({ "text": "final", "id": "spoofed" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let merged: Value = test::read_body_json(resp).await;
    assert_eq!(merged["id"], Value::String(element_id.clone()));
    assert_eq!(merged["text"], "final");
    assert_eq!(merged["x"], 1);
    assert_eq!(merged["glow"], true);
    assert_eq!(merged["updatedBy"], "api");
    assert!(merged["updatedAt"].as_u64().unwrap() > 0);

    let req = test::TestRequest::put()
        .uri("/api/sessions/merge/elements/missing")
        .set_json(json!({ "x": 0 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn delete_and_clear_return_no_content() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let req = test::TestRequest::post()
            .uri("/api/sessions/epsilon/elements")
            .set_json(json!({ "type": "circle", "cx": 0, "cy": 0, "radius": 5 }))
            .to_request();
        let stored: Value = test::call_and_read_body_json(&app, req).await;
        ids.push(stored["id"].as_str().unwrap().to_owned());
    }

    let req = test::TestRequest::delete()
        .uri(&format!("/api/sessions/epsilon/elements/{}", ids[0]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/sessions/epsilon/elements/{}", ids[0]))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::delete()
        .uri("/api/sessions/epsilon/elements")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri("/api/sessions/epsilon/elements")
        .to_request();
    let elements: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(elements, json!([]));
}

#[actix_web::test]
async fn validation_and_body_errors_render_as_json() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let req = test::TestRequest::post()
        .uri("/api/sessions/zeta/elements")
        .set_json(json!({ "x": 1 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "element is missing a type");

    let req = test::TestRequest::post()
        .uri("/api/sessions/zeta/elements")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().is_some_and(|msg| !msg.is_empty()));

    // A batch body must be an array.
    let req = test::TestRequest::post()
        .uri("/api/sessions/zeta/elements/batch")
        .set_json(json!({ "type": "rectangle" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn root_redirects_to_a_fresh_session_page() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let session_id = location.trim_start_matches('/');
    assert!(session_id.len() >= 6);
    assert!(session_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    let req = test::TestRequest::get().uri(&location).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert!(String::from_utf8_lossy(&body).contains(session_id));
}

#[actix_web::test]
async fn sessions_can_be_minted_and_listed() {
    let dir = tempdir().unwrap();
    let registry = Registry::new(BoardStore::open(dir.path()).unwrap());
    let app = test_app!(registry);

    let req = test::TestRequest::post().uri("/api/sessions").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    let id = body["id"].as_str().unwrap().to_owned();
    assert!(id.len() >= 6);

    let req = test::TestRequest::get().uri("/api/sessions").to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert!(listed
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v.as_str() == Some(id.as_str())));
}
