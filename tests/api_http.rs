// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

mod common;

use std::sync::Arc;

use serde_json::{json, Value as Json};
use http::{Request, StatusCode};
use shuttle_axum::axum::{
    body::{self, Body},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use alert_dispatcher::alert::{DispatchMode, MessageFormat, ProjectId};
use alert_dispatcher::api::{self, AppState};
use alert_dispatcher::dispatch::DispatchEngine;
use alert_dispatcher::ingest::mapper::{FieldMapper, ProviderTable};
use alert_dispatcher::notify::RetryPolicy;
use alert_dispatcher::store::{AlertStore, InMemoryStore};
use common::{project, store_with, webhook_rows, FakeGateway};

const BODY_LIMIT: usize = 1024 * 1024;

fn test_router(store: Arc<InMemoryStore>, gw: Arc<FakeGateway>) -> Router {
    let engine = Arc::new(DispatchEngine::new(store.clone(), gw).with_retry(RetryPolicy::immediate(3)));
    api::router(AppState::new(store, engine, FieldMapper::new(ProviderTable::default_seed())))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor", "tester");
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router(store_with(vec![]).await, FakeGateway::ok());
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "OK");
}

#[tokio::test]
async fn automatic_project_ingests_and_dispatches() {
    let store = store_with(vec![project("p", DispatchMode::Automatic, MessageFormat::OnePerOne)]).await;
    let gw = FakeGateway::ok();
    let app = test_router(store.clone(), gw.clone());

    let mut rows = webhook_rows(3);
    rows.push(json!({"url": "https://www.news.com/a1/"}));
    let (status, v) = send(
        app,
        "POST",
        "/alerts",
        Some(json!({"proyecto_id": "p", "alertas": rows})),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{v}");
    assert_eq!(v["accepted_count"], 3);
    assert_eq!(v["duplicates"][0]["index"], 3);
    assert_eq!(v["duplicates"][0]["source"], "in_batch");
    assert_eq!(v["dispatch"]["sent_count"], 3);
    assert_eq!(v["dispatch"]["duplicated_count"], 1);
    assert_eq!(v["dispatch"]["send_error"], false);
    assert_eq!(gw.sent().len(), 3);

    let pending = store.pending_alerts(&ProjectId::new("p")).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn manual_project_stores_and_reports_message() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let gw = FakeGateway::ok();
    let app = test_router(store.clone(), gw.clone());

    let (status, v) = send(
        app.clone(),
        "POST",
        "/alerts",
        Some(json!({"project_id": "p", "alerts": webhook_rows(2)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(v["dispatch"].is_null());
    assert!(v["message"].as_str().unwrap().contains("not in automatic mode"));
    assert_eq!(gw.calls(), 0);

    let (status, v) = send(app, "POST", "/projects/p/dispatch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["sent_count"], 2);
    assert_eq!(v["per_alert_status"][0]["status"], "sent");

    assert!(store.pending_alerts(&ProjectId::new("p")).await.unwrap().is_empty());
}

#[tokio::test]
async fn tabular_upload_is_accepted() {
    let store = store_with(vec![project("p", DispatchMode::Manual, MessageFormat::OnePerOne)]).await;
    let app = test_router(store, FakeGateway::ok());

    let (status, v) = send(
        app,
        "POST",
        "/alerts/tabular",
        Some(json!({
            "proyecto_id": "p",
            "headers": ["titulo", "medio", "link", "fecha"],
            "rows": [["Acme opens plant", "Daily", "https://news.com/acme", "03/01/2024"]]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{v}");
    assert_eq!(v["provider"], "media_monitor");
    assert_eq!(v["accepted_count"], 1);
}

#[tokio::test]
async fn errors_map_to_statuses() {
    let store = store_with(vec![project("p", DispatchMode::Automatic, MessageFormat::OnePerOne)]).await;
    let app = test_router(store.clone(), FakeGateway::missing_channel());

    let (status, v) = send(app.clone(), "POST", "/alerts", Some(json!({"alertas": []}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["kind"], "validation");

    let (status, v) = send(
        app.clone(),
        "POST",
        "/alerts",
        Some(json!({"proyecto_id": "p", "alertas": [{"foo": "bar"}]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(v["kind"], "unrecognized_schema");
    assert_eq!(v["headers"], json!(["foo"]));

    let (status, v) = send(
        app.clone(),
        "POST",
        "/alerts",
        Some(json!({"proyecto_id": "p", "alertas": webhook_rows(1)})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(v["kind"], "channel_not_found");
    // stored, still pending
    assert_eq!(store.pending_alerts(&ProjectId::new("p")).await.unwrap().len(), 1);

    let (status, _) = send(app.clone(), "POST", "/projects/unknown/dispatch", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, v) = send(app, "POST", "/deliveries/0000000000000000/reset", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(v["kind"], "not_found");
}

#[tokio::test]
async fn reset_records_the_actor() {
    let store = store_with(vec![project("p", DispatchMode::Automatic, MessageFormat::OnePerOne)]).await;
    let app = test_router(store.clone(), FakeGateway::failing_on("news.com/a1"));

    let (status, v) = send(
        app.clone(),
        "POST",
        "/alerts",
        Some(json!({"proyecto_id": "p", "alertas": webhook_rows(1)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["dispatch"]["send_error"], true);
    assert_eq!(v["dispatch"]["per_alert_status"][0]["status"], "failed");
    let id = v["dispatch"]["per_alert_status"][0]["alert_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, v) = send(app, "POST", &format!("/deliveries/{id}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["sent"], false);
    assert!(v["started_at"].is_null());
    assert_eq!(v["updated_by"], "tester");
}
