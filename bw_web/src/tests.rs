//! ABOUTME: Integration tests for the web API layer
//! ABOUTME: Exercises every endpoint against a store filled by the real reconciler

use super::*;
use actix_web::test;
use bw_collector::Reconciler;
use bw_source::{parse_info, RepositoryTarget};
use serde_json::Value;
use std::time::Duration;
use tempfile::TempDir;
use test_support::{sample_info_json, sample_repository_path};

async fn create_test_app_state() -> (AppState, Db, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("web.db");
    let db = Db::new(path.to_str().unwrap())
        .await
        .expect("Failed to create test database");
    (AppState::new(db.clone(), ObsState::new()), db, dir)
}

async fn seed(db: &Db) {
    let reconciler = Reconciler::new(db.clone(), Duration::from_secs(10));
    let snapshot = parse_info(&sample_info_json(), sample_repository_path()).unwrap();
    reconciler
        .reconcile(
            &RepositoryTarget::new("main", sample_repository_path()),
            &snapshot,
        )
        .await
        .unwrap();
}

#[actix_web::test]
async fn test_stats_on_empty_store() {
    let (state, _db, _dir) = create_test_app_state().await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["repository_count"], 0);
    assert_eq!(body["archive_count"], 0);
    assert_eq!(body["compression_ratio"], 0.0);
    assert_eq!(body["deduplication_ratio"], 0.0);
    assert_eq!(body["latest"], serde_json::json!([]));
}

#[actix_web::test]
async fn test_stats_after_collection() {
    let (state, db, _dir) = create_test_app_state().await;
    seed(&db).await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["repository_count"], 1);
    assert_eq!(body["archive_count"], 2);
    assert_eq!(body["original_size_bytes"], 20_000_000);
    assert_eq!(body["compression_ratio"], 0.5);
    assert_eq!(body["deduplication_ratio"], 0.1);
    assert_eq!(body["latest"].as_array().unwrap().len(), 1);
    // Fixture archives are from 2024, long past the critical threshold
    assert_eq!(body["health"]["critical"], 1);
}

#[actix_web::test]
async fn test_repositories_include_health() {
    let (state, db, _dir) = create_test_app_state().await;
    seed(&db).await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/api/repositories").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    let repositories = body.as_array().unwrap();
    assert_eq!(repositories.len(), 1);
    assert_eq!(repositories[0]["name"], "main");
    assert_eq!(repositories[0]["health"], "critical");
    assert!(repositories[0]["hours_since_last_backup"].as_f64().unwrap() > 48.0);
}

#[actix_web::test]
async fn test_archives_newest_first_with_clamped_limit() {
    let (state, db, _dir) = create_test_app_state().await;
    seed(&db).await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/api/archives").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let archives = body.as_array().unwrap();
    assert_eq!(archives.len(), 2);
    assert_eq!(archives[0]["archive_name"], "nas-2024-01-15T02:00:00");
    assert_eq!(archives[1]["archive_name"], "nas-2024-01-14T02:00:00");

    // Zero clamps up to one
    let req = test::TestRequest::get()
        .uri("/api/archives?limit=0")
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn test_archives_rejects_non_numeric_limit() {
    let (state, _db, _dir) = create_test_app_state().await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/archives?limit=lots")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["title"], "Bad Request");
}

#[actix_web::test]
async fn test_trend_excludes_archives_outside_window() {
    let (state, db, _dir) = create_test_app_state().await;
    seed(&db).await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get()
        .uri("/api/trend?days=100000")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, serde_json::json!([]));
}

#[actix_web::test]
async fn test_store_outage_is_service_unavailable() {
    let (state, db, _dir) = create_test_app_state().await;
    db.pool().close().await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/api/repositories").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
}

#[actix_web::test]
async fn test_observability_routes_are_mounted() {
    let (state, _db, _dir) = create_test_app_state().await;
    let app = test::init_service(create_app(state)).await;

    let req = test::TestRequest::get().uri("/healthz").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get().uri("/readyz").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get().uri("/metrics").to_request();
    let body = test::call_and_read_body(&app, req).await;
    let text = std::str::from_utf8(&body).unwrap();
    // Two earlier requests were counted before this one was served
    assert!(text.contains("borgwatch_http_requests_total 2"));
}
