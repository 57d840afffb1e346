/// HTTP surface tests driven through the router without binding a socket.
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use proxylens::collection::{Collector, CollectorSettings, JobHandle};
use proxylens::config::types::DEFAULT_TEMPLATE;
use proxylens::parser::LineTemplate;
use proxylens::source::FilePatterns;
use proxylens::storage::duckdb::DuckDbStorage;
use proxylens::storage::Storage;
use proxylens::web::{build_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const KEY: &str = "test-key-0123456789abcdef";

fn npm_line(minute: u32, status: u16, ip: &str) -> String {
    format!(
        "[04/Dec/2025:02:{:02}:11 +0000] - 200 {} - GET https shop.example.com \"/item/{}\" [Client {}] [Length 512] [Gzip -] [Sent-to 10.0.0.5] \"curl/8.5.0\" \"-\"\n",
        minute, status, minute, ip
    )
}

async fn app(dir: &TempDir) -> (Router, AppState) {
    let storage = Arc::new(DuckDbStorage::in_memory().unwrap());
    storage.init_schema().await.unwrap();
    let storage: Arc<dyn Storage> = storage;

    let collector = Collector::new(
        storage.clone(),
        LineTemplate::compile(DEFAULT_TEMPLATE, None).unwrap(),
        None,
        CollectorSettings {
            log_dir: dir.path().to_path_buf(),
            patterns: FilePatterns::new("proxy-host-*_access.log", "proxy-host-*_access.log.*.gz")
                .unwrap(),
            batch_size: 100,
        },
        JobHandle::default(),
    );

    let state = AppState { collector, storage };
    (build_router(state.clone(), KEY), state)
}

fn request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn wait_until_done(app: &Router) -> Value {
    for _ in 0..200 {
        let (_, job) = send_json(app, request("GET", "/api/collect/status", Some(KEY))).await;
        if job["status"] != "running" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("collection run did not finish");
}

#[tokio::test]
async fn test_health_needs_no_key() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(&dir).await;

    let (status, body) = send(&app, request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn test_cors_preflight_is_answered_without_key() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app(&dir).await;

    let preflight = Request::builder()
        .method("OPTIONS")
        .uri("/api/collect")
        .header("Origin", "https://dashboard.example.com")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "x-api-key")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(preflight).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));

    let simple = Request::builder()
        .method("GET")
        .uri("/api/entries")
        .header("Origin", "https://dashboard.example.com")
        .header("X-API-Key", KEY)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(simple).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));

    assert_eq!(
        state.collector.job().snapshot().await.status,
        proxylens::collection::JobStatus::Idle
    );
}

#[tokio::test]
async fn test_missing_or_wrong_key_never_starts_a_run() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("proxy-host-1_access.log"), npm_line(1, 200, "81.2.69.142")).unwrap();
    let (app, state) = app(&dir).await;

    let (status, body) = send_json(&app, request("POST", "/api/collect", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, body) = send_json(&app, request("POST", "/api/collect", Some("nope"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, request("GET", "/api/entries", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let job = state.collector.job().snapshot().await;
    assert_eq!(job.status, proxylens::collection::JobStatus::Idle);
    assert!(job.run_id.is_none());
    assert_eq!(state.storage.entry_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_api_path_is_behind_the_key() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(&dir).await;

    let (status, _) = send(&app, request("GET", "/api/does-not-exist", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send_json(&app, request("GET", "/api/does-not-exist", Some(KEY))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_trigger_then_status_reports_finished_run() {
    let dir = TempDir::new().unwrap();
    let mut content = String::new();
    for minute in 0..4 {
        content.push_str(&npm_line(minute, 200, "81.2.69.142"));
    }
    std::fs::write(dir.path().join("proxy-host-1_access.log"), content).unwrap();
    let (app, _) = app(&dir).await;

    let (_, idle) = send_json(&app, request("GET", "/api/collect/status", Some(KEY))).await;
    assert_eq!(idle["status"], "idle");

    let (status, started) = send_json(&app, request("POST", "/api/collect", Some(KEY))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["message"], "started");
    let run_id = started["run_id"].as_str().unwrap().to_string();

    let job = wait_until_done(&app).await;
    assert_eq!(job["status"], "finished");
    assert_eq!(job["run_id"], run_id.as_str());
    // Counters sit at the top level of the status object
    assert_eq!(job["entries_added"], 4);
    assert_eq!(job["files_scanned"], 1);
    assert_eq!(job["lines_malformed"], 0);
    assert!(job["error"].is_null());
    assert!(job["finished_at"].is_string());

    // Polling does not reset the finished record
    let (_, again) = send_json(&app, request("GET", "/api/collect/status", Some(KEY))).await;
    assert_eq!(again, job);
}

#[tokio::test]
async fn test_trigger_while_running_conflicts() {
    let dir = TempDir::new().unwrap();
    let (app, state) = app(&dir).await;

    let ticket = state.collector.job().try_start().await.unwrap();

    let (status, body) = send_json(&app, request("POST", "/api/collect", Some(KEY))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "already running");

    let (_, job) = send_json(&app, request("GET", "/api/collect/status", Some(KEY))).await;
    assert_eq!(job["status"], "running");
    assert_eq!(job["run_id"], ticket.run_id().to_string().as_str());
}

#[tokio::test]
async fn test_invalid_entry_parameters_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _) = app(&dir).await;

    for uri in [
        "/api/entries?limit=0",
        "/api/entries?limit=5000",
        "/api/entries?skip=-1",
        "/api/entries?status_code=abc",
        "/api/entries?sort_by=password",
        "/api/entries?sort_dir=sideways",
    ] {
        let (status, body) = send_json(&app, request("GET", uri, Some(KEY))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["error"].is_string(), "{}", uri);
    }
}

#[tokio::test]
async fn test_entries_and_country_summary_shape() {
    let dir = TempDir::new().unwrap();
    let mut content = String::new();
    for minute in 0..6 {
        let status = if minute % 2 == 0 { 404 } else { 200 };
        content.push_str(&npm_line(minute, status, "81.2.69.142"));
    }
    std::fs::write(dir.path().join("proxy-host-1_access.log"), content).unwrap();
    let (app, state) = app(&dir).await;
    state.collector.collect_once().await.unwrap();

    let (status, body) = send_json(
        &app,
        request("GET", "/api/entries?status_code=404&limit=2&ip_address=", Some(KEY)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], 3);

    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    let newest = &entries[0];
    assert_eq!(newest["status_code"], 404);
    assert_eq!(newest["request_path"], "/item/4");
    assert_eq!(newest["ip_address"], "81.2.69.142");
    assert_eq!(newest["country"], "Unknown");
    assert_eq!(newest["domain"], "shop.example.com");
    assert!(newest["id"].is_i64());
    assert!(newest["raw_log"].as_str().unwrap().contains("[Client 81.2.69.142]"));
    assert_eq!(entries[1]["request_path"], "/item/2");

    let (status, summary) =
        send_json(&app, request("GET", "/api/summary/by-country", Some(KEY))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary, serde_json::json!([{ "country": "Unknown", "count": 6 }]));
}
