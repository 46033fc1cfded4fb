//! GitLab client tests against an in-process stub API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use nexus3::nexus3::skill::vcs::config::GitLabInstance;
use nexus3::nexus3::skill::vcs::gitlab::client::GitLabClient;
use serde_json::{json, Value};

#[derive(Default)]
struct StubState {
    flaky_hits: AtomicUsize,
    limited_hits: AtomicUsize,
    missing_hits: AtomicUsize,
}

async fn user() -> Json<Value> {
    Json(json!({"id": 7, "username": "me-user"}))
}

async fn flaky(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    // Fails twice, then succeeds: success must land on an allowed retry.
    let hit = state.flaky_hits.fetch_add(1, Ordering::SeqCst);
    if hit < 2 {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "boom"}))).into_response()
    } else {
        Json(json!({"ok": true, "attempt": hit + 1})).into_response()
    }
}

async fn limited(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    let hit = state.limited_hits.fetch_add(1, Ordering::SeqCst);
    if hit == 0 {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "1")],
            Json(json!({"message": "slow down"})),
        )
            .into_response()
    } else {
        Json(json!({"ok": true})).into_response()
    }
}

async fn missing(State(state): State<Arc<StubState>>) -> impl IntoResponse {
    state.missing_hits.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::NOT_FOUND,
        Json(json!({"message": "404 Project Not Found"})),
    )
}

async fn nothing() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(serde::Deserialize)]
struct PageQuery {
    page: usize,
    per_page: usize,
}

async fn items(Query(query): Query<PageQuery>) -> Json<Value> {
    // 25 items total, served in pages.
    let total = 25usize;
    let start = (query.page - 1) * query.per_page;
    let end = (start + query.per_page).min(total);
    let page: Vec<Value> = (start..end).map(|i| json!({"n": i})).collect();
    Json(Value::Array(page))
}

async fn project(Path(id): Path<String>) -> Json<Value> {
    Json(json!({"path_with_namespace": id}))
}

async fn spawn_stub() -> (String, Arc<StubState>) {
    let state = Arc::new(StubState::default());
    let app = Router::new()
        .route("/api/v4/user", get(user))
        .route("/api/v4/flaky", get(flaky))
        .route("/api/v4/limited", get(limited))
        .route("/api/v4/missing", get(missing))
        .route("/api/v4/nothing", get(nothing))
        .route("/api/v4/items", get(items))
        .route("/api/v4/projects/{id}", get(project))
        .with_state(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (url, state)
}

fn client_for(url: &str) -> GitLabClient {
    GitLabClient::new(GitLabInstance {
        url: url.to_string(),
        token: Some("glpat-test".to_string()),
        token_env: None,
        username: None,
        email: None,
        user_id: None,
    })
}

#[tokio::test]
async fn test_get_current_user() {
    let (url, _state) = spawn_stub().await;
    let client = client_for(&url);
    let user = client.get_current_user().await.unwrap();
    assert_eq!(user["username"], "me-user");
    assert_eq!(user["id"], 7);
}

#[tokio::test]
async fn test_server_errors_retry_until_success() {
    let (url, state) = spawn_stub().await;
    let client = client_for(&url);
    let value = client.get("/flaky", &[]).await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(state.flaky_hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let (url, state) = spawn_stub().await;
    let client = client_for(&url);
    let started = std::time::Instant::now();
    let value = client.get("/limited", &[]).await.unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(state.limited_hits.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= std::time::Duration::from_secs(1));
}

#[tokio::test]
async fn test_client_errors_do_not_retry() {
    let (url, state) = spawn_stub().await;
    let client = client_for(&url);
    let err = client.get("/missing", &[]).await.unwrap_err();
    assert_eq!(err.status_code, 404);
    assert_eq!(err.message, "404 Project Not Found");
    // One request only: 4xx is never retried.
    assert_eq!(state.missing_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_content_is_null() {
    let (url, _state) = spawn_stub().await;
    let client = client_for(&url);
    let value = client.get("/nothing", &[]).await.unwrap();
    assert!(value.is_null());
}

#[tokio::test]
async fn test_pagination_respects_limit_and_order() {
    let (url, _state) = spawn_stub().await;
    let client = client_for(&url);

    let all = client.collect_pages("/items", Vec::new(), 100).await.unwrap();
    assert_eq!(all.len(), 25, "short page should terminate pagination");
    let ns: Vec<u64> = all.iter().map(|v| v["n"].as_u64().unwrap()).collect();
    assert_eq!(ns, (0..25).collect::<Vec<u64>>());

    let five = client.collect_pages("/items", Vec::new(), 5).await.unwrap();
    assert_eq!(five.len(), 5);
}

#[tokio::test]
async fn test_project_path_is_percent_encoded() {
    let (url, _state) = spawn_stub().await;
    let client = client_for(&url);
    // The stub echoes the single path segment it received; a raw slash
    // would have produced a 404 instead.
    let project = client.get_project("group/sub/repo").await.unwrap();
    assert_eq!(project["path_with_namespace"], "group/sub/repo");
}

#[tokio::test]
async fn test_private_targets_rejected_before_any_request() {
    let client = client_for("http://10.255.255.1");
    let err = client.get("/user", &[]).await.unwrap_err();
    assert_eq!(err.status_code, 0);
    assert!(err.message.contains("URL rejected"));
    assert!(!err.message.contains("10.255.255.1"));
}
