//! Router tests: requests go through the full axum stack via `oneshot`.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{engine_with, eventually, RecordingNotifier, StaticResolver};
use release_tracker::{router, AppState, Config};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Router, Arc<AppState>, Arc<RecordingNotifier>) {
  let notifier = Arc::new(RecordingNotifier::default());
  let engine = engine_with(
    Config::default(),
    Arc::clone(&notifier),
    Arc::new(StaticResolver::default()),
  );
  let state = AppState::new(engine);
  (router(Arc::clone(&state)), state, notifier)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.clone().oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
  (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
  post_raw(uri, body.to_string())
}

fn post_raw(uri: &str, body: impl Into<String>) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(uri)
    .header("content-type", "application/json")
    .body(Body::from(body.into()))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn github_tag(tag: &str, after: &str) -> Value {
  json!({
    "ref": format!("refs/tags/{}", tag),
    "after": after,
    "sender": {"login": "alice"},
    "repository": {"owner": {"login": "org"}, "name": "ui", "url": "https://github.com/org/ui"}
  })
}

fn circleci_done(build_num: u64, outcome: &str) -> Value {
  json!({"payload": {
    "vcs_tag": "v1.2.0",
    "vcs_revision": "abc123",
    "build_num": build_num,
    "outcome": outcome,
    "build_url": format!("https://circleci.com/gh/org/ui/{}", build_num),
    "steps": [{"name": "docker push", "actions": [{"end_time": "2025-01-15T10:31:41Z"}]}]
  }})
}

async fn tagged(app: &Router, state: &AppState) {
  let (status, body) = send(app, post_json("/github", github_tag("v1.2.0", "abc123"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({"status": "ok"}));
  assert!(eventually(|| state.engine.find_by_tag("v1.2.0", "abc123").is_some()).await);
}

#[tokio::test]
async fn health() {
  let (app, _, _) = app();
  let (status, body) = send(&app, get("/health")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn github_tag_push_opens_release() {
  let (app, state, notifier) = app();
  tagged(&app, &state).await;
  assert_eq!(notifier.post_count(), 1);

  let (status, body) = send(&app, get("/releases")).await;
  assert_eq!(status, StatusCode::OK);
  let releases = body.as_array().unwrap();
  assert_eq!(releases.len(), 1);
  assert_eq!(releases[0]["tag"], "v1.2.0");
  assert_eq!(releases[0]["stage"], "tagged");
}

#[tokio::test]
async fn github_branch_push_is_irrelevant() {
  let (app, state, _) = app();
  let mut body = github_tag("v1.2.0", "abc123");
  body["ref"] = json!("refs/heads/main");
  let (status, reply) = send(&app, post_json("/github", body)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply, json!({"status": "ignored", "reason": "irrelevant"}));
  assert!(state.engine.records().is_empty());
}

#[tokio::test]
async fn duplicate_tag_push_is_reported() {
  let (app, state, _) = app();
  tagged(&app, &state).await;
  let (_, reply) = send(&app, post_json("/github", github_tag("v1.2.0", "abc123"))).await;
  assert_eq!(reply, json!({"status": "ignored", "reason": "duplicate"}));
}

#[tokio::test]
async fn malformed_bodies_are_ignored_with_200() {
  let (app, _, _) = app();
  for uri in ["/github", "/circleci", "/dockerhub"] {
    let (status, reply) = send(&app, post_raw(uri, "{not json")).await;
    assert_eq!(status, StatusCode::OK, "{}", uri);
    assert_eq!(reply, json!({"status": "ignored", "reason": "malformed"}), "{}", uri);
  }

  // Valid JSON, missing required field.
  let (status, reply) = send(&app, post_json("/circleci", json!({"payload": {"outcome": "success"}}))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply["reason"], "malformed");
}

#[tokio::test]
async fn circleci_progress_then_completion() {
  let (app, state, _) = app();
  tagged(&app, &state).await;

  let (status, view) = send(
    &app,
    get("/circleci?tag=v1.2.0&sha1=abc123&buildNum=42&buildUrl=https%3A%2F%2Fcircleci.com%2Fgh%2Forg%2Fui%2F42"),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["stage"], "building");
  assert_eq!(view["build_number"], 42);

  let (_, view) = send(&app, post_json("/circleci", circleci_done(42, "success"))).await;
  assert_eq!(view["stage"], "built");
  assert_eq!(view["image_pushed_at"], "2025-01-15T10:31:00Z");
}

#[tokio::test]
async fn circleci_progress_without_build_num_is_malformed() {
  let (app, state, _) = app();
  tagged(&app, &state).await;
  let (status, reply) = send(&app, get("/circleci?tag=v1.2.0&sha1=abc123")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply, json!({"status": "ignored", "reason": "malformed"}));
}

#[tokio::test]
async fn circleci_progress_with_undecodable_query_is_malformed() {
  let (app, state, _) = app();
  tagged(&app, &state).await;
  for uri in [
    "/circleci?tag=v1.2.0&tag=v2.0.0&sha1=abc123&buildNum=42",
    "/circleci?tag=v1.2.0&sha1=abc123&buildNum=42&buildNum=43",
  ] {
    let (status, reply) = send(&app, get(uri)).await;
    assert_eq!(status, StatusCode::OK, "{}", uri);
    assert_eq!(reply, json!({"status": "ignored", "reason": "malformed"}), "{}", uri);
  }
  assert!(state.engine.find_by_build(42).is_none());
}

#[tokio::test]
async fn dockerhub_push_completes_release() {
  let (app, state, _) = app();
  tagged(&app, &state).await;
  send(&app, post_json("/circleci", circleci_done(42, "success"))).await;

  // 2025-01-15T10:31:30Z
  let (status, view) = send(
    &app,
    post_json(
      "/dockerhub",
      json!({
        "push_data": {"pushed_at": 1736937090, "tag": "latest"},
        "repository": {"repo_url": "https://hub.docker.com/r/org/ui", "status": "Active"}
      }),
    ),
  )
  .await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(view["stage"], "pushed");
  assert_eq!(view["image_url"], "https://hub.docker.com/r/org/ui");
}

#[tokio::test]
async fn unmatched_events_are_ignored() {
  let (app, _, _) = app();
  let (status, reply) = send(&app, post_json("/circleci", circleci_done(7, "success"))).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(reply, json!({"status": "ignored", "reason": "no_match"}));

  let (_, reply) = send(
    &app,
    post_json(
      "/dockerhub",
      json!({"push_data": {"pushed_at": 1736937090}, "repository": {"repo_url": "https://hub.docker.com/r/org/ui"}}),
    ),
  )
  .await;
  assert_eq!(reply, json!({"status": "ignored", "reason": "no_match"}));
}

#[tokio::test]
async fn failed_build_drops_release() {
  let (app, state, _) = app();
  tagged(&app, &state).await;
  let (_, view) = send(&app, post_json("/circleci", circleci_done(42, "failed"))).await;
  assert_eq!(view["stage"], "failed");

  let (_, body) = send(&app, get("/releases")).await;
  assert_eq!(body, json!([]));
}
