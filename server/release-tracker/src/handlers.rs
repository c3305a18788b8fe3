//! HTTP handlers for the webhook endpoints.
//!
//! Bodies are taken as raw bytes and parsed here, so a malformed payload gets
//! `{"status":"ignored"}` with 200 instead of an extractor rejection. Third-party
//! senders never see a server error from us.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;

use crate::engine::{Admission, Outcome};
use crate::normalize;
use crate::state::AppState;
use crate::store::ReleaseView;
use crate::types::*;

pub fn router(state: Arc<AppState>) -> Router {
  Router::new()
    .route("/health", get(health))
    .route("/releases", get(releases))
    .route("/github", post(github))
    .route("/circleci", get(circleci_progress).post(circleci))
    .route("/dockerhub", post(dockerhub))
    .with_state(state)
}

pub async fn health() -> &'static str {
  "ok"
}

/// Every open release with its derived stage.
pub async fn releases(State(state): State<Arc<AppState>>) -> Json<Vec<ReleaseView>> {
  Json(state.engine.records())
}

pub async fn github(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
  let Some(raw) = parse::<GithubPayload>("github", &body) else {
    return ignored(IgnoreReason::Malformed);
  };

  let event = match normalize::tag_event(&raw) {
    Ok(Some(event)) => event,
    Ok(None) => {
      tracing::debug!(git_ref = ?raw.git_ref, "github: not a tag push");
      return ignored(IgnoreReason::Irrelevant);
    }
    Err(e) => {
      tracing::info!(error = %e, "github: rejected payload");
      return ignored(IgnoreReason::Malformed);
    }
  };

  match state.engine.admit_tag(event) {
    Admission::Pending(pending) => {
      let engine = Arc::clone(&state.engine);
      tokio::spawn(async move {
        engine.publish(pending).await;
      });
      Json(StatusReply::ok()).into_response()
    }
    Admission::Ignored(reason) => ignored(reason),
  }
}

pub async fn circleci_progress(
  State(state): State<Arc<AppState>>,
  query: Result<Query<CircleCiQuery>, QueryRejection>,
) -> Response {
  let query = match query {
    Ok(Query(query)) => query,
    Err(e) => {
      tracing::info!(error = %e, "circleci: unparseable progress query");
      return ignored(IgnoreReason::Malformed);
    }
  };
  match normalize::build_progress(&query) {
    Ok(progress) => {
      tracing::debug!(build_num = progress.build_number, status = ?query.status, "circleci: progress");
      state.engine.on_build_progress(progress).into_response()
    }
    Err(e) => {
      tracing::info!(error = %e, "circleci: rejected progress query");
      ignored(IgnoreReason::Malformed)
    }
  }
}

pub async fn circleci(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
  let Some(raw) = parse::<CircleCiEnvelope>("circleci", &body) else {
    return ignored(IgnoreReason::Malformed);
  };
  match normalize::build_event(&raw, &state.engine.config().push_step_name) {
    Ok(event) => state.engine.on_build(event).into_response(),
    Err(e) => {
      tracing::info!(error = %e, "circleci: rejected payload");
      ignored(IgnoreReason::Malformed)
    }
  }
}

pub async fn dockerhub(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
  let Some(raw) = parse::<DockerHubPayload>("dockerhub", &body) else {
    return ignored(IgnoreReason::Malformed);
  };
  match normalize::registry_event(&raw) {
    Ok(event) => state.engine.on_registry(event).into_response(),
    Err(e) => {
      tracing::info!(error = %e, "dockerhub: rejected payload");
      ignored(IgnoreReason::Malformed)
    }
  }
}

impl IntoResponse for Outcome {
  fn into_response(self) -> Response {
    match self {
      Outcome::Ignored(reason) => ignored(reason),
      Outcome::Updated(view) => Json(view).into_response(),
    }
  }
}

fn ignored(reason: IgnoreReason) -> Response {
  Json(StatusReply::ignored(reason)).into_response()
}

fn parse<T: DeserializeOwned>(source: &str, body: &[u8]) -> Option<T> {
  match serde_json::from_slice(body) {
    Ok(v) => Some(v),
    Err(e) => {
      tracing::info!(source, error = %e, "unparseable webhook body");
      None
    }
  }
}
