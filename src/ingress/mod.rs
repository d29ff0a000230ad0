//! The single webhook endpoint (spec.md §4.1): `POST /v1/hook`. Validates
//! headers and body shape inline, then dispatches orchestration to a
//! detached task so the response never waits on a clone, a build, or a
//! cluster round-trip (§5 "fire-and-forget").

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use axum::body::Bytes;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::error::{HookError, OrchestratorError};
use crate::repo::payload::PushPayload;
use crate::run::orchestrator::{self, Collaborators};

pub type AppState = Arc<Collaborators>;

const EVENT_HEADER: &str = "x-gitlab-event";
const TOKEN_HEADER: &str = "x-gitlab-token";

/// Webhook payloads are small JSON documents; anything past this is either a
/// misconfigured sender or abuse, not a legitimate push event.
const MAX_BODY_BYTES: usize = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/hook", post(hook))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Header/auth/body checks run inline; everything past them is async work
/// the caller never waits for (§8 invariant 1).
#[tracing::instrument(skip_all)]
async fn hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, HookError> {
    let event = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| HookError::BadRequest(format!("missing {EVENT_HEADER} header")))?;
    if event != "Push Hook" && event != "System Hook" {
        return Err(HookError::BadRequest(format!(
            "unsupported {EVENT_HEADER}: {event}"
        )));
    }

    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token != state.config.gitlab_webhook_secret {
        return Err(HookError::Unauthorized);
    }

    let payload: PushPayload = serde_json::from_slice(&body)
        .map_err(|e| HookError::BadRequest(format!("invalid JSON body: {e}")))?;

    let collaborators = state.clone();
    tokio::spawn(async move {
        match orchestrator::create(&collaborators, payload).await {
            Ok(Some(run)) => tracing::info!(run_id = %run.run_id, "run launched"),
            Ok(None) => tracing::info!("push accepted, no run launched"),
            Err(OrchestratorError::Skipped(reason)) => {
                tracing::info!(%reason, "run skipped");
            }
            Err(e) => tracing::warn!(error = %e, "run aborted"),
        }
    });

    Ok(Json(serde_json::json!({ "status": "success" })))
}
