use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::cluster::ClusterError;
use crate::identity::IdentityError;
use crate::image::ImageError;
use crate::repo::RepoError;
use crate::secrets_broker::SecretsBrokerError;

/// Error surfaced at the HTTP ingress boundary. Maps directly to the 4xx/5xx
/// contract in spec.md §4.1 / §6 — nothing past this boundary is ever shown
/// to the webhook caller.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg })),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "unauthorized" }),
            ),
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error handling webhook");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Aggregate error for the run lifecycle. The orchestrator catches every
/// variant at its outer boundary (§7) — this type exists so that boundary
/// can log a single, typed value instead of matching on each collaborator's
/// error separately.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Webhook accepted but not an actionable push (bot branch, wrong ref,
    /// wrong event). Not a failure — the caller checks for this variant and
    /// returns early without logging at `error` level.
    #[error("skipped: {0}")]
    Skipped(String),

    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("repo: {0}")]
    Repo(#[from] RepoError),

    #[error("image: {0}")]
    Image(#[from] ImageError),

    #[error("secrets broker: {0}")]
    SecretsBroker(#[from] SecretsBrokerError),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
