//! Webhook payload shape and the branch/event rules that don't require a
//! collaborator round-trip (spec.md §4.2 rules 1–3). Rules 4–5 (signature
//! verification, Dockerfile presence) live in [`super`] since they call out
//! to the git provider.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
    pub event_name: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub user_id: i64,
    pub project_id: i64,
    pub project: ProjectInfo,
    #[serde(default)]
    pub commits: Vec<CommitInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInfo {
    pub http_url: String,
    pub path_with_namespace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    pub id: String,
}

/// Outcome of the cheap, local-only part of payload validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCheck {
    /// `ref` starts with `refs/heads/secd-`: a bot-originated result branch.
    /// Accept-and-skip with no further work (§4.2 rule 1).
    SkipBotBranch,
    /// Passed rules 1–3; proceed to the provider-backed rules (4–5).
    Continue,
    /// Failed rule 2 or 3, with the reason to surface in logs.
    Reject(String),
}

pub const SECD_BRANCH_PREFIX: &str = "refs/heads/secd-";

/// Evaluate rules 1–3 against a parsed payload, in order (§4.2).
pub fn check_local(payload: &PushPayload) -> LocalCheck {
    if payload.git_ref.starts_with(SECD_BRANCH_PREFIX) {
        return LocalCheck::SkipBotBranch;
    }
    if payload.event_name != "push" {
        return LocalCheck::Reject(format!(
            "unsupported event_name '{}', expected 'push'",
            payload.event_name
        ));
    }
    if payload.git_ref != "refs/heads/main" {
        return LocalCheck::Reject(format!(
            "unsupported ref '{}', expected 'refs/heads/main'",
            payload.git_ref
        ));
    }
    LocalCheck::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(event_name: &str, git_ref: &str) -> PushPayload {
        PushPayload {
            event_name: event_name.into(),
            git_ref: git_ref.into(),
            user_id: 42,
            project_id: 7,
            project: ProjectInfo {
                http_url: "https://git.example/a/b.git".into(),
                path_with_namespace: "a/b".into(),
            },
            commits: vec![CommitInfo { id: "abc".into() }],
        }
    }

    #[test]
    fn bot_branch_is_skipped() {
        let p = payload("push", "refs/heads/secd-2024-01-01_00.00.00-abcdef");
        assert_eq!(check_local(&p), LocalCheck::SkipBotBranch);
    }

    #[test]
    fn non_push_event_rejected() {
        let p = payload("tag_push", "refs/heads/main");
        assert!(matches!(check_local(&p), LocalCheck::Reject(_)));
    }

    #[test]
    fn non_main_branch_rejected() {
        let p = payload("push", "refs/heads/feature/x");
        assert!(matches!(check_local(&p), LocalCheck::Reject(_)));
    }

    #[test]
    fn happy_path_continues() {
        let p = payload("push", "refs/heads/main");
        assert_eq!(check_local(&p), LocalCheck::Continue);
    }

    #[test]
    fn deserializes_unknown_fields_without_error() {
        let json = serde_json::json!({
            "event_name": "push",
            "ref": "refs/heads/main",
            "user_id": 1,
            "project_id": 2,
            "project": {"http_url": "https://x/y.git", "path_with_namespace": "x/y", "extra": true},
            "commits": [{"id": "abc", "message": "unused field"}],
            "some_future_field": 123,
        });
        let payload: PushPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.commits.len(), 1);
    }
}
