//! Integration tests for the provider-backed part of payload validation
//! (spec.md §4.2 rules 4-5): commit signature verification and Dockerfile
//! presence, against a mock Git provider REST API.

use secd::repo::payload::{CommitInfo, ProjectInfo, PushPayload};
use secd::repo::{GitlabRepoClient, RepoProvider, ValidationOutcome};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload(commits: Vec<CommitInfo>) -> PushPayload {
    PushPayload {
        event_name: "push".into(),
        git_ref: "refs/heads/main".into(),
        user_id: 42,
        project_id: 7,
        project: ProjectInfo {
            http_url: "https://git.example/a/b.git".into(),
            path_with_namespace: "a/b".into(),
        },
        commits,
    }
}

fn client(mock: &MockServer) -> GitlabRepoClient {
    GitlabRepoClient::new(mock.uri(), "tok".into(), "secd".into(), "pw".into())
}

#[tokio::test]
async fn verified_commit_and_dockerfile_present_accepts() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/7/repository/commits/abc/signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "verification_status": "verified",
        })))
        .mount(&mock)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/api/v4/projects/7/repository/files/Dockerfile"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let outcome = client
        .validate(&payload(vec![CommitInfo { id: "abc".into() }]))
        .await
        .unwrap();
    assert!(matches!(outcome, ValidationOutcome::Accept));
}

#[tokio::test]
async fn unverified_commit_is_rejected() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/7/repository/commits/abc/signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "verification_status": "unverified",
        })))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let result = client
        .validate(&payload(vec![CommitInfo { id: "abc".into() }]))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn empty_commits_is_rejected_not_vacuously_accepted() {
    let mock = MockServer::start().await;
    let client = client(&mock);
    let result = client.validate(&payload(vec![])).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn missing_dockerfile_is_rejected() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/projects/7/repository/commits/abc/signature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "verification_status": "verified",
        })))
        .mount(&mock)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/api/v4/projects/7/repository/files/Dockerfile"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let result = client
        .validate(&payload(vec![CommitInfo { id: "abc".into() }]))
        .await;
    assert!(result.is_err());
}
