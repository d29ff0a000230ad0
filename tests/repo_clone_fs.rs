//! Filesystem-touching tests for the clone/checkout contract (spec.md
//! §4.2 Clone): the destination directory must not pre-exist.

use secd::repo::{GitlabRepoClient, RepoError, RepoProvider};

#[tokio::test]
async fn clone_refuses_a_preexisting_checkout_directory() {
    let repo_root = tempfile::tempdir().unwrap();
    let run_id = "deadbeefdeadbeefdeadbeefdeadbeef";
    std::fs::create_dir(repo_root.path().join(run_id)).unwrap();

    let client = GitlabRepoClient::new(
        "https://git.example".into(),
        "tok".into(),
        "secd".into(),
        "pw".into(),
    );

    let result = client
        .clone("https://git.example/a/b.git", run_id, repo_root.path())
        .await;

    assert!(matches!(result, Err(RepoError::CheckoutExists(_))));
}
