//! Integration tests for the Vault-shaped secrets broker client (spec.md
//! §4.5) against a mock HTTP API, focused on the idempotence invariant in
//! §8: configuring identical parameters twice has the same observable
//! effect as once.

use secd::secrets_broker::{DatabaseConnection, SecretsBroker, VaultClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(mock: &MockServer) -> VaultClient {
    VaultClient::new(mock.uri(), "root-token".into())
}

#[tokio::test]
async fn configure_connection_twice_is_idempotent() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/database/config/mysql-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let conn = DatabaseConnection {
        database_name: "mysql-1",
        url_template: "{{username}}:{{password}}@tcp(mysql-1:3306)/",
        admin_username: "admin",
        admin_password: "pw",
    };

    client.configure_connection(&conn).await.unwrap();
    // Same parameters, second call: the broker's PUT-to-overwrite semantics
    // make this a no-op re-write, not an error.
    client.configure_connection(&conn).await.unwrap();
}

#[tokio::test]
async fn create_role_returns_deterministic_name() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/database/roles/role-mysql-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let role = client.create_role("mysql-1").await.unwrap();
    assert_eq!(role, "role-mysql-1");
}

#[tokio::test]
async fn create_policy_returns_deterministic_name() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/sys/policies/acl/policy-mysql-1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let policy = client.create_policy("mysql-1").await.unwrap();
    assert_eq!(policy, "policy-mysql-1");
}

#[tokio::test]
async fn cluster_auth_role_name_includes_namespace() {
    let mock = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/auth/kubernetes/role/role-mysql-1-secd-abc123"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock)
        .await;

    let client = client(&mock);
    let role = client
        .create_cluster_auth_role("mysql-1", "secd-abc123", "sa-mysql-1")
        .await
        .unwrap();
    assert_eq!(role, "role-mysql-1-secd-abc123");
}

#[tokio::test]
async fn delete_cluster_auth_role_tolerates_404() {
    let mock = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v1/auth/kubernetes/role/role-mysql-1-secd-abc123"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(client
        .delete_cluster_auth_role("mysql-1", "secd-abc123")
        .await
        .is_ok());
}
