//! Integration tests for the Keycloak-shaped identity client (spec.md §4.3)
//! against a mock admin/OIDC API.

use secd::identity::{IdentityProvider, KeycloakClient};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(mock: &MockServer) -> KeycloakClient {
    KeycloakClient::new(
        mock.uri(),
        "secd".into(),
        "secd".into(),
        "admin-token".into(),
        mock.uri(),
        "glpat-token".into(),
    )
}

#[tokio::test]
async fn resolve_user_id_reads_extern_uid_of_first_identity() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 42,
            "identities": [
                {"provider": "keycloak", "extern_uid": "kc-uuid-1"},
            ],
        })))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert_eq!(client.resolve_user_id(42).await.unwrap(), "kc-uuid-1");
}

#[tokio::test]
async fn resolve_user_id_fails_when_no_identity_linked() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v4/users/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7,
            "identities": [],
        })))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(client.resolve_user_id(7).await.is_err());
}

#[tokio::test]
async fn in_group_true_when_group_present() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/secd/users/u42/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "other"},
            {"name": "secd"},
        ])))
        .expect(1)
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(client.in_group("u42", "secd").await.unwrap());
}

#[tokio::test]
async fn in_group_false_when_group_absent() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/realms/secd/users/u42/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "other"},
        ])))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(!client.in_group("u42", "secd").await.unwrap());
}

#[tokio::test]
async fn has_role_checks_client_scoped_roles() {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/admin/realms/secd/users/u42/role-mappings/clients/database-service",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "mysql-1"},
        ])))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(client
        .has_role("u42", "database-service", "mysql-1")
        .await
        .unwrap());
    assert!(!client
        .has_role("u42", "database-service", "mysql-2")
        .await
        .is_ok_and(|has| has));
}

#[tokio::test]
async fn delete_user_tolerates_404() {
    let mock = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/admin/realms/secd/users/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(client.delete_user("gone").await.is_ok());
}

#[tokio::test]
async fn introspect_token_is_pure_function_of_active_flag() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/realms/secd/protocol/openid-connect/token/introspect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "active": false,
        })))
        .mount(&mock)
        .await;

    let client = client(&mock);
    assert!(!client.introspect_token("sometoken").await.unwrap());
}
