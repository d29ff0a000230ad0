//! Secrets broker client (spec.md §4.5): a Vault-shaped dynamic-credentials
//! store. Every configure/create call here is a plain HTTP `PUT`, which is
//! naturally idempotent against the broker's own API — "already exists" is
//! never surfaced as an error, matching §4.5 and the idempotence invariant
//! in §8.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum SecretsBrokerError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("secrets broker returned {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

/// Parameters for registering a database connection (§4.5 step 1).
pub struct DatabaseConnection<'a> {
    pub database_name: &'a str,
    pub url_template: &'a str,
    pub admin_username: &'a str,
    pub admin_password: &'a str,
}

#[async_trait::async_trait]
pub trait SecretsBroker: Send + Sync {
    /// Register (idempotently) a named database connection.
    async fn configure_connection(
        &self,
        conn: &DatabaseConnection<'_>,
    ) -> Result<(), SecretsBrokerError>;

    /// Register `role-<database_name>`: per-request SELECT-only user,
    /// default TTL 1h, max TTL 24h.
    async fn create_role(&self, database_name: &str) -> Result<String, SecretsBrokerError>;

    /// Register `policy-<database_name>` granting `read` on that role's
    /// credentials path.
    async fn create_policy(&self, database_name: &str) -> Result<String, SecretsBrokerError>;

    /// Bind `sa-<database_name>` in `namespace` to the policy, TTL 1h.
    /// Cluster auth role name is `role-<database_name>-<namespace>`.
    async fn create_cluster_auth_role(
        &self,
        database_name: &str,
        namespace: &str,
        service_account: &str,
    ) -> Result<String, SecretsBrokerError>;

    /// Best-effort deletion at tear-down; leftovers are tolerated because
    /// names are deterministic per-run (§4.5).
    async fn delete_cluster_auth_role(
        &self,
        database_name: &str,
        namespace: &str,
    ) -> Result<(), SecretsBrokerError>;
}

pub struct VaultClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl VaultClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token,
        }
    }

    async fn put(&self, path: &str, body: serde_json::Value) -> Result<(), SecretsBrokerError> {
        let resp = self
            .http
            .put(format!("{}/v1/{path}", self.base_url))
            .header("X-Vault-Token", &self.token)
            .json(&body)
            .send()
            .await?;
        // Vault's config endpoints are PUT-to-overwrite; any 2xx (including
        // a no-op re-write of identical config) counts as success.
        if !resp.status().is_success() {
            return Err(SecretsBrokerError::UnexpectedStatus(resp.status()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretsBroker for VaultClient {
    async fn configure_connection(
        &self,
        conn: &DatabaseConnection<'_>,
    ) -> Result<(), SecretsBrokerError> {
        self.put(
            &format!("database/config/{}", conn.database_name),
            serde_json::json!({
                "plugin_name": "mysql-database-plugin",
                "connection_url": conn.url_template,
                "username": conn.admin_username,
                "password": conn.admin_password,
                "allowed_roles": [format!("role-{}", conn.database_name)],
            }),
        )
        .await
    }

    async fn create_role(&self, database_name: &str) -> Result<String, SecretsBrokerError> {
        let role_name = crate::run::Run::vault_role_name_for(database_name);
        let creation_stmt = "CREATE USER '{{name}}'@'%' IDENTIFIED BY '{{password}}'; \
             GRANT SELECT ON *.* TO '{{name}}'@'%';";
        self.put(
            &format!("database/roles/{role_name}"),
            serde_json::json!({
                "db_name": database_name,
                "creation_statements": [creation_stmt],
                "default_ttl": "1h",
                "max_ttl": "24h",
            }),
        )
        .await?;
        Ok(role_name)
    }

    async fn create_policy(&self, database_name: &str) -> Result<String, SecretsBrokerError> {
        let policy_name = format!("policy-{database_name}");
        let role_name = crate::run::Run::vault_role_name_for(database_name);
        let policy_hcl = format!(
            "path \"database/creds/{role_name}\" {{\n  capabilities = [\"read\"]\n}}\n"
        );
        let resp = self
            .http
            .put(format!("{}/v1/sys/policies/acl/{policy_name}", self.base_url))
            .header("X-Vault-Token", &self.token)
            .json(&serde_json::json!({ "policy": policy_hcl }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SecretsBrokerError::UnexpectedStatus(resp.status()));
        }
        Ok(policy_name)
    }

    async fn create_cluster_auth_role(
        &self,
        database_name: &str,
        namespace: &str,
        service_account: &str,
    ) -> Result<String, SecretsBrokerError> {
        let cluster_auth_role = format!("role-{database_name}-{namespace}");
        let policy_name = format!("policy-{database_name}");
        let mut body = HashMap::new();
        body.insert(
            "bound_service_account_names".to_owned(),
            serde_json::json!([service_account]),
        );
        body.insert(
            "bound_service_account_namespaces".to_owned(),
            serde_json::json!([namespace]),
        );
        body.insert("policies".to_owned(), serde_json::json!([policy_name]));
        body.insert("ttl".to_owned(), serde_json::json!("1h"));

        self.put(
            &format!("auth/kubernetes/role/{cluster_auth_role}"),
            serde_json::to_value(body).unwrap(),
        )
        .await?;
        Ok(cluster_auth_role)
    }

    async fn delete_cluster_auth_role(
        &self,
        database_name: &str,
        namespace: &str,
    ) -> Result<(), SecretsBrokerError> {
        let cluster_auth_role = format!("role-{database_name}-{namespace}");
        let resp = self
            .http
            .delete(format!(
                "{}/v1/auth/kubernetes/role/{cluster_auth_role}",
                self.base_url
            ))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(SecretsBrokerError::UnexpectedStatus(resp.status()));
        }
        Ok(())
    }
}
