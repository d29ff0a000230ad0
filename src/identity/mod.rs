//! Identity provider client (spec.md §4.3): an admin surface for group/role
//! checks and ephemeral user lifecycle, and a token surface for OIDC
//! introspection. Both are thin REST wrappers over a Keycloak-shaped API.

use serde::Deserialize;

/// Placeholder password for temporary users created under the protocol in
/// §4.3. Never treated as a secret — the security property is "the user is
/// deleted", not "the password is unguessable" (SPEC_FULL.md §B).
pub const TEMP_USER_PLACEHOLDER_PASSWORD: &str = "secd-temp-user-not-a-secret";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("gitlab user {0} has no linked identity provider account")]
    NoLinkedIdentity(i64),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("identity provider returned {0}")]
    UnexpectedStatus(reqwest::StatusCode),
}

#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a GitLab numeric user id to the local (Keycloak) user id via
    /// the linked identity's `extern_uid`, per §4.7 step 3. Every other
    /// method on this trait takes a local user id, not a GitLab one — this
    /// is the only place that boundary is crossed.
    async fn resolve_user_id(&self, gitlab_user_id: i64) -> Result<String, IdentityError>;

    /// True iff `user_id`'s groups contain an entry named `group_name`.
    async fn in_group(&self, user_id: &str, group_name: &str) -> Result<bool, IdentityError>;

    /// True iff `user_id` holds a role named `role_name` scoped to `client_id`.
    async fn has_role(
        &self,
        user_id: &str,
        client_id: &str,
        role_name: &str,
    ) -> Result<bool, IdentityError>;

    /// Create a user, returning its provider-assigned id.
    async fn create_user(&self, username: &str, password: &str) -> Result<String, IdentityError>;

    /// Delete a user. Idempotent: a missing user is not an error.
    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError>;

    /// Pure function of the introspection response's `active` flag.
    async fn introspect_token(&self, token: &str) -> Result<bool, IdentityError>;

    /// `client_credentials`-style password grant, for services acting as a
    /// temporary user.
    async fn token_for_user(&self, username: &str, password: &str) -> Result<String, IdentityError>;
}

pub struct KeycloakClient {
    http: reqwest::Client,
    base_url: String,
    realm: String,
    client_id: String,
    admin_token: String,
    gitlab_base_url: String,
    gitlab_api_token: String,
}

impl KeycloakClient {
    pub fn new(
        base_url: String,
        realm: String,
        client_id: String,
        admin_token: String,
        gitlab_base_url: String,
        gitlab_api_token: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            realm,
            client_id,
            admin_token,
            gitlab_base_url,
            gitlab_api_token,
        }
    }

    /// Trade the configured admin username/password for a bearer token via
    /// the realm's `password` grant, then construct a client that carries it.
    /// Run once at startup — the composition root holds no admin password
    /// past this call.
    pub async fn bootstrap(
        base_url: String,
        realm: String,
        client_id: String,
        admin_user: &str,
        admin_password: &str,
        gitlab_base_url: String,
        gitlab_api_token: String,
    ) -> Result<Self, IdentityError> {
        let http = reqwest::Client::new();
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let resp = http
            .post(format!(
                "{base_url}/realms/{realm}/protocol/openid-connect/token"
            ))
            .form(&[
                ("grant_type", "password"),
                ("client_id", client_id.as_str()),
                ("username", admin_user),
                ("password", admin_password),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        let body: TokenResponse = resp.json().await?;

        Ok(Self {
            http,
            base_url,
            realm,
            client_id,
            admin_token: body.access_token,
            gitlab_base_url,
            gitlab_api_token,
        })
    }

    fn admin_url(&self, path: &str) -> String {
        format!("{}/admin/realms/{}{path}", self.base_url, self.realm)
    }
}

#[derive(Deserialize)]
struct GitlabIdentity {
    extern_uid: Option<String>,
}

#[derive(Deserialize)]
struct GitlabUser {
    #[serde(default)]
    identities: Vec<GitlabIdentity>,
}

#[derive(Deserialize)]
struct GroupEntry {
    name: String,
}

#[derive(Deserialize)]
struct RoleEntry {
    name: String,
}

#[derive(Deserialize)]
struct IntrospectResponse {
    active: bool,
}

#[async_trait::async_trait]
impl IdentityProvider for KeycloakClient {
    async fn resolve_user_id(&self, gitlab_user_id: i64) -> Result<String, IdentityError> {
        let url = format!("{}/api/v4/users/{gitlab_user_id}", self.gitlab_base_url);
        let resp = self
            .http
            .get(&url)
            .header("PRIVATE-TOKEN", &self.gitlab_api_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UserNotFound(gitlab_user_id.to_string()));
        }
        let user: GitlabUser = resp.json().await?;
        user.identities
            .into_iter()
            .find_map(|i| i.extern_uid)
            .ok_or(IdentityError::NoLinkedIdentity(gitlab_user_id))
    }

    async fn in_group(&self, user_id: &str, group_name: &str) -> Result<bool, IdentityError> {
        let resp = self
            .http
            .get(self.admin_url(&format!("/users/{user_id}/groups")))
            .bearer_auth(&self.admin_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        let groups: Vec<GroupEntry> = resp.json().await?;
        Ok(groups.iter().any(|g| g.name == group_name))
    }

    async fn has_role(
        &self,
        user_id: &str,
        client_id: &str,
        role_name: &str,
    ) -> Result<bool, IdentityError> {
        let resp = self
            .http
            .get(self.admin_url(&format!(
                "/users/{user_id}/role-mappings/clients/{client_id}"
            )))
            .bearer_auth(&self.admin_token)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        let roles: Vec<RoleEntry> = resp.json().await?;
        Ok(roles.iter().any(|r| r.name == role_name))
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<String, IdentityError> {
        let resp = self
            .http
            .post(self.admin_url("/users"))
            .bearer_auth(&self.admin_token)
            .json(&serde_json::json!({
                "username": username,
                "enabled": true,
                "credentials": [{"type": "password", "value": password, "temporary": false}],
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }

        // Keycloak returns the new resource's id via a Location header, not
        // a JSON body.
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let id = location.rsplit('/').next().unwrap_or_default().to_owned();
        if id.is_empty() {
            return Err(IdentityError::UserNotFound(username.to_owned()));
        }
        Ok(id)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), IdentityError> {
        let resp = self
            .http
            .delete(self.admin_url(&format!("/users/{user_id}")))
            .bearer_auth(&self.admin_token)
            .send()
            .await?;
        // 404 is fine: deletion is idempotent by design (§4.3).
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        Ok(())
    }

    async fn introspect_token(&self, token: &str) -> Result<bool, IdentityError> {
        let resp = self
            .http
            .post(format!(
                "{}/realms/{}/protocol/openid-connect/token/introspect",
                self.base_url, self.realm
            ))
            .form(&[("token", token), ("client_id", self.client_id.as_str())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        let body: IntrospectResponse = resp.json().await?;
        Ok(body.active)
    }

    async fn token_for_user(&self, username: &str, password: &str) -> Result<String, IdentityError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let resp = self
            .http
            .post(format!(
                "{}/realms/{}/protocol/openid-connect/token",
                self.base_url, self.realm
            ))
            .form(&[
                ("grant_type", "password"),
                ("client_id", self.client_id.as_str()),
                ("username", username),
                ("password", password),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::UnexpectedStatus(resp.status()));
        }
        let body: TokenResponse = resp.json().await?;
        Ok(body.access_token)
    }
}

/// Run `f` against a freshly created temporary user named
/// `temp_<external_user_id>`, then unconditionally delete it — the
/// `finally`-clause protocol from §4.3. The placeholder password is never
/// treated as a secret; only the unconditional deletion matters.
pub async fn with_temp_user<T, F, Fut>(
    identity: &dyn IdentityProvider,
    external_user_id: &str,
    f: F,
) -> Result<T, IdentityError>
where
    F: FnOnce(String) -> Fut,
    Fut: std::future::Future<Output = Result<T, IdentityError>>,
{
    let username = format!("temp_{external_user_id}");
    let user_id = identity
        .create_user(&username, TEMP_USER_PLACEHOLDER_PASSWORD)
        .await?;

    let result = f(user_id.clone()).await;

    // Unconditional cleanup regardless of `f`'s outcome.
    if let Err(e) = identity.delete_user(&user_id).await {
        tracing::warn!(%user_id, error = %e, "failed to delete temporary user");
    }

    result
}
