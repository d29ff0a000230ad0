use std::env;

/// Typed settings tree, loaded once at startup and handed to collaborators
/// by reference or `Arc`. Read-only after [`Config::load`] returns.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,

    /// Host-side root under which `<run_id>` checkout directories live.
    pub repo_root: String,
    /// Host-side root mirrored by the NFS server backing output/dataset PVs.
    pub pvc_root: String,
    /// Host-side root for per-user cache directories.
    pub cache_root: String,
    /// NFS server name exported in PV specs. Constant per spec §6.
    pub nfs_server: String,

    pub registry_url: String,
    pub registry_project: String,
    pub registry_user: String,
    pub registry_password: String,
    pub registry_ca_cert: Option<String>,

    pub gitlab_base_url: String,
    pub gitlab_webhook_secret: String,
    /// Private token used for the signature/file-presence REST calls in §4.2.
    pub gitlab_api_token: String,
    /// Credentials injected into the clone URL (§4.2 Clone).
    pub gitlab_clone_user: String,
    pub gitlab_clone_password: String,

    pub keycloak_base_url: String,
    pub keycloak_realm: String,
    pub keycloak_admin_user: String,
    pub keycloak_admin_password: String,
    pub keycloak_client_id: String,

    pub vault_base_url: String,
    pub vault_token: String,

    /// Group an external identity must belong to for a run to launch.
    pub gate_group: String,
    /// Client whose roles gate per-database access (§4.7 step 5).
    pub database_service_client: String,
    /// Admin credentials the secrets broker uses to mint per-request
    /// database users (§4.5 step 1). Shared across databases; each
    /// connection's URL template is derived from `database_name`.
    pub database_admin_user: String,
    pub database_admin_password: String,

    pub reaper_interval_secs: u64,
    pub pvc_delete_wait_secs: u64,
    pub pvc_delete_poll_secs: u64,
}

impl Config {
    /// Load configuration from the environment, applying the teacher's
    /// dev-friendly fallback idiom: every value has a usable local default.
    pub fn load() -> Self {
        Self {
            listen: env::var("SECD_LISTEN").unwrap_or_else(|_| "0.0.0.0:8080".into()),

            repo_root: env::var("SECD_REPO_ROOT").unwrap_or_else(|_| "/data/repos".into()),
            pvc_root: env::var("SECD_PVC_ROOT").unwrap_or_else(|_| "/data/pvc".into()),
            cache_root: env::var("SECD_CACHE_ROOT").unwrap_or_else(|_| "/data/cache".into()),
            nfs_server: env::var("SECD_NFS_SERVER").unwrap_or_else(|_| "nfs.secd".into()),

            registry_url: env::var("SECD_REGISTRY_URL")
                .unwrap_or_else(|_| "registry.secd.local".into()),
            registry_project: env::var("SECD_REGISTRY_PROJECT").unwrap_or_else(|_| "secd".into()),
            registry_user: env::var("SECD_REGISTRY_USER").unwrap_or_else(|_| "secd".into()),
            registry_password: env::var("SECD_REGISTRY_PASSWORD").unwrap_or_default(),
            registry_ca_cert: env::var("SECD_REGISTRY_CA_CERT").ok(),

            gitlab_base_url: env::var("SECD_GITLAB_URL")
                .unwrap_or_else(|_| "https://git.secd.local".into()),
            gitlab_webhook_secret: env::var("SECD_GITLAB_WEBHOOK_SECRET").unwrap_or_default(),
            gitlab_api_token: env::var("SECD_GITLAB_API_TOKEN").unwrap_or_default(),
            gitlab_clone_user: env::var("SECD_GITLAB_CLONE_USER").unwrap_or_else(|_| "secd".into()),
            gitlab_clone_password: env::var("SECD_GITLAB_CLONE_PASSWORD").unwrap_or_default(),

            keycloak_base_url: env::var("SECD_KEYCLOAK_URL")
                .unwrap_or_else(|_| "https://auth.secd.local".into()),
            keycloak_realm: env::var("SECD_KEYCLOAK_REALM").unwrap_or_else(|_| "secd".into()),
            keycloak_admin_user: env::var("SECD_KEYCLOAK_ADMIN_USER")
                .unwrap_or_else(|_| "admin".into()),
            keycloak_admin_password: env::var("SECD_KEYCLOAK_ADMIN_PASSWORD").unwrap_or_default(),
            keycloak_client_id: env::var("SECD_KEYCLOAK_CLIENT_ID")
                .unwrap_or_else(|_| "secd".into()),

            vault_base_url: env::var("SECD_VAULT_URL")
                .unwrap_or_else(|_| "https://vault.secd.local".into()),
            vault_token: env::var("SECD_VAULT_TOKEN").unwrap_or_default(),

            gate_group: env::var("SECD_GATE_GROUP").unwrap_or_else(|_| "secd".into()),
            database_service_client: env::var("SECD_DATABASE_SERVICE_CLIENT")
                .unwrap_or_else(|_| "database-service".into()),
            database_admin_user: env::var("SECD_DATABASE_ADMIN_USER")
                .unwrap_or_else(|_| "secd_admin".into()),
            database_admin_password: env::var("SECD_DATABASE_ADMIN_PASSWORD").unwrap_or_default(),

            reaper_interval_secs: env_u64("SECD_REAPER_INTERVAL_SECS", 5),
            pvc_delete_wait_secs: env_u64("SECD_PVC_DELETE_WAIT_SECS", 60),
            pvc_delete_poll_secs: env_u64("SECD_PVC_DELETE_POLL_SECS", 5),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
