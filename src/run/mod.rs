//! The `Run` value: constructed at webhook acceptance, carried through the
//! orchestrator pipeline until pod creation (spec.md §3).

pub mod orchestrator;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `database_type` from `secd.yml`. A closed set today; adding a backend
/// means adding a variant and matching on it everywhere one is matched,
/// not editing every orchestrator step (Design Notes §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mysql,
    File,
}

/// The central per-push value. Fields are frozen at construction except
/// where noted; later pipeline steps fill in the `Option`s as they
/// complete (§3).
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub date: String,
    pub namespace: String,
    pub repo_path: std::path::PathBuf,
    pub output_path: std::path::PathBuf,
    pub pv_name_output: String,
    pub pvc_name_output: String,

    pub keycloak_user_id: Option<String>,
    pub metadata: Option<crate::repo::metadata::SecdMetadata>,
    pub database_name: Option<String>,
    pub database_type: Option<DatabaseType>,
    pub run_for_hours: Option<f64>,
    pub image_name: Option<String>,
    pub pvc_name: Option<String>,
    pub vault_role_name: Option<String>,
    pub env_vars: Vec<(String, String)>,
}

impl Run {
    /// Construct a fresh run: generate a 32-char lowercase hex id (UUIDv4
    /// with dashes removed), freeze the wall-clock date, and derive every
    /// name that depends only on `run_id` (§3, §4.7 step 2).
    pub fn new(repo_root: &std::path::Path) -> Self {
        let run_id = Uuid::new_v4().simple().to_string();
        let date = Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let namespace = format!("secd-{run_id}");
        let repo_path = repo_root.join(&run_id);
        let output_path = repo_path.join("outputs").join(format!("{date}-{run_id}"));

        Self {
            pv_name_output: format!("secd-pv-{run_id}-output"),
            pvc_name_output: format!("secd-pvc-{run_id}-output"),
            run_id,
            date,
            namespace,
            repo_path,
            output_path,
            keycloak_user_id: None,
            metadata: None,
            database_name: None,
            database_type: None,
            run_for_hours: None,
            image_name: None,
            pvc_name: None,
            vault_role_name: None,
            env_vars: Vec::new(),
        }
    }

    /// `rununtil = now + run_for_hours`, serialized ISO-8601 (§3, §4.7).
    pub fn rununtil(&self) -> Option<DateTime<Local>> {
        let hours = self.run_for_hours?;
        Some(Local::now() + chrono::Duration::milliseconds((hours * 3_600_000.0) as i64))
    }

    pub fn vault_role_name_for(database_name: &str) -> String {
        format!("role-{database_name}")
    }

    /// Cluster-auth role name: unique per run so concurrent runs against the
    /// same database don't collide at the secrets broker (§4.5 step 4).
    pub fn vault_cluster_auth_role_name(&self, database_name: &str) -> String {
        format!("role-{database_name}-{}", self.namespace)
    }

    pub fn service_account_name(database_name: &str) -> String {
        format!("sa-{database_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_32_char_lowercase_hex() {
        let run = Run::new(std::path::Path::new("/data/repos"));
        assert_eq!(run.run_id.len(), 32);
        assert!(run.run_id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn derived_names_follow_run_id() {
        let run = Run::new(std::path::Path::new("/data/repos"));
        assert_eq!(run.namespace, format!("secd-{}", run.run_id));
        assert_eq!(run.pv_name_output, format!("secd-pv-{}-output", run.run_id));
        assert_eq!(run.pvc_name_output, format!("secd-pvc-{}-output", run.run_id));
        assert_eq!(run.repo_path, std::path::Path::new("/data/repos").join(&run.run_id));
    }

    #[test]
    fn output_path_under_repo_path() {
        let run = Run::new(std::path::Path::new("/data/repos"));
        assert!(run.output_path.starts_with(&run.repo_path));
        assert!(run.output_path.ends_with(format!("{}-{}", run.date, run.run_id)));
    }

    #[test]
    fn two_runs_never_collide() {
        let a = Run::new(std::path::Path::new("/data/repos"));
        let b = Run::new(std::path::Path::new("/data/repos"));
        assert_ne!(a.run_id, b.run_id);
        assert_ne!(a.namespace, b.namespace);
    }

    #[test]
    fn cluster_auth_role_name_is_unique_per_namespace() {
        let run = Run::new(std::path::Path::new("/data/repos"));
        let name = run.vault_cluster_auth_role_name("mysql-1");
        assert_eq!(name, format!("role-mysql-1-{}", run.namespace));
    }
}
