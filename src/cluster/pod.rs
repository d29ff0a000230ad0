//! Pod construction for the two `database_type` variants (spec.md §4.6).
//! Pure builder functions — no API calls — so they can be unit tested the
//! way the teacher tests its agent pod builder.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::run::Run;

const OUTPUT_MOUNT: &str = "/output";
const DATASET_MOUNT: &str = "/data";

pub struct PodParams<'a> {
    pub run: &'a Run,
    pub database_name: &'a str,
    pub image: &'a str,
    pub gpu: bool,
    pub cache_pvc_name: Option<&'a str>,
    pub cache_mount_path: Option<&'a str>,
}

/// The pod environment named in spec.md §6: `OUTPUT_PATH`, `SECD`,
/// `NFS_PATH`, `DB_HOST`, plus `RUN_ID` for correlation. `DB_USER`/`DB_PASS`
/// are deliberately absent — for mysql runs they only appear once the
/// entrypoint sources the broker-rendered credentials file. Exposed so the
/// orchestrator can record the same pairs onto `Run::env_vars`.
pub fn base_env_pairs(run: &Run, database_name: &str) -> Vec<(String, String)> {
    vec![
        ("OUTPUT_PATH".to_owned(), OUTPUT_MOUNT.to_owned()),
        ("SECD".to_owned(), "PRODUCTION".to_owned()),
        ("NFS_PATH".to_owned(), DATASET_MOUNT.to_owned()),
        (
            "DB_HOST".to_owned(),
            format!("service-{database_name}.storage.svc.cluster.local"),
        ),
        ("RUN_ID".to_owned(), run.run_id.clone()),
    ]
}

fn base_env(run: &Run, database_name: &str) -> Vec<EnvVar> {
    base_env_pairs(run, database_name)
        .into_iter()
        .map(|(name, value)| env_var(&name, &value))
        .collect()
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn output_volume(run: &Run) -> (Volume, VolumeMount) {
    (
        Volume {
            name: "output".into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: run.pvc_name_output.clone(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
        VolumeMount {
            name: "output".into(),
            mount_path: OUTPUT_MOUNT.into(),
            ..Default::default()
        },
    )
}

fn cache_volume(pvc_name: &str, mount_path: &str) -> (Volume, VolumeMount) {
    (
        Volume {
            name: "cache".into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: pvc_name.to_owned(),
                read_only: Some(false),
            }),
            ..Default::default()
        },
        VolumeMount {
            name: "cache".into(),
            mount_path: mount_path.to_owned(),
            ..Default::default()
        },
    )
}

fn gpu_resources() -> ResourceRequirements {
    let gpu = BTreeMap::from([("nvidia.com/gpu".to_owned(), Quantity("1".into()))]);
    ResourceRequirements {
        limits: Some(gpu.clone()),
        requests: Some(gpu),
        ..Default::default()
    }
}

fn labels(database_name: &str, run_id: &str, gpu: bool) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("name".to_owned(), database_name.to_owned()),
        ("run_id".to_owned(), run_id.to_owned()),
    ]);
    if gpu {
        labels.insert("gpu".to_owned(), "true".to_owned());
    }
    labels
}

/// File-DB variant: mounts the shared dataset PVC read-only at `/data`, no
/// secrets-broker sidecar, no service account.
pub fn build_file_db_pod(params: &PodParams<'_>, dataset_pvc_name: &str) -> Pod {
    let pod_name = params.run.namespace.clone();
    let (output_vol, output_mount) = output_volume(params.run);

    let dataset_vol = Volume {
        name: "dataset".into(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: dataset_pvc_name.to_owned(),
            read_only: Some(true),
        }),
        ..Default::default()
    };
    let dataset_mount = VolumeMount {
        name: "dataset".into(),
        mount_path: DATASET_MOUNT.into(),
        read_only: Some(true),
        ..Default::default()
    };

    let mut volumes = vec![output_vol, dataset_vol];
    let mut mounts = vec![output_mount, dataset_mount];
    if let (Some(cache_pvc), Some(mount_path)) = (params.cache_pvc_name, params.cache_mount_path) {
        let (v, m) = cache_volume(cache_pvc, mount_path);
        volumes.push(v);
        mounts.push(m);
    }

    let mut resources = None;
    if params.gpu {
        resources = Some(gpu_resources());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name),
            namespace: Some(params.run.namespace.clone()),
            labels: Some(labels(params.database_name, &params.run.run_id, params.gpu)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".into()),
            containers: vec![Container {
                name: format!("secd-{}", params.run.run_id),
                image: Some(params.image.to_owned()),
                env: Some(base_env(params.run, params.database_name)),
                volume_mounts: Some(mounts),
                resources,
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Relational-DB (mysql) variant: no dataset PVC; carries the secrets-broker
/// sidecar annotations that render short-lived credentials into
/// `/vault/secrets/dbcreds`, sourced by the entrypoint before exec'ing the
/// user program (§4.6).
pub fn build_mysql_pod(params: &PodParams<'_>, service_account: &str) -> Pod {
    let pod_name = params.run.namespace.clone();
    let (output_vol, output_mount) = output_volume(params.run);

    let mut volumes = vec![output_vol];
    let mut mounts = vec![output_mount];
    if let (Some(cache_pvc), Some(mount_path)) = (params.cache_pvc_name, params.cache_mount_path) {
        let (v, m) = cache_volume(cache_pvc, mount_path);
        volumes.push(v);
        mounts.push(m);
    }

    let cluster_auth_role = params.run.vault_cluster_auth_role_name(params.database_name);
    let secret_path = format!("database/creds/role-{}", params.database_name);
    let annotations = BTreeMap::from([
        ("vault.hashicorp.com/agent-inject".to_owned(), "true".to_owned()),
        ("vault.hashicorp.com/role".to_owned(), cluster_auth_role),
        (
            "vault.hashicorp.com/agent-inject-secret-dbcreds".to_owned(),
            secret_path.clone(),
        ),
        (
            "vault.hashicorp.com/agent-inject-template-dbcreds".to_owned(),
            format!(
                "{{{{ with secret \"{secret_path}\" }}}}\nexport DB_USER=\"{{{{ .Data.username }}}}\"\nexport DB_PASS=\"{{{{ .Data.password }}}}\"\n{{{{ end }}}}\n"
            ),
        ),
    ]);

    let mut resources = None;
    if params.gpu {
        resources = Some(gpu_resources());
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(pod_name),
            namespace: Some(params.run.namespace.clone()),
            labels: Some(labels(params.database_name, &params.run.run_id, params.gpu)),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".into()),
            service_account_name: Some(service_account.to_owned()),
            containers: vec![Container {
                name: format!("secd-{}", params.run.run_id),
                image: Some(params.image.to_owned()),
                command: Some(vec!["/bin/sh".into(), "-c".into()]),
                args: Some(vec![
                    ". /vault/secrets/dbcreds && env | grep DB_ && python /app/app.py".into(),
                ]),
                env: Some(base_env(params.run, params.database_name)),
                volume_mounts: Some(mounts),
                resources,
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{DatabaseType, Run};

    fn test_run() -> Run {
        let mut run = Run::new(std::path::Path::new("/data/repos"));
        run.database_name = Some("mysql-1".into());
        run.database_type = Some(DatabaseType::Mysql);
        run
    }

    #[test]
    fn mysql_pod_has_sidecar_annotations() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "registry/secd/abc",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let annotations = pod.metadata.annotations.unwrap();
        assert_eq!(annotations["vault.hashicorp.com/agent-inject"], "true");
        assert_eq!(
            annotations["vault.hashicorp.com/role"],
            format!("role-mysql-1-{}", run.namespace)
        );
        assert!(annotations["vault.hashicorp.com/agent-inject-secret-dbcreds"]
            .contains("database/creds/role-mysql-1"));
    }

    #[test]
    fn mysql_pod_entrypoint_sources_dbcreds() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let spec = pod.spec.unwrap();
        let args = spec.containers[0].args.as_ref().unwrap();
        assert!(args[0].contains(". /vault/secrets/dbcreds"));
        assert!(args[0].contains("python /app/app.py"));
        assert_eq!(spec.service_account_name.as_deref(), Some("sa-mysql-1"));
    }

    #[test]
    fn mysql_pod_has_no_dataset_volume() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let volumes = pod.spec.unwrap().volumes.unwrap();
        assert!(volumes.iter().all(|v| v.name != "dataset"));
    }

    #[test]
    fn file_db_pod_mounts_dataset_readonly() {
        let mut run = test_run();
        run.database_name = Some("karolinska-1".into());
        run.database_type = Some(DatabaseType::File);
        let params = PodParams {
            run: &run,
            database_name: "karolinska-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_file_db_pod(&params, "pvc-storage-karolinska-1");
        let spec = pod.spec.unwrap();
        let dataset_mount = spec.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .find(|m| m.name == "dataset")
            .unwrap();
        assert_eq!(dataset_mount.mount_path, "/data");
        assert_eq!(dataset_mount.read_only, Some(true));
        assert!(pod.metadata.annotations.is_none());
    }

    #[test]
    fn file_db_pod_has_no_service_account() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "karolinska-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_file_db_pod(&params, "pvc-storage-karolinska-1");
        assert!(pod.spec.unwrap().service_account_name.is_none());
    }

    #[test]
    fn gpu_true_requests_one_gpu() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: true,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        assert_eq!(resources.limits.unwrap()["nvidia.com/gpu"], Quantity("1".into()));
        assert_eq!(pod.metadata.labels.unwrap()["gpu"], "true");
    }

    #[test]
    fn cache_volume_mounted_when_configured() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: false,
            cache_pvc_name: Some("secd-pvc-abc-cache"),
            cache_mount_path: Some("/cache"),
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let mounts = pod.spec.unwrap().containers[0].volume_mounts.clone().unwrap();
        let cache = mounts.iter().find(|m| m.name == "cache").unwrap();
        assert_eq!(cache.mount_path, "/cache");
    }

    #[test]
    fn restart_policy_never() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        assert_eq!(pod.spec.unwrap().restart_policy.as_deref(), Some("Never"));
    }

    #[test]
    fn pod_env_includes_output_and_nfs_paths() {
        let run = test_run();
        let params = PodParams {
            run: &run,
            database_name: "mysql-1",
            image: "img",
            gpu: false,
            cache_pvc_name: None,
            cache_mount_path: None,
        };
        let pod = build_mysql_pod(&params, "sa-mysql-1");
        let env = pod.spec.unwrap().containers[0].env.clone().unwrap();
        let get = |k: &str| env.iter().find(|e| e.name == k).and_then(|e| e.value.clone());
        assert_eq!(get("OUTPUT_PATH").as_deref(), Some("/output"));
        assert_eq!(get("SECD").as_deref(), Some("PRODUCTION"));
        assert_eq!(get("NFS_PATH").as_deref(), Some("/data"));
    }
}
