//! Kubernetes cluster client (spec.md §4.6): a thin typed wrapper over the
//! API, split by object kind. `pod` holds the two pod-template variants;
//! everything else lives here as methods on [`ClusterClient`].

pub mod pod;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret, ServiceAccount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, ObjectList, PatchParams, PostParams};
use kube::{Client, Error as KubeError};

const NAMESPACE_PREFIX: &str = "secd-";
const RUNUNTIL_ANNOTATION: &str = "rununtil";
const USERID_ANNOTATION: &str = "userid";

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error(transparent)]
    Kube(#[from] KubeError),

    #[error("dataset pod for database {0} not found in namespace storage")]
    DatasetPodNotFound(String),

    #[error("dataset pod for database {0} has no bound PVC")]
    DatasetPvcMissing(String),

    #[error("refusing to delete the default service account")]
    RefuseDeleteDefault,

    #[error("secret {0}/{1} has no key {2}")]
    SecretKeyMissing(String, String, String),
}

pub struct ClusterClient {
    client: Client,
}

impl ClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    // ---- Namespace ----------------------------------------------------

    pub async fn create_run_namespace(
        &self,
        name: &str,
        user_id: &str,
        rununtil: chrono::DateTime<chrono::Local>,
    ) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let annotations = BTreeMap::from([
            (USERID_ANNOTATION.to_owned(), user_id.to_owned()),
            (RUNUNTIL_ANNOTATION.to_owned(), rununtil.to_rfc3339()),
        ]);
        // `access=database-access`: the label any network policy restricting
        // egress from analyst pods keys off (§3).
        let labels = BTreeMap::from([("access".to_owned(), "database-access".to_owned())]);
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                annotations: Some(annotations),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        Ok(())
    }

    /// All namespaces whose name starts with `secd-` (§4.8 step 1).
    pub async fn list_run_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list: ObjectList<Namespace> = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(|ns| {
                ns.metadata
                    .name
                    .as_deref()
                    .is_some_and(|n| n.starts_with(NAMESPACE_PREFIX))
            })
            .collect())
    }

    pub async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses `rununtil`/`userid` annotations on a run namespace (§8 invariant 2, §4.8).
    pub fn run_deadline(ns: &Namespace) -> Option<chrono::DateTime<chrono::Local>> {
        let raw = ns.metadata.annotations.as_ref()?.get(RUNUNTIL_ANNOTATION)?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Local))
    }

    // ---- Persistent Volume ---------------------------------------------

    pub async fn create_nfs_pv(
        &self,
        name: &str,
        nfs_server: &str,
        nfs_path: &str,
        capacity: &str,
    ) -> Result<(), ClusterError> {
        use k8s_openapi::api::core::v1::{NFSVolumeSource, PersistentVolumeSpec};
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                capacity: Some(BTreeMap::from([(
                    "storage".to_owned(),
                    Quantity(capacity.to_owned()),
                )])),
                persistent_volume_reclaim_policy: Some("Retain".into()),
                storage_class_name: Some("nfs".into()),
                nfs: Some(NFSVolumeSource {
                    server: nfs_server.to_owned(),
                    path: nfs_path.to_owned(),
                    read_only: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        api.create(&PostParams::default(), &pv).await?;
        Ok(())
    }

    pub async fn get_pv(&self, name: &str) -> Result<Option<PersistentVolume>, ClusterError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(pv) => Ok(Some(pv)),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete_pv(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clears `claimRef` on any PV currently `Released`, returning it to
    /// `Available` for reuse (§4.8 step 3.b, §8 invariant 5).
    pub async fn release_pv_if_released(&self, name: &str) -> Result<(), ClusterError> {
        let Some(pv) = self.get_pv(name).await? else {
            return Ok(());
        };
        let phase = pv
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or_default();
        if phase != "Released" {
            return Ok(());
        }

        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "spec": { "claimRef": null } });
        api.patch(
            name,
            &PatchParams::default(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
        Ok(())
    }

    // ---- Persistent Volume Claim ----------------------------------------

    pub async fn create_pvc(
        &self,
        namespace: &str,
        name: &str,
        volume_name: &str,
        capacity: &str,
    ) -> Result<(), ClusterError> {
        use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
        use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
        use k8s_openapi::api::core::v1::ResourceRequirements;

        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let pvc = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".into()]),
                // Explicit `volumeName` binding: the claim binds to exactly
                // this PV, not whatever the storage class would provision.
                volume_name: Some(volume_name.to_owned()),
                storage_class_name: Some("nfs".into()),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_owned(),
                        Quantity(capacity.to_owned()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        api.create(&PostParams::default(), &pvc).await?;
        Ok(())
    }

    pub async fn list_pvcs(
        &self,
        namespace: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    pub async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn pvc_exists(&self, namespace: &str, name: &str) -> Result<bool, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Poll until the PVC is gone or `wait_secs` elapses. Returns whether it
    /// actually disappeared (§4.8 step 3.b).
    pub async fn wait_pvc_gone(
        &self,
        namespace: &str,
        name: &str,
        wait_secs: u64,
        poll_secs: u64,
    ) -> Result<bool, ClusterError> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(wait_secs);
        loop {
            if !self.pvc_exists(namespace, name).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(std::time::Duration::from_secs(poll_secs)).await;
        }
    }

    // ---- Service Account -------------------------------------------------

    pub async fn create_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let sa = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &sa).await?;
        Ok(())
    }

    pub async fn delete_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ClusterError> {
        if name == "default" {
            return Err(ClusterError::RefuseDeleteDefault);
        }
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every service account in `namespace` except `default`
    /// (§4.8 step 3.c).
    pub async fn delete_non_default_service_accounts(
        &self,
        namespace: &str,
    ) -> Result<(), ClusterError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        for sa in list.items {
            let Some(name) = sa.metadata.name else { continue };
            if name == "default" {
                continue;
            }
            self.delete_service_account(namespace, &name).await?;
        }
        Ok(())
    }

    // ---- Secret ------------------------------------------------------

    pub async fn read_secret_key(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<u8>, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;
        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(key))
            .ok_or_else(|| {
                ClusterError::SecretKeyMissing(namespace.to_owned(), name.to_owned(), key.to_owned())
            })?;
        // `ByteString` deserializes the wire-format base64 into raw bytes
        // already; no further decoding needed here.
        Ok(data.0.clone())
    }

    // ---- Pod ---------------------------------------------------------

    pub async fn create_pod(&self, namespace: &str, pod: Pod) -> Result<(), ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), &pod).await?;
        Ok(())
    }

    pub async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(KubeError::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    pub async fn find_pod_by_label(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Option<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items.into_iter().next())
    }

    pub async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .logs(name, &kube::api::LogParams::default())
            .await?)
    }

    /// Discover the dataset pod's bound PVC via label `name=<database_name>`
    /// in the `storage` namespace, and confirm the PV behind it still
    /// exists (§4.7 step 7).
    pub async fn discover_dataset_pvc(&self, database_name: &str) -> Result<String, ClusterError> {
        let pod = self
            .find_pod_by_label("storage", &format!("name={database_name}"))
            .await?
            .ok_or_else(|| ClusterError::DatasetPodNotFound(database_name.to_owned()))?;

        let claim_name = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.volumes.as_ref())
            .and_then(|vols| {
                vols.iter()
                    .find_map(|v| v.persistent_volume_claim.as_ref())
            })
            .map(|pvc_source| pvc_source.claim_name.clone())
            .ok_or_else(|| ClusterError::DatasetPvcMissing(database_name.to_owned()))?;

        let pvc_api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), "storage");
        let pvc = pvc_api.get(&claim_name).await?;
        let volume_name = pvc
            .spec
            .as_ref()
            .and_then(|s| s.volume_name.clone())
            .ok_or_else(|| ClusterError::DatasetPvcMissing(database_name.to_owned()))?;
        if self.get_pv(&volume_name).await?.is_none() {
            return Err(ClusterError::DatasetPvcMissing(database_name.to_owned()));
        }

        Ok(claim_name)
    }

    /// §4.8 step 2 `pod-terminated`: the main (non-sidecar) container,
    /// identified by the `secd-` name prefix, has reached `terminated`.
    /// A namespace with no pods yet is never terminated (Design Notes §9).
    pub fn main_container_terminated(pods: &[Pod]) -> bool {
        let Some(pod) = pods.first() else {
            return false;
        };
        let Some(status) = &pod.status else {
            return false;
        };
        let Some(statuses) = &status.container_statuses else {
            return false;
        };
        statuses
            .iter()
            .filter(|cs| cs.name.starts_with("secd-"))
            .any(|cs| {
                cs.state
                    .as_ref()
                    .is_some_and(|s| s.terminated.is_some())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateTerminated, ContainerStatus, PodStatus,
    };

    fn pod_with_state(name: &str, terminated: bool) -> Pod {
        Pod {
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: name.to_owned(),
                    state: Some(ContainerState {
                        terminated: terminated.then(|| ContainerStateTerminated {
                            exit_code: 0,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn no_pods_yet_is_not_terminated() {
        assert!(!ClusterClient::main_container_terminated(&[]));
    }

    #[test]
    fn main_container_terminated_true() {
        let pod = pod_with_state("secd-abc123", true);
        assert!(ClusterClient::main_container_terminated(&[pod]));
    }

    #[test]
    fn sidecar_termination_ignored() {
        let pod = pod_with_state("vault-agent", true);
        assert!(!ClusterClient::main_container_terminated(&[pod]));
    }

    #[test]
    fn running_main_container_not_terminated() {
        let pod = pod_with_state("secd-abc123", false);
        assert!(!ClusterClient::main_container_terminated(&[pod]));
    }

    #[test]
    fn run_deadline_parses_rfc3339_annotation() {
        let ns = Namespace {
            metadata: ObjectMeta {
                annotations: Some(BTreeMap::from([(
                    "rununtil".to_owned(),
                    "2020-01-01T00:00:00+00:00".to_owned(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(ClusterClient::run_deadline(&ns).is_some());
    }

    #[test]
    fn run_deadline_missing_annotation_is_none() {
        let ns = Namespace::default();
        assert!(ClusterClient::run_deadline(&ns).is_none());
    }
}
