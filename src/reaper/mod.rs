//! Reaper (spec.md §4.8): a single-threaded loop that wakes on a fixed
//! interval, tears down every `secd-*` namespace whose run has expired or
//! whose main container has terminated, and otherwise leaves the cluster
//! alone. Grounded on the reaper-loop and reap-then-continue shape the rest
//! of this codebase uses for its other background sweeps.

use std::path::Path;
use std::sync::Arc;

use chrono::Local;

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::repo::RepoProvider;

pub struct Reaper {
    config: Arc<Config>,
    repo: Arc<dyn RepoProvider>,
    cluster: Arc<ClusterClient>,
}

impl Reaper {
    pub fn new(config: Arc<Config>, repo: Arc<dyn RepoProvider>, cluster: Arc<ClusterClient>) -> Self {
        Self { config, repo, cluster }
    }

    /// Run the sweep loop until `shutdown` resolves. One bad namespace never
    /// halts the loop (§4.8, §7).
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        let interval = std::time::Duration::from_secs(self.config.reaper_interval_secs);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("reaper shutting down");
                    return;
                }
                () = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "reaper sweep failed");
                    }
                }
            }
        }
    }

    /// One pass over every `secd-*` namespace (§4.8 steps 1–4).
    async fn sweep(&self) -> Result<(), anyhow::Error> {
        let namespaces = self.cluster.list_run_namespaces().await?;
        for ns in namespaces {
            let Some(name) = ns.metadata.name.clone() else { continue };
            match self.should_clean(&ns, &name).await {
                Ok(true) => {
                    if let Err(e) = self.reap(&name).await {
                        tracing::error!(namespace = %name, error = %e, "failed to reap namespace");
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(namespace = %name, error = %e, "failed to evaluate should-clean");
                }
            }
        }
        Ok(())
    }

    /// `should-clean? = expired OR pod-terminated` (§4.8 step 2). A
    /// namespace with no pods scheduled yet is never "terminated" — a
    /// brand-new run must not race the reaper (Design Notes §9).
    async fn should_clean(
        &self,
        ns: &k8s_openapi::api::core::v1::Namespace,
        name: &str,
    ) -> Result<bool, anyhow::Error> {
        let expired = ClusterClient::run_deadline(ns).is_some_and(|deadline| deadline < Local::now());
        if expired {
            return Ok(true);
        }

        let pods = self.cluster.list_pods(name).await?;
        Ok(ClusterClient::main_container_terminated(&pods))
    }

    /// Tear down one namespace (§4.8 step 3): publish, delete PVCs (waiting
    /// and releasing their PVs), delete service accounts, delete the
    /// namespace, then explicitly delete the output PV (SPEC_FULL.md §B /
    /// REDESIGN FLAG 4 — avoid accumulating `Released` PVs).
    async fn reap(&self, namespace: &str) -> Result<(), anyhow::Error> {
        let run_id = namespace
            .strip_prefix("secd-")
            .ok_or_else(|| anyhow::anyhow!("namespace {namespace} missing secd- prefix"))?;

        // a. Publish before any teardown, so output files are still on the
        // host NFS when `publish` reads them.
        let repo_path = Path::new(&self.config.repo_root).join(run_id);
        if repo_path.exists() {
            if let Err(e) = self.repo.publish(&repo_path, run_id).await {
                tracing::warn!(%run_id, error = %e, "reaper: repo publish failed");
            }
        }

        // b. Delete every PVC, wait for it to disappear, then release any
        // PV that ended up `Released`.
        let pvcs = self.cluster.list_pvcs(namespace).await?;
        for pvc in pvcs {
            let Some(pvc_name) = pvc.metadata.name.clone() else { continue };
            let volume_name = pvc.spec.as_ref().and_then(|s| s.volume_name.clone());

            self.cluster.delete_pvc(namespace, &pvc_name).await?;
            let gone = self
                .cluster
                .wait_pvc_gone(
                    namespace,
                    &pvc_name,
                    self.config.pvc_delete_wait_secs,
                    self.config.pvc_delete_poll_secs,
                )
                .await?;
            if !gone {
                tracing::warn!(%run_id, pvc = %pvc_name, "PVC did not disappear within the wait window");
            }

            if let Some(volume_name) = volume_name {
                self.cluster.release_pv_if_released(&volume_name).await?;
            }
        }

        // c. Delete every non-default service account.
        self.cluster.delete_non_default_service_accounts(namespace).await?;

        // d. Delete the namespace, cascading any remaining per-run objects.
        self.cluster.delete_namespace(namespace).await?;

        // Explicit output PV deletion: cascade deletion does not reach
        // cluster-scoped objects, and an orphaned output PV has no reuse
        // value (unlike the shared dataset PV).
        let output_pv_name = format!("secd-pv-{run_id}-output");
        self.cluster.delete_pv(&output_pv_name).await?;

        Ok(())
    }
}
