//! Top-level `Create(body)` operation (spec.md §4.7): the eight-step
//! pipeline from an accepted webhook payload to a running pod. Every
//! collaborator is reached through its capability trait (Design Notes §9)
//! so this module never depends on a concrete `GitlabRepoClient` or
//! `VaultClient`.

use std::path::Path;
use std::sync::Arc;

use crate::cluster::pod::{build_file_db_pod, build_mysql_pod, PodParams};
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::error::OrchestratorError;
use crate::identity::IdentityProvider;
use crate::image::ImageBuilder;
use crate::repo::payload::PushPayload;
use crate::repo::{RepoProvider, ValidationOutcome};
use crate::run::{DatabaseType, Run};
use crate::secrets_broker::SecretsBroker;

const OUTPUT_PV_CAPACITY: &str = "50Gi";
const DATASET_PVC_CAPACITY: &str = "100Gi";

/// Every collaborator the orchestrator needs, wired at the composition root.
pub struct Collaborators {
    pub config: Arc<Config>,
    pub repo: Arc<dyn RepoProvider>,
    pub identity: Arc<dyn IdentityProvider>,
    pub image: Arc<dyn ImageBuilder>,
    pub secrets_broker: Arc<dyn SecretsBroker>,
    pub cluster: Arc<ClusterClient>,
}

/// Drive one push through all eight steps. `Ok(None)` means the push was
/// accepted but intentionally produced no run (bot branch); `Ok(Some(run))`
/// means a run launched. Every other outcome is an error the caller logs
/// and otherwise discards (§7 propagation rule).
#[tracing::instrument(skip_all, fields(project_id = body.project_id, user_id = body.user_id))]
pub async fn create(
    collaborators: &Collaborators,
    body: PushPayload,
) -> Result<Option<Run>, OrchestratorError> {
    // Step 1: repo-validate. Bot branches short-circuit with no effect.
    match collaborators.repo.validate(&body).await? {
        ValidationOutcome::SkipBotBranch => {
            return Err(OrchestratorError::Skipped(format!(
                "bot-originated ref {}",
                body.git_ref
            )));
        }
        ValidationOutcome::Accept => {}
    }

    // Step 2: construct Run.
    let repo_root = Path::new(&collaborators.config.repo_root);
    let mut run = Run::new(repo_root);

    // Step 3: resolve the pushing user's GitLab id to their identity
    // provider user id, then reject if that user isn't in the gate group.
    let external_user_id = collaborators.identity.resolve_user_id(body.user_id).await?;
    if !collaborators
        .identity
        .in_group(&external_user_id, &collaborators.config.gate_group)
        .await?
    {
        return Err(OrchestratorError::Skipped(format!(
            "user {external_user_id} is not in gate group {}",
            collaborators.config.gate_group
        )));
    }
    run.keycloak_user_id = Some(external_user_id.clone());

    // Step 4: clone to repo_path; create output_path.
    let cloned_path = collaborators
        .repo
        .clone(&body.project.http_url, &run.run_id, repo_root)
        .await?;
    run.repo_path = cloned_path;
    tokio::fs::create_dir_all(&run.output_path).await.map_err(anyhow::Error::from)?;

    // Step 5: read metadata; reject if the user lacks the per-database role.
    let metadata_yaml = collaborators.repo.read_metadata_file(&run.repo_path).await;
    let metadata = crate::repo::metadata::parse(metadata_yaml.as_deref())
        .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;

    if let Some(database_name) = &metadata.database_name
        && !collaborators
            .identity
            .has_role(
                &external_user_id,
                &collaborators.config.database_service_client,
                database_name,
            )
            .await?
    {
        return Err(OrchestratorError::Skipped(format!(
            "user {external_user_id} lacks role {database_name} on {}",
            collaborators.config.database_service_client
        )));
    }

    run.run_for_hours = Some(metadata.runfor);
    run.database_name = metadata.database_name.clone();
    run.database_type = metadata.database_type;
    run.metadata = Some(metadata.clone());

    // Step 6: build and push the image.
    let image_name = collaborators
        .image
        .build_and_push(&run.repo_path, &run.run_id)
        .await?;
    run.image_name = Some(image_name.clone());

    let rununtil = run
        .rununtil()
        .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("runfor_hours not set")))?;

    // Step 7: per-database-type path.
    collaborators
        .cluster
        .create_run_namespace(&run.namespace, &external_user_id, rununtil)
        .await?;

    let nfs_output_path = format!(
        "{}/repos/{}/outputs/{}-{}",
        collaborators.config.pvc_root, run.run_id, run.date, run.run_id
    );
    collaborators
        .cluster
        .create_nfs_pv(
            &run.pv_name_output,
            &collaborators.config.nfs_server,
            &nfs_output_path,
            OUTPUT_PV_CAPACITY,
        )
        .await?;
    collaborators
        .cluster
        .create_pvc(
            &run.namespace,
            &run.pvc_name_output,
            &run.pv_name_output,
            OUTPUT_PV_CAPACITY,
        )
        .await?;

    let cache = build_cache_volume(collaborators, &run, &metadata, &external_user_id).await?;

    match run.database_type {
        Some(DatabaseType::File) => {
            let database_name = run
                .database_name
                .as_deref()
                .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("database_name required for file type")))?;
            let dataset_pvc = collaborators.cluster.discover_dataset_pvc(database_name).await?;
            run.pvc_name = Some(dataset_pvc.clone());
            run.env_vars = crate::cluster::pod::base_env_pairs(&run, database_name);

            let params = PodParams {
                run: &run,
                database_name,
                image: &image_name,
                gpu: metadata.gpu,
                cache_pvc_name: cache.as_ref().map(|c| c.pvc_name.as_str()),
                cache_mount_path: cache.as_ref().map(|c| c.mount_path.as_str()),
            };
            let pod = build_file_db_pod(&params, &dataset_pvc);
            collaborators.cluster.create_pod(&run.namespace, pod).await?;
        }
        Some(DatabaseType::Mysql) => {
            let database_name = run
                .database_name
                .as_deref()
                .ok_or_else(|| OrchestratorError::Other(anyhow::anyhow!("database_name required for mysql type")))?;
            // Dataset pod discovery runs the same way, but its PVC is never
            // mounted into the analyst pod for this variant (§4.7 step 7).
            if let Err(e) = collaborators.cluster.discover_dataset_pvc(database_name).await {
                tracing::warn!(%database_name, error = %e, "dataset pod discovery failed for mysql run");
            }

            let url_template = format!(
                "{{{{username}}}}:{{{{password}}}}@tcp(service-{database_name}.storage.svc.cluster.local:3306)/"
            );
            collaborators
                .secrets_broker
                .configure_connection(&crate::secrets_broker::DatabaseConnection {
                    database_name,
                    url_template: &url_template,
                    admin_username: &collaborators.config.database_admin_user,
                    admin_password: &collaborators.config.database_admin_password,
                })
                .await?;
            collaborators
                .secrets_broker
                .create_role(database_name)
                .await?;
            let vault_role_name = crate::run::Run::vault_role_name_for(database_name);
            run.vault_role_name = Some(vault_role_name);
            collaborators
                .secrets_broker
                .create_policy(database_name)
                .await?;

            let service_account = Run::service_account_name(database_name);
            collaborators
                .cluster
                .create_service_account(&run.namespace, &service_account)
                .await?;
            collaborators
                .secrets_broker
                .create_cluster_auth_role(database_name, &run.namespace, &service_account)
                .await?;

            run.env_vars = crate::cluster::pod::base_env_pairs(&run, database_name);

            let params = PodParams {
                run: &run,
                database_name,
                image: &image_name,
                gpu: metadata.gpu,
                cache_pvc_name: cache.as_ref().map(|c| c.pvc_name.as_str()),
                cache_mount_path: cache.as_ref().map(|c| c.mount_path.as_str()),
            };
            let pod = build_mysql_pod(&params, &service_account);
            collaborators.cluster.create_pod(&run.namespace, pod).await?;
        }
        None => {
            return Err(OrchestratorError::Other(anyhow::anyhow!(
                "database_type not set in secd.yml"
            )));
        }
    }

    Ok(Some(run))
}

struct CacheVolume {
    pvc_name: String,
    mount_path: String,
}

/// Step 8: optional cache volume, keyed by `<cachePath>/<external_user_id>/<cache_dir>`
/// (§4.7 step 8, §5 "concurrent mkdir tolerant of already-exists").
async fn build_cache_volume(
    collaborators: &Collaborators,
    run: &Run,
    metadata: &crate::repo::metadata::SecdMetadata,
    external_user_id: &str,
) -> Result<Option<CacheVolume>, OrchestratorError> {
    let Some(cache_dir) = &metadata.cache_dir else {
        return Ok(None);
    };

    let host_path = Path::new(&collaborators.config.cache_root)
        .join(external_user_id)
        .join(cache_dir);
    tokio::fs::create_dir_all(&host_path)
        .await
        .map_err(anyhow::Error::from)?;

    let pv_name = format!("secd-pv-{}-cache", run.run_id);
    let pvc_name = format!("secd-pvc-{}-cache", run.run_id);
    let nfs_cache_path = format!(
        "{}/cache/{external_user_id}/{cache_dir}",
        collaborators.config.pvc_root
    );

    collaborators
        .cluster
        .create_nfs_pv(
            &pv_name,
            &collaborators.config.nfs_server,
            &nfs_cache_path,
            DATASET_PVC_CAPACITY,
        )
        .await?;
    collaborators
        .cluster
        .create_pvc(&run.namespace, &pvc_name, &pv_name, DATASET_PVC_CAPACITY)
        .await?;

    Ok(Some(CacheVolume {
        pvc_name,
        mount_path: metadata.mount_path.clone(),
    }))
}
