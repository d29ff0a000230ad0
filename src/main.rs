//! Composition root (spec.md §2, §4's "Composition root" row): wire every
//! collaborator, start the HTTP ingress and the reaper concurrently, and
//! stop them cleanly on shutdown signal.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use secd::cluster::ClusterClient;
use secd::config::Config;
use secd::identity::KeycloakClient;
use secd::image::OciImageBuilder;
use secd::ingress;
use secd::reaper::Reaper;
use secd::repo::GitlabRepoClient;
use secd::run::orchestrator::Collaborators;
use secd::secrets_broker::VaultClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("SECD_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let config = Arc::new(Config::load());

    let repo = Arc::new(GitlabRepoClient::new(
        config.gitlab_base_url.clone(),
        config.gitlab_api_token.clone(),
        config.gitlab_clone_user.clone(),
        config.gitlab_clone_password.clone(),
    ));

    let identity = Arc::new(
        KeycloakClient::bootstrap(
            config.keycloak_base_url.clone(),
            config.keycloak_realm.clone(),
            config.keycloak_client_id.clone(),
            &config.keycloak_admin_user,
            &config.keycloak_admin_password,
            config.gitlab_base_url.clone(),
            config.gitlab_api_token.clone(),
        )
        .await?,
    );

    let image = Arc::new(OciImageBuilder::new(
        config.registry_url.clone(),
        config.registry_project.clone(),
        config.registry_user.clone(),
        config.registry_password.clone(),
        config.registry_ca_cert.clone(),
    ));

    let secrets_broker = Arc::new(VaultClient::new(
        config.vault_base_url.clone(),
        config.vault_token.clone(),
    ));

    let kube_client = kube::Client::try_default().await?;
    let cluster = Arc::new(ClusterClient::new(kube_client));

    let collaborators = Arc::new(Collaborators {
        config: config.clone(),
        repo: repo.clone(),
        identity,
        image,
        secrets_broker,
        cluster: cluster.clone(),
    });

    // The reaper runs as its own long-lived task, independent of the
    // ingress pool (§5).
    let reaper = Reaper::new(config.clone(), repo, cluster);
    let (reaper_shutdown_tx, reaper_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let reaper_handle = tokio::spawn(async move {
        reaper
            .run(async {
                let _ = reaper_shutdown_rx.await;
            })
            .await;
    });

    let app = ingress::router(collaborators);

    let addr: SocketAddr = config.listen.parse()?;
    tracing::info!(%addr, "starting secd");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = reaper_shutdown_tx.send(());
    let _ = reaper_handle.await;

    tracing::info!("secd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
