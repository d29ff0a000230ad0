//! OCI image builder (spec.md §4.4). Shells out to the registry CLI glue,
//! matching this codebase's preference for driving real binaries over
//! reimplementing their protocols (the same idiom as [`crate::repo`]'s git
//! plumbing).

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image build failed: {0}")]
    BuildFailed(String),

    #[error("registry login failed: {0}")]
    LoginFailed(String),

    #[error("image push failed: {0}")]
    PushFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build an OCI image from `repo_path`, tag it `<registry>/<project>/<run_id>`,
    /// authenticate, and push. Returns the full image name. Build/push
    /// failures are fatal to the run (§4.4); best-effort local cleanup
    /// failures are logged only.
    async fn build_and_push(&self, repo_path: &Path, run_id: &str) -> Result<String, ImageError>;
}

pub struct OciImageBuilder {
    registry_url: String,
    project: String,
    user: String,
    password: String,
    ca_cert: Option<String>,
}

impl OciImageBuilder {
    pub fn new(
        registry_url: String,
        project: String,
        user: String,
        password: String,
        ca_cert: Option<String>,
    ) -> Self {
        Self {
            registry_url,
            project,
            user,
            password,
            ca_cert,
        }
    }

    fn image_name(&self, run_id: &str) -> String {
        format!("{}/{}/{run_id}", self.registry_url, self.project)
    }
}

#[async_trait::async_trait]
impl ImageBuilder for OciImageBuilder {
    async fn build_and_push(&self, repo_path: &Path, run_id: &str) -> Result<String, ImageError> {
        let tag = self.image_name(run_id);

        let build = run("docker", &["build", "-t", &tag, "."], Some(repo_path)).await?;
        if !build.status.success() {
            return Err(ImageError::BuildFailed(stderr(&build)));
        }

        let mut login_args = vec![
            "login".to_owned(),
            self.registry_url.clone(),
            "-u".to_owned(),
            self.user.clone(),
            "--password-stdin".to_owned(),
        ];
        if let Some(ca) = &self.ca_cert {
            login_args.push("--tlscacert".to_owned());
            login_args.push(ca.clone());
        }
        let login_args_ref: Vec<&str> = login_args.iter().map(String::as_str).collect();
        let login = run_with_stdin("docker", &login_args_ref, &self.password).await?;
        if !login.status.success() {
            return Err(ImageError::LoginFailed(stderr(&login)));
        }

        let push = run("docker", &["push", &tag], None).await?;
        if !push.status.success() {
            return Err(ImageError::PushFailed(stderr(&push)));
        }

        // Best-effort cleanup; failures here never fail the run (§4.4 step 4).
        if let Ok(rmi) = run("docker", &["rmi", &tag], None).await
            && !rmi.status.success()
        {
            tracing::warn!(image = %tag, stderr = %stderr(&rmi), "failed to remove local image");
        }
        if let Ok(prune) = run("docker", &["image", "prune", "-f"], None).await
            && !prune.status.success()
        {
            tracing::warn!(stderr = %stderr(&prune), "failed to prune dangling images");
        }

        Ok(tag)
    }
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

async fn run(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
) -> Result<std::process::Output, std::io::Error> {
    let mut command = tokio::process::Command::new(cmd);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command.output().await
}

async fn run_with_stdin(
    cmd: &str,
    args: &[&str],
    stdin_data: &str,
) -> Result<std::process::Output, std::io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut child = tokio::process::Command::new(cmd)
        .args(args)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(stdin_data.as_bytes()).await?;
    }

    child.wait_with_output().await
}
