//! Docker task backend
//!
//! Runs ephemeral runner containers through the Docker CLI:
//! - `docker run -d` launches a runner container and returns its id
//! - `docker inspect` reports container state for reconciliation passes
//! - `docker rm -f` stops and reaps a container
//!
//! The runner image is expected to register itself with GitHub using the
//! injected registration token, execute one job, deregister, and exit.
//! All CLI invocations run on the blocking pool so a slow Docker daemon
//! never stalls the async workers.

use async_trait::async_trait;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

use blazeci_github::{AppAuth, GitHubClient};

use crate::fleet::backend::{BackendError, LaunchSpec, TaskBackend, TaskStatus};

/// Checks that the docker CLI is present and the daemon answers
pub fn check_docker_available() -> anyhow::Result<()> {
    let output = Command::new("docker")
        .arg("version")
        .arg("--format")
        .arg("{{.Server.Version}}")
        .output()
        .map_err(|e| anyhow::anyhow!("Failed to execute 'docker version': {e}"))?;

    if !output.status.success() {
        anyhow::bail!(
            "Docker daemon is not reachable: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Docker is available: server {}", version.trim());

    Ok(())
}

/// Task backend launching runner containers via the Docker CLI
pub struct DockerBackend {
    /// Runner container image
    image: String,
    github: Arc<GitHubClient>,
    auth: Arc<AppAuth>,
}

impl DockerBackend {
    pub fn new(image: impl Into<String>, github: Arc<GitHubClient>, auth: Arc<AppAuth>) -> Self {
        Self {
            image: image.into(),
            github,
            auth,
        }
    }

    /// Fetches a runner registration token for the launch
    async fn registration_token(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        let Some(installation_id) = spec.installation_id else {
            return Err(BackendError::Permanent(format!(
                "{}/{} has no App installation to authenticate with",
                spec.owner, spec.repo
            )));
        };

        let token = self
            .auth
            .installation_token(&self.github, installation_id)
            .await
            .map_err(classify_client_error)?;

        self.github
            .registration_token(&token, &spec.owner, &spec.repo)
            .await
            .map_err(classify_client_error)
    }

    async fn run_docker(args: Vec<String>) -> Result<std::process::Output, BackendError> {
        tokio::task::spawn_blocking(move || Command::new("docker").args(&args).output())
            .await
            .map_err(|e| BackendError::Transient(format!("docker task panicked: {e}")))?
            .map_err(|e| BackendError::Transient(format!("failed to execute docker: {e}")))
    }
}

fn classify_client_error(e: blazeci_github::ClientError) -> BackendError {
    if e.is_transient() {
        BackendError::Transient(e.to_string())
    } else {
        BackendError::Permanent(e.to_string())
    }
}

fn classify_cli_failure(stderr: &str) -> BackendError {
    // Daemon outages come back as connection errors; anything else is a
    // rejection of the request itself.
    if stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("connection refused")
    {
        BackendError::Transient(stderr.trim().to_string())
    } else {
        BackendError::Permanent(stderr.trim().to_string())
    }
}

#[async_trait]
impl TaskBackend for DockerBackend {
    async fn launch(&self, spec: &LaunchSpec) -> Result<String, BackendError> {
        let registration_token = self.registration_token(spec).await?;

        let args: Vec<String> = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            spec.runner_name.clone(),
            "--label".to_string(),
            format!("blazeci.repo_id={}", spec.repo_id),
            "-e".to_string(),
            format!("REPO_URL=https://github.com/{}/{}", spec.owner, spec.repo),
            "-e".to_string(),
            format!("RUNNER_TOKEN={registration_token}"),
            "-e".to_string(),
            format!("RUNNER_NAME={}", spec.runner_name),
            "-e".to_string(),
            format!("RUNNER_LABELS={}", spec.labels.join(",")),
            "-e".to_string(),
            "RUNNER_EPHEMERAL=1".to_string(),
            "-e".to_string(),
            format!("RUNNER_TRIGGER={}", spec.trigger),
            self.image.clone(),
        ];

        let output = Self::run_docker(args).await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("docker run stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            return Err(classify_cli_failure(&stderr));
        }

        let container_id = stdout.trim().to_string();
        if container_id.is_empty() {
            return Err(BackendError::Transient(
                "docker run produced no container id".to_string(),
            ));
        }

        info!(
            "Started runner container {} for {}/{}",
            &container_id[..container_id.len().min(12)],
            spec.owner,
            spec.repo
        );

        Ok(container_id)
    }

    async fn status(&self, handle: &str) -> Result<TaskStatus, BackendError> {
        let args = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Status}}".to_string(),
            handle.to_string(),
        ];

        let output = Self::run_docker(args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            if stderr.contains("No such object") || stderr.contains("No such container") {
                return Ok(TaskStatus::NotFound);
            }
            return Err(classify_cli_failure(&stderr));
        }

        Ok(match stdout.trim() {
            "created" | "restarting" => TaskStatus::Starting,
            "running" | "paused" => TaskStatus::Running,
            "exited" | "dead" | "removing" => TaskStatus::Exited,
            other => {
                debug!("Unknown container state '{}' for {}", other, handle);
                TaskStatus::Exited
            }
        })
    }

    async fn terminate(&self, handle: &str) -> Result<(), BackendError> {
        let args = vec!["rm".to_string(), "-f".to_string(), handle.to_string()];

        let output = Self::run_docker(args).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            // Terminating a container that is already gone is success
            if stderr.contains("No such object") || stderr.contains("No such container") {
                return Ok(());
            }
            return Err(classify_cli_failure(&stderr));
        }

        debug!("Removed runner container {}", handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_outage_is_transient() {
        let err = classify_cli_failure(
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock",
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_bad_request_is_permanent() {
        let err = classify_cli_failure("invalid reference format");
        assert!(!err.is_transient());
    }
}
