//! Pushes the host controller to the desktop host and readies it to run.

use crate::error::DeskError;
use crate::exec::{ProcessRunner, RemoteExecutor, ShellCommand};
use serde::Serialize;
use std::path::Path;

const DOCKER_INSTALL: &str = "sudo apt-get update && sudo apt-get install -y docker.io";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub remote_path: String,
    pub docker_version: String,
    pub docker_installed: bool,
}

fn docker_version() -> ShellCommand {
    ShellCommand::new("docker").arg("--version")
}

/// Returns the docker version string and whether it had to be installed.
pub fn ensure_container_runtime<R: ProcessRunner>(
    exec: &RemoteExecutor<'_, R>,
) -> Result<(String, bool), DeskError> {
    let check = exec.execute(&docker_version())?;
    if check.succeeded {
        return Ok((check.trimmed().to_string(), false));
    }
    tracing::info!("docker not found on the host, installing");
    exec.execute_checked(&ShellCommand::script(DOCKER_INSTALL))?;
    let installed = exec.execute_checked(&docker_version())?;
    Ok((installed.trimmed().to_string(), true))
}

/// Upload, then make sure docker exists, then mark the upload executable.
pub fn deploy_controller<R: ProcessRunner>(
    exec: &RemoteExecutor<'_, R>,
    local_path: &Path,
    remote_path: &str,
) -> Result<DeployOutcome, DeskError> {
    exec.upload_file(local_path, remote_path)?;
    let (docker_version, docker_installed) = ensure_container_runtime(exec)?;
    exec.execute_checked(&ShellCommand::new("chmod").arg("+x").arg(remote_path))?;
    Ok(DeployOutcome {
        remote_path: remote_path.to_string(),
        docker_version,
        docker_installed,
    })
}
