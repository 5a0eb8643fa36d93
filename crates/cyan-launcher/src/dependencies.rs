use std::{path::Path, process::Stdio};

use crate::{
    command::{CommandSpec, DependencyLayout},
    error::LaunchError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    AlreadyPresent,
    Installed,
}

/// Checks the manifest, then the marker directory, and runs the installer only
/// when the marker is missing. Completes before anything else is spawned.
pub async fn ensure_dependencies(
    project_root: &Path,
    layout: &DependencyLayout,
    install: &CommandSpec,
) -> Result<DependencyStatus, LaunchError> {
    let manifest = project_root.join(&layout.manifest);
    if !manifest.is_file() {
        return Err(LaunchError::ProjectLayout { manifest });
    }

    if project_root.join(&layout.marker_dir).is_dir() {
        tracing::info!(marker = %layout.marker_dir, "dependencies found");
        return Ok(DependencyStatus::AlreadyPresent);
    }

    tracing::warn!(
        marker = %layout.marker_dir,
        command = %install.display(),
        "installing dependencies"
    );
    run_install(project_root, install).await?;
    tracing::info!("dependencies installed successfully");
    Ok(DependencyStatus::Installed)
}

async fn run_install(project_root: &Path, install: &CommandSpec) -> Result<(), LaunchError> {
    // Inherited stdio so installer output shows up live.
    let status = install
        .tokio_command(Some(project_root))
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        // A shutdown during install drops this future; take the installer down with it.
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|source| LaunchError::Spawn {
            program: install.program.clone(),
            cwd: project_root.to_path_buf(),
            source,
        })?;

    if !status.success() {
        return Err(LaunchError::InstallFailed {
            command: install.display(),
            code: status.code(),
        });
    }
    Ok(())
}
