use std::process::Stdio;

use crate::{command::CommandSpec, error::LaunchError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub raw: String,
    pub major: Option<u32>,
}

/// Runs the version probe once. A missing runtime is not transient, so there
/// is no retry.
pub async fn probe_runtime(probe: &CommandSpec) -> Result<RuntimeVersion, LaunchError> {
    let out = probe
        .tokio_command(None)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| LaunchError::PrerequisiteMissing {
            program: probe.program.clone(),
            source: Some(e),
            detail: None,
        })?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        return Err(LaunchError::PrerequisiteMissing {
            program: probe.program.clone(),
            source: None,
            detail: Some(format!(
                "`{}` exited with {:?}: {}",
                probe.display(),
                out.status.code(),
                stderr
            )),
        });
    }

    let raw = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let major = parse_major_version(&raw);
    tracing::info!(program = %probe.program, version = %raw, "runtime found");
    Ok(RuntimeVersion { raw, major })
}

/// Accepts `v20.11.1`, `20.11.1` and `20`.
pub fn parse_major_version(raw: &str) -> Option<u32> {
    let first = raw.lines().next()?.trim();
    let ver = first.strip_prefix('v').unwrap_or(first);
    let end = ver.find(|c: char| !c.is_ascii_digit()).unwrap_or(ver.len());
    if end == 0 {
        return None;
    }
    ver[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_style_version() {
        assert_eq!(parse_major_version("v20.11.1\n"), Some(20));
        assert_eq!(parse_major_version("18.0.0"), Some(18));
        assert_eq!(parse_major_version("22"), Some(22));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_major_version(""), None);
        assert_eq!(parse_major_version("node: command not found"), None);
        assert_eq!(parse_major_version("vX.1"), None);
    }

    #[tokio::test]
    async fn missing_program_is_prerequisite_error() {
        let probe = CommandSpec::new("cyan-definitely-not-a-runtime-7f3a", ["--version"]);
        let err = probe_runtime(&probe).await.unwrap_err();
        assert!(matches!(
            err,
            LaunchError::PrerequisiteMissing { source: Some(_), .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_prerequisite_error() {
        let probe = CommandSpec::new("sh", ["-c", "echo broken >&2; exit 3"]);
        let err = probe_runtime(&probe).await.unwrap_err();
        match err {
            LaunchError::PrerequisiteMissing { detail, source, .. } => {
                assert!(source.is_none());
                assert!(detail.unwrap().contains("broken"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn success_reports_trimmed_version() {
        let probe = CommandSpec::new("sh", ["-c", "echo v21.6.0"]);
        let v = probe_runtime(&probe).await.unwrap();
        assert_eq!(v.raw, "v21.6.0");
        assert_eq!(v.major, Some(21));
    }
}
