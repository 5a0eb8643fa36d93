use std::path::PathBuf;

/// Fatal launcher failures. Every variant aborts the run with exit code 1.
///
/// Observed child failures and browser-open problems are not errors: they are
/// logged where they happen and the launcher keeps running.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{program} is not installed or not in PATH{}", detail_suffix(.detail))]
    PrerequisiteMissing {
        program: String,
        #[source]
        source: Option<std::io::Error>,
        detail: Option<String>,
    },

    #[error("{} not found; run this from the project directory", .manifest.display())]
    ProjectLayout { manifest: PathBuf },

    #[error("dependency install failed ({command}, exit code {code:?})")]
    InstallFailed { command: String, code: Option<i32> },

    #[error("spawn {program} (cwd {})", .cwd.display())]
    Spawn {
        program: String,
        cwd: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Short hint printed under the diagnostic line.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            LaunchError::PrerequisiteMissing { .. } => {
                Some("Please install Node.js from https://nodejs.org/")
            }
            LaunchError::ProjectLayout { .. } => {
                Some("Please run this from the Cyan orchestrator directory")
            }
            LaunchError::Spawn { .. } => Some("Ensure the command exists and is executable."),
            _ => None,
        }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(" ({d})"),
        _ => String::new(),
    }
}

pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}
