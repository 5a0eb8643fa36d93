use std::{ffi::OsString, path::Path};

/// A program and its arguments. Never run through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    pub(crate) fn tokio_command(&self, cwd: Option<&Path>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(self.args.iter().map(OsString::from));
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Files whose presence decides whether dependencies must be installed.
#[derive(Debug, Clone)]
pub struct DependencyLayout {
    pub manifest: String,
    pub marker_dir: String,
}

impl Default for DependencyLayout {
    fn default() -> Self {
        Self {
            manifest: "package.json".to_string(),
            marker_dir: "node_modules".to_string(),
        }
    }
}

/// The external commands a run drives, plus what the server prints when ready.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub runtime_probe: CommandSpec,
    pub layout: DependencyLayout,
    pub install: CommandSpec,
    pub server: CommandSpec,
    pub ready_markers: Vec<String>,
    pub error_marker: String,
}

impl LaunchPlan {
    /// Node + npm dev server, the only plan the launcher ships with.
    pub fn npm() -> Self {
        Self {
            runtime_probe: CommandSpec::new("node", ["--version"]),
            layout: DependencyLayout::default(),
            install: CommandSpec::new(npm_bin(), ["install"]),
            server: CommandSpec::new(npm_bin(), ["run", "dev"]),
            ready_markers: vec!["Ready in".to_string(), "Local:".to_string()],
            error_marker: "Error:".to_string(),
        }
    }
}

impl Default for LaunchPlan {
    fn default() -> Self {
        Self::npm()
    }
}

fn npm_bin() -> &'static str {
    if cfg!(target_os = "windows") {
        "npm.cmd"
    } else {
        "npm"
    }
}
