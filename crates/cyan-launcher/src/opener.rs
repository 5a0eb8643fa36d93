use std::{
    env,
    path::{Path, PathBuf},
    process::Stdio,
};

use crate::command::CommandSpec;

/// Platform mechanism used when no preferred browser is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultOpener {
    Windows,
    MacOs,
    Unix,
}

impl DefaultOpener {
    pub fn detect() -> Self {
        if cfg!(target_os = "windows") {
            DefaultOpener::Windows
        } else if cfg!(target_os = "macos") {
            DefaultOpener::MacOs
        } else {
            DefaultOpener::Unix
        }
    }

    pub fn command(self, url: &str) -> CommandSpec {
        match self {
            DefaultOpener::Windows => CommandSpec::new("cmd", ["/C", "start", url]),
            DefaultOpener::MacOs => CommandSpec::new("open", [url]),
            DefaultOpener::Unix => CommandSpec::new("xdg-open", [url]),
        }
    }
}

/// Ordered install locations of the preferred browser. First existing path wins.
#[derive(Debug, Clone, Default)]
pub struct BrowserLocator {
    candidates: Vec<PathBuf>,
}

impl BrowserLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Avast Secure Browser: system-wide, 32-bit, then per-user install.
    pub fn avast(home: Option<&Path>) -> Self {
        let mut candidates = vec![
            PathBuf::from(r"C:\Program Files\AVAST Software\Browser\Application\AvastBrowser.exe"),
            PathBuf::from(
                r"C:\Program Files (x86)\AVAST Software\Browser\Application\AvastBrowser.exe",
            ),
        ];
        if let Some(home) = home {
            candidates.push(
                home.join("AppData")
                    .join("Local")
                    .join("AVAST Software")
                    .join("Browser")
                    .join("Application")
                    .join("AvastBrowser.exe"),
            );
        }
        Self { candidates }
    }

    pub fn with_preferred(mut self, path: PathBuf) -> Self {
        self.candidates.insert(0, path);
        self
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    pub fn find(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .find(|p| p.is_file())
            .map(PathBuf::as_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenPlan {
    Browser { path: PathBuf, command: CommandSpec },
    Default { opener: DefaultOpener, command: CommandSpec },
}

impl OpenPlan {
    pub fn command(&self) -> &CommandSpec {
        match self {
            OpenPlan::Browser { command, .. } | OpenPlan::Default { command, .. } => command,
        }
    }
}

#[derive(Debug)]
pub enum OpenOutcome {
    Launched(OpenPlan),
    Failed { plan: OpenPlan, error: String },
}

#[derive(Debug, Clone)]
pub struct EndpointOpener {
    locator: BrowserLocator,
    fallback: DefaultOpener,
}

impl EndpointOpener {
    pub fn new(locator: BrowserLocator, fallback: DefaultOpener) -> Self {
        Self { locator, fallback }
    }

    pub fn detect(preferred: Option<PathBuf>) -> Self {
        let mut locator = BrowserLocator::avast(user_home_dir().as_deref());
        if let Some(p) = preferred {
            locator = locator.with_preferred(p);
        }
        Self::new(locator, DefaultOpener::detect())
    }

    pub fn plan(&self, url: &str) -> OpenPlan {
        match self.locator.find() {
            Some(path) => OpenPlan::Browser {
                path: path.to_path_buf(),
                command: CommandSpec::new(path.to_string_lossy(), [url]),
            },
            None => OpenPlan::Default {
                opener: self.fallback,
                command: self.fallback.command(url),
            },
        }
    }

    /// Launches the browser detached from the launcher. Never fails the run.
    pub fn open(&self, url: &str) -> OpenOutcome {
        let plan = self.plan(url);
        match &plan {
            OpenPlan::Browser { path, .. } => {
                tracing::info!(browser = %path.display(), %url, "opening in Avast Secure Browser");
            }
            OpenPlan::Default { opener, .. } => {
                tracing::warn!(
                    ?opener,
                    %url,
                    "Avast Secure Browser not found, opening in default browser"
                );
            }
        }

        match spawn_detached(plan.command()) {
            Ok(mut child) => {
                if matches!(plan, OpenPlan::Default { .. }) {
                    let shown = plan.command().display();
                    tokio::spawn(async move {
                        match child.wait().await {
                            Ok(status) if !status.success() => {
                                tracing::warn!(command = %shown, code = ?status.code(), "browser opener failed");
                            }
                            Err(e) => {
                                tracing::warn!(command = %shown, error = %e, "browser opener failed");
                            }
                            Ok(_) => {}
                        }
                    });
                }
                OpenOutcome::Launched(plan)
            }
            Err(e) => {
                tracing::warn!(command = %plan.command().display(), error = %e, "could not open browser");
                OpenOutcome::Failed {
                    error: e.to_string(),
                    plan,
                }
            }
        }
    }
}

fn spawn_detached(spec: &CommandSpec) -> std::io::Result<tokio::process::Child> {
    let mut cmd = spec.tokio_command(None);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(false);

    // Own process group so the browser outlives the launcher and its signals.
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(windows)]
    {
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        cmd.creation_flags(DETACHED_PROCESS);
    }

    cmd.spawn()
}

fn user_home_dir() -> Option<PathBuf> {
    for key in ["HOME", "USERPROFILE"] {
        if let Ok(raw) = env::var(key) {
            let clean = raw.trim();
            if !clean.is_empty() {
                return Some(PathBuf::from(clean));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicU64, Ordering},
        time::{SystemTime, UNIX_EPOCH},
    };

    fn temp_dir_for(test_name: &str) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "cyan-launcher-opener-{test_name}-{}-{n}-{ts}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    const URL: &str = "http://localhost:8000";

    #[test]
    fn default_opener_per_platform() {
        assert_eq!(
            DefaultOpener::Windows.command(URL),
            CommandSpec::new("cmd", ["/C", "start", URL])
        );
        assert_eq!(DefaultOpener::MacOs.command(URL), CommandSpec::new("open", [URL]));
        assert_eq!(
            DefaultOpener::Unix.command(URL),
            CommandSpec::new("xdg-open", [URL])
        );
    }

    #[test]
    fn detect_matches_compile_target() {
        let expected = if cfg!(target_os = "windows") {
            DefaultOpener::Windows
        } else if cfg!(target_os = "macos") {
            DefaultOpener::MacOs
        } else {
            DefaultOpener::Unix
        };
        assert_eq!(DefaultOpener::detect(), expected);
    }

    #[test]
    fn avast_candidates_in_order() {
        let home = PathBuf::from("/home/ana");
        let loc = BrowserLocator::avast(Some(&home));
        let c = loc.candidates();
        assert_eq!(c.len(), 3);
        assert!(c[0].to_string_lossy().starts_with(r"C:\Program Files\"));
        assert!(c[1].to_string_lossy().starts_with(r"C:\Program Files (x86)\"));
        assert!(c[2].starts_with(&home));
        assert!(c[2].ends_with("AvastBrowser.exe"));
    }

    #[test]
    fn missing_browser_falls_back_to_platform_opener() {
        let root = temp_dir_for("fallback");
        let loc = BrowserLocator::new(vec![root.join("nope.exe"), root.join("also-nope.exe")]);
        for opener in [DefaultOpener::Windows, DefaultOpener::MacOs, DefaultOpener::Unix] {
            let plan = EndpointOpener::new(loc.clone(), opener).plan(URL);
            assert_eq!(
                plan,
                OpenPlan::Default {
                    opener,
                    command: opener.command(URL),
                }
            );
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn first_existing_candidate_wins() {
        let root = temp_dir_for("first-wins");
        let second = root.join("second.exe");
        let third = root.join("third.exe");
        std::fs::write(&second, b"").unwrap();
        std::fs::write(&third, b"").unwrap();

        let loc = BrowserLocator::new(vec![root.join("first.exe"), second.clone(), third]);
        let plan = EndpointOpener::new(loc, DefaultOpener::Unix).plan(URL);
        match plan {
            OpenPlan::Browser { path, command } => {
                assert_eq!(path, second);
                assert_eq!(command.args, vec![URL.to_string()]);
            }
            other => panic!("expected browser plan, got {other:?}"),
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn preferred_candidate_goes_first() {
        let loc = BrowserLocator::avast(None).with_preferred(PathBuf::from("/opt/browser"));
        assert_eq!(loc.candidates()[0], PathBuf::from("/opt/browser"));
        assert_eq!(loc.candidates().len(), 3);
    }

    #[tokio::test]
    async fn unlaunchable_browser_is_not_fatal() {
        let root = temp_dir_for("unlaunchable");
        // Exists but is not executable.
        let fake = root.join("browser.exe");
        std::fs::write(&fake, b"not a program").unwrap();

        let loc = BrowserLocator::new(vec![fake]);
        let outcome = EndpointOpener::new(loc, DefaultOpener::Unix).open(URL);
        assert!(matches!(outcome, OpenOutcome::Failed { .. }));
        let _ = std::fs::remove_dir_all(&root);
    }
}
