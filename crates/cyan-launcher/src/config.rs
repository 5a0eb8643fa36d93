use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::LaunchError;

pub const CONFIG_FILE_NAME: &str = "cyan.toml";

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SETTLE_DELAY_MS: u64 = 3_000;
const DEFAULT_HEARTBEAT_SEC: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartPolicy {
    Off,
    Always,
    OnFailure,
}

impl RestartPolicy {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" | "never" | "no" => Some(RestartPolicy::Off),
            "always" => Some(RestartPolicy::Always),
            "on-failure" | "on_failure" | "onfailure" => Some(RestartPolicy::OnFailure),
            _ => None,
        }
    }

    pub fn should_restart(self, success: bool) -> bool {
        match self {
            RestartPolicy::Off => false,
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => !success,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartConfig {
    pub policy: RestartPolicy,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::Off,
            max_retries: 10,
            backoff_ms: 1000,
            backoff_max_ms: 30_000,
        }
    }
}

impl RestartConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(compute_backoff_ms(*self, attempt))
    }
}

pub(crate) fn compute_backoff_ms(cfg: RestartConfig, attempt: u32) -> u64 {
    // attempt is 1-based.
    let pow = attempt.saturating_sub(1).min(30);
    let mult = 1u64.checked_shl(pow).unwrap_or(u64::MAX);
    cfg.backoff_ms.saturating_mul(mult).min(cfg.backoff_max_ms)
}

/// Optional `cyan.toml` in the project root. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub ready_timeout_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
    pub heartbeat_sec: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
    pub open_browser: Option<bool>,
    pub browser: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub restart_policy: Option<String>,
    pub restart_max_retries: Option<u32>,
    pub restart_backoff_ms: Option<u64>,
    pub tts_engine: Option<String>,
    pub tts_voice: Option<String>,
}

impl FileConfig {
    pub fn parse(path: &Path, text: &str) -> Result<Self, LaunchError> {
        toml::from_str(text).map_err(|e| LaunchError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn load(project_root: &Path) -> Result<Option<Self>, LaunchError> {
        let path = project_root.join(CONFIG_FILE_NAME);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&path, &text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LaunchError::Config {
                path,
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub project_root: PathBuf,
    pub port: u16,
    pub ready_timeout: Duration,
    pub settle_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Zero keeps shutdown fire-and-forget: SIGTERM is sent and the launcher
    /// exits without waiting for the child.
    pub shutdown_grace: Duration,
    pub open_browser: bool,
    pub browser: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub restart: RestartConfig,
    pub tts_engine: String,
    pub tts_voice: String,
}

impl LauncherConfig {
    pub fn defaults(project_root: PathBuf) -> Self {
        Self {
            project_root,
            port: DEFAULT_PORT,
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SEC),
            shutdown_grace: Duration::ZERO,
            open_browser: true,
            browser: None,
            log_file: None,
            restart: RestartConfig::default(),
            tts_engine: crate::speech::DEFAULT_ENGINE.to_string(),
            tts_voice: crate::speech::DEFAULT_VOICE.to_string(),
        }
    }

    /// Defaults, then `cyan.toml`, then `CYAN_*` environment variables.
    pub fn load() -> Result<Self, LaunchError> {
        let env = |name: &str| std::env::var(name).ok();
        let root = match env("CYAN_PROJECT_ROOT").filter(|v| !v.trim().is_empty()) {
            Some(raw) => PathBuf::from(raw.trim()),
            None => std::env::current_dir()?,
        };
        let file = FileConfig::load(&root)?;
        Ok(Self::from_sources(root, file, env))
    }

    pub fn from_sources(
        project_root: PathBuf,
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut cfg = Self::defaults(project_root);
        if let Some(file) = file {
            cfg.apply_file(file);
        }
        cfg.apply_env(env);
        cfg
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.port.filter(|p| *p != 0) {
            self.port = v;
        }
        if let Some(v) = file.ready_timeout_ms {
            self.ready_timeout = ready_timeout_from_ms(v);
        }
        if let Some(v) = file.settle_delay_ms {
            self.settle_delay = settle_delay_from_ms(v);
        }
        if let Some(v) = file.heartbeat_sec {
            self.heartbeat_interval = heartbeat_from_sec(v);
        }
        if let Some(v) = file.shutdown_grace_ms {
            self.shutdown_grace = grace_from_ms(v);
        }
        if let Some(v) = file.open_browser {
            self.open_browser = v;
        }
        if file.browser.is_some() {
            self.browser = file.browser;
        }
        if file.log_file.is_some() {
            self.log_file = file.log_file;
        }
        if let Some(p) = file.restart_policy.as_deref().and_then(RestartPolicy::parse) {
            self.restart.policy = p;
        }
        if let Some(v) = file.restart_max_retries {
            self.restart.max_retries = v.clamp(0, 1000);
        }
        if let Some(v) = file.restart_backoff_ms {
            self.restart.backoff_ms = v.clamp(100, 10 * 60 * 1000);
            self.restart.backoff_max_ms = self.restart.backoff_max_ms.max(self.restart.backoff_ms);
        }
        if let Some(v) = file.tts_engine.filter(|s| !s.trim().is_empty()) {
            self.tts_engine = v;
        }
        if let Some(v) = file.tts_voice.filter(|s| !s.trim().is_empty()) {
            self.tts_voice = v;
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let u64_var = |name: &str| env(name).and_then(|v| v.trim().parse::<u64>().ok());
        let str_var = |name: &str| {
            env(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = env("CYAN_PORT").and_then(|v| v.trim().parse::<u16>().ok())
            && v != 0
        {
            self.port = v;
        }
        if let Some(v) = u64_var("CYAN_READY_TIMEOUT_MS") {
            self.ready_timeout = ready_timeout_from_ms(v);
        }
        if let Some(v) = u64_var("CYAN_SETTLE_DELAY_MS") {
            self.settle_delay = settle_delay_from_ms(v);
        }
        if let Some(v) = u64_var("CYAN_HEARTBEAT_SEC") {
            self.heartbeat_interval = heartbeat_from_sec(v);
        }
        if let Some(v) = u64_var("CYAN_SHUTDOWN_GRACE_MS") {
            self.shutdown_grace = grace_from_ms(v);
        }
        if str_var("CYAN_NO_BROWSER").is_some_and(|v| is_truthy(&v)) {
            self.open_browser = false;
        }
        if let Some(v) = str_var("CYAN_BROWSER") {
            self.browser = Some(PathBuf::from(v));
        }
        if let Some(v) = str_var("CYAN_LOG_FILE") {
            self.log_file = Some(PathBuf::from(v));
        }
        if let Some(p) = str_var("CYAN_RESTART_POLICY")
            .as_deref()
            .and_then(RestartPolicy::parse)
        {
            self.restart.policy = p;
        }
        if let Some(v) = env("CYAN_RESTART_MAX_RETRIES").and_then(|v| v.trim().parse::<u32>().ok())
        {
            self.restart.max_retries = v.clamp(0, 1000);
        }
        if let Some(v) = u64_var("CYAN_RESTART_BACKOFF_MS") {
            self.restart.backoff_ms = v.clamp(100, 10 * 60 * 1000);
            self.restart.backoff_max_ms = self.restart.backoff_max_ms.max(self.restart.backoff_ms);
        }
        if let Some(v) = str_var("CYAN_TTS_ENGINE") {
            self.tts_engine = v;
        }
        if let Some(v) = str_var("CYAN_TTS_VOICE") {
            self.tts_voice = v;
        }
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn ready_timeout_from_ms(v: u64) -> Duration {
    Duration::from_millis(v.clamp(500, 10 * 60 * 1000))
}

fn settle_delay_from_ms(v: u64) -> Duration {
    Duration::from_millis(v.min(60_000))
}

fn heartbeat_from_sec(v: u64) -> Duration {
    Duration::from_secs(v.clamp(1, 24 * 60 * 60))
}

fn grace_from_ms(v: u64) -> Duration {
    Duration::from_millis(v.min(60_000))
}
