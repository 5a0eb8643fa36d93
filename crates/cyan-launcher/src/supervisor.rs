use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use cyan_process::{ChildState, ChildStatus, ExitReport, ReadinessOutcome};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::{oneshot, watch},
};

use crate::{
    command::{CommandSpec, LaunchPlan},
    error::LaunchError,
    readiness::{self, ReadinessLatch, ReadinessProbe, ReadySignal},
};

/// Everything needed to start the dev server once.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub command: CommandSpec,
    pub cwd: PathBuf,
    pub ready_markers: Vec<String>,
    pub error_marker: String,
    pub ready_timeout: Duration,
}

impl ServerSpec {
    pub fn from_plan(plan: &LaunchPlan, cwd: PathBuf, ready_timeout: Duration) -> Self {
        Self {
            command: plan.server.clone(),
            cwd,
            ready_markers: plan.ready_markers.clone(),
            error_marker: plan.error_marker.clone(),
            ready_timeout,
        }
    }
}

/// Pending readiness of a freshly spawned server.
#[derive(Debug)]
pub struct ReadinessWait {
    rx: oneshot::Receiver<ReadySignal>,
    timeout: Duration,
}

impl ReadinessWait {
    pub async fn wait(self) -> ReadinessOutcome {
        readiness::wait_for_ready(self.rx, self.timeout).await
    }
}

/// Owned handle to the one supervised server process.
///
/// The `Child` itself lives in the exit-watcher task; the handle signals the
/// process (group) by id and observes exit through a watch channel.
#[derive(Debug)]
pub struct ServerHandle {
    pid: Option<u32>,
    stopping: Arc<AtomicBool>,
    exit_rx: watch::Receiver<Option<ExitReport>>,
}

impl ServerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_report(&self) -> Option<ExitReport> {
        self.exit_rx.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// A receiver that resolves when the exit watcher reports.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ExitReport>> {
        self.exit_rx.clone()
    }

    pub fn status(&self) -> ChildStatus {
        match self.exit_report() {
            Some(r) => ChildStatus {
                state: r.state(),
                pid: self.pid,
                exit_code: r.exit_code,
                message: r.message,
            },
            None => ChildStatus {
                state: if self.stopping.load(Ordering::SeqCst) {
                    ChildState::Stopping
                } else {
                    ChildState::Running
                },
                pid: self.pid,
                exit_code: None,
                message: None,
            },
        }
    }

    /// Sends SIGTERM to the server's process group. Does not wait.
    pub fn terminate(&self) -> std::io::Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let Some(pid) = self.pid else {
            return Ok(());
        };
        signal_tree(pid, false)
    }

    pub fn kill(&self) -> std::io::Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let Some(pid) = self.pid else {
            return Ok(());
        };
        signal_tree(pid, true)
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, watch::Sender<Option<ExitReport>>) {
        let (tx, exit_rx) = watch::channel(None);
        (
            Self {
                pid: None,
                stopping: Arc::new(AtomicBool::new(false)),
                exit_rx,
            },
            tx,
        )
    }

    /// Waits until the exit watcher reports, or `timeout` passes.
    pub async fn wait_exit(&self, timeout: Duration) -> Option<ExitReport> {
        let mut rx = self.exit_rx.clone();
        tokio::time::timeout(timeout, wait_exit(&mut rx))
            .await
            .ok()
            .flatten()
    }
}

/// Resolves with the exit report, or `None` if the watcher went away silently.
pub async fn wait_exit(rx: &mut watch::Receiver<Option<ExitReport>>) -> Option<ExitReport> {
    match rx.wait_for(|r| r.is_some()).await {
        Ok(r) => r.clone(),
        Err(_) => None,
    }
}

#[cfg(unix)]
fn signal_tree(pid: u32, force: bool) -> std::io::Result<()> {
    // The server runs in its own session, so its pid is also the process group id.
    let sig = if force { libc::SIGKILL } else { libc::SIGTERM };
    let rc = unsafe { libc::kill(-(pid as i32), sig) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_tree(pid: u32, _force: bool) -> std::io::Result<()> {
    // Console processes on Windows ignore WM_CLOSE, so the tree is always forced.
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "taskkill exited with {:?}",
            status.code()
        )));
    }
    Ok(())
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the launcher dies without running its shutdown path, the server still gets SIGTERM.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Spawns the server with captured output and starts its reader and exit-watcher tasks.
pub fn spawn_server(spec: &ServerSpec) -> Result<(ServerHandle, ReadinessWait), LaunchError> {
    let mut cmd = spec.command.tokio_command(Some(&spec.cwd));
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                // New session so the whole npm -> node tree can be signalled at once.
                set_parent_death_signal()?;
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: spec.command.program.clone(),
        cwd: spec.cwd.clone(),
        source,
    })?;
    let started = tokio::time::Instant::now();
    let pid = child.id();
    tracing::info!(pid = ?pid, command = %spec.command.display(), "server spawned");

    let (latch, ready_rx) = ReadinessLatch::new(ReadinessProbe::new(spec.ready_markers.clone()));

    if let Some(out) = child.stdout.take() {
        let mut latch = latch;
        tokio::spawn(async move {
            // Keep draining after readiness so the server never blocks on a full pipe.
            for_each_line(out, |line| {
                if latch.observe(line) {
                    tracing::info!(line = %line, "server reported ready");
                }
                tracing::debug!(target: "cyan::server", "[stdout] {line}");
            })
            .await;
        });
    }
    if let Some(err) = child.stderr.take() {
        let error_marker = spec.error_marker.clone();
        tokio::spawn(async move {
            for_each_line(err, |line| {
                if line.contains(&error_marker) {
                    tracing::warn!(line = %line, "server error");
                } else {
                    tracing::debug!(target: "cyan::server", "[stderr] {line}");
                }
            })
            .await;
        });
    }

    let stopping = Arc::new(AtomicBool::new(false));
    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn({
        let stopping = stopping.clone();
        async move {
            let res = child.wait().await;
            let runtime = started.elapsed();
            let report = match res {
                Ok(status) => ExitReport {
                    pid,
                    exit_code: status.code(),
                    runtime,
                    message: describe_exit(&status),
                },
                Err(err) => ExitReport {
                    pid,
                    exit_code: None,
                    runtime,
                    message: Some(format!("wait failed: {err}")),
                },
            };

            if stopping.load(Ordering::SeqCst) {
                tracing::info!(exit_code = ?report.exit_code, "server stopped");
            } else if report.success() {
                tracing::warn!(runtime_ms = runtime.as_millis() as u64, "server exited");
            } else {
                tracing::error!(
                    exit_code = ?report.exit_code,
                    message = ?report.message,
                    runtime_ms = runtime.as_millis() as u64,
                    "server stopped unexpectedly"
                );
            }
            let _ = exit_tx.send(Some(report));
        }
    });

    Ok((
        ServerHandle {
            pid,
            stopping,
            exit_rx,
        },
        ReadinessWait {
            rx: ready_rx,
            timeout: spec.ready_timeout,
        },
    ))
}

/// Calls `f` for every line until EOF. Invalid UTF-8 is decoded lossily.
async fn for_each_line<R>(reader: R, mut f: impl FnMut(&str))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                f(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                tracing::debug!(error = %e, "server output read failed");
                break;
            }
        }
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> Option<String> {
    if let Some(code) = status.code() {
        return Some(format!("exited with code {code}"));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return Some(format!("terminated by signal {sig}"));
        }
    }
    Some("exited".to_string())
}
