use std::time::Duration;

use cyan_process::ExitReport;

use crate::supervisor::ServerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Interrupt,
    Terminate,
    /// Normal exit of the launcher, including early returns and panics.
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownPhase {
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Signaled { pid: Option<u32> },
    NoChild,
    AlreadyStopping,
}

/// Owns the supervised server handle and guarantees it is signalled at most once.
///
/// `Running -> Stopping` is one-way. The first trigger takes the handle out of
/// the coordinator and sends it SIGTERM; every later trigger, including the one
/// fired from `Drop`, is a no-op.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    phase: ShutdownPhase,
    server: Option<ServerHandle>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// `grace` of zero sends SIGTERM and returns without waiting for the child.
    pub fn new(grace: Duration) -> Self {
        Self {
            phase: ShutdownPhase::Running,
            server: None,
            grace,
        }
    }

    pub fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    /// Installs a freshly spawned server. A server attached after shutdown began
    /// is terminated right away.
    pub fn attach(&mut self, handle: ServerHandle) {
        if self.phase == ShutdownPhase::Stopping {
            tracing::warn!(pid = ?handle.pid(), "server attached during shutdown");
            terminate(&handle);
            return;
        }
        if let Some(old) = self.server.replace(handle) {
            tracing::warn!(pid = ?old.pid(), "replacing a live server handle");
            terminate(&old);
        }
    }

    /// Clears the handle once its exit is confirmed. Returns the exit report.
    pub fn clear_exited(&mut self) -> Option<ExitReport> {
        let report = self.server.as_ref()?.exit_report()?;
        self.server = None;
        Some(report)
    }

    pub fn trigger(&mut self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        self.begin(trigger).0
    }

    /// Like [`trigger`](Self::trigger), then waits up to the grace period for the
    /// server to exit and force-kills it if it does not.
    pub async fn shutdown(&mut self, trigger: ShutdownTrigger) -> ShutdownOutcome {
        let (outcome, handle) = self.begin(trigger);
        if let Some(handle) = handle
            && !self.grace.is_zero()
        {
            match handle.wait_exit(self.grace).await {
                Some(report) => {
                    tracing::info!(exit_code = ?report.exit_code, "server exit confirmed");
                }
                None => {
                    tracing::warn!(
                        grace_ms = self.grace.as_millis() as u64,
                        "server still running after grace period; killing"
                    );
                    if let Err(e) = handle.kill() {
                        tracing::warn!(error = %e, "failed to kill server");
                    }
                }
            }
        }
        outcome
    }

    fn begin(&mut self, trigger: ShutdownTrigger) -> (ShutdownOutcome, Option<ServerHandle>) {
        if self.phase == ShutdownPhase::Stopping {
            return (ShutdownOutcome::AlreadyStopping, None);
        }
        self.phase = ShutdownPhase::Stopping;

        let Some(handle) = self.server.take() else {
            return (ShutdownOutcome::NoChild, None);
        };
        if handle.has_exited() {
            return (ShutdownOutcome::NoChild, None);
        }

        tracing::warn!(?trigger, pid = ?handle.pid(), "stopping Cyan orchestrator");
        terminate(&handle);
        (ShutdownOutcome::Signaled { pid: handle.pid() }, Some(handle))
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        self.trigger(ShutdownTrigger::Exit);
    }
}

fn terminate(handle: &ServerHandle) {
    if let Err(e) = handle.terminate() {
        // ESRCH: the group is already gone.
        tracing::debug!(error = %e, pid = ?handle.pid(), "terminate server");
    }
}

/// SIGINT and SIGTERM listeners. Armed once, before the server is spawned.
pub struct ShutdownSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) -> ShutdownTrigger {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownTrigger::Interrupt,
            _ = self.terminate.recv() => ShutdownTrigger::Terminate,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> ShutdownTrigger {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownTrigger::Interrupt,
            Err(e) => {
                tracing::warn!(error = %e, "ctrl-c listener failed");
                std::future::pending().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_trigger_wins() {
        let (handle, _tx) = ServerHandle::detached();
        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        c.attach(handle);

        assert_eq!(
            c.trigger(ShutdownTrigger::Interrupt),
            ShutdownOutcome::Signaled { pid: None }
        );
        assert_eq!(c.phase, ShutdownPhase::Stopping);
        assert!(c.server().is_none());
        assert_eq!(
            c.trigger(ShutdownTrigger::Terminate),
            ShutdownOutcome::AlreadyStopping
        );
        assert_eq!(
            c.trigger(ShutdownTrigger::Exit),
            ShutdownOutcome::AlreadyStopping
        );
    }

    #[test]
    fn trigger_without_child() {
        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        assert_eq!(c.trigger(ShutdownTrigger::Exit), ShutdownOutcome::NoChild);
        assert_eq!(
            c.trigger(ShutdownTrigger::Interrupt),
            ShutdownOutcome::AlreadyStopping
        );
    }

    #[test]
    fn exited_child_is_cleared_not_signalled() {
        let (handle, tx) = ServerHandle::detached();
        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        c.attach(handle);
        assert!(c.clear_exited().is_none());

        tx.send(Some(ExitReport {
            pid: None,
            exit_code: Some(1),
            runtime: Duration::from_secs(3),
            message: Some("exited with code 1".to_string()),
        }))
        .unwrap();

        let report = c.clear_exited().unwrap();
        assert_eq!(report.exit_code, Some(1));
        assert!(c.server().is_none());
        assert!(c.clear_exited().is_none());
        assert_eq!(c.trigger(ShutdownTrigger::Interrupt), ShutdownOutcome::NoChild);
    }

    #[test]
    fn attach_after_stop_does_not_revive() {
        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        c.trigger(ShutdownTrigger::Terminate);
        let (handle, _tx) = ServerHandle::detached();
        c.attach(handle);
        assert!(c.server().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rapid_signals_reach_child_once() {
        use crate::command::CommandSpec;
        use crate::supervisor::{ServerSpec, spawn_server};

        let dir = std::env::temp_dir().join(format!(
            "cyan-shutdown-once-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join("term.log");
        let script = format!(
            "trap 'echo term >> {}' TERM; echo 'Ready in 1ms'; while true; do sleep 0.05; done",
            log.display()
        );
        let spec = ServerSpec {
            command: CommandSpec::new("sh", ["-c", script.as_str()]),
            cwd: dir.clone(),
            ready_markers: vec!["Ready in".to_string()],
            error_marker: "Error:".to_string(),
            ready_timeout: Duration::from_secs(5),
        };
        let (handle, ready) = spawn_server(&spec).unwrap();
        assert!(ready.wait().await.matched());
        let pid = handle.pid().unwrap() as i32;

        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        c.attach(handle);
        let first = c.trigger(ShutdownTrigger::Interrupt);
        let second = c.trigger(ShutdownTrigger::Terminate);
        drop(c);
        assert!(matches!(first, ShutdownOutcome::Signaled { .. }));
        assert_eq!(second, ShutdownOutcome::AlreadyStopping);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let hits = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(hits.lines().count(), 1);

        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropping_coordinator_terminates_live_server() {
        use crate::command::CommandSpec;
        use crate::supervisor::{ServerSpec, spawn_server};

        let dir = std::env::temp_dir().join(format!(
            "cyan-shutdown-drop-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let log = dir.join("term.log");
        let script = format!(
            "trap 'echo term >> {}; exit 0' TERM; echo 'Ready in 1ms'; while true; do sleep 0.05; done",
            log.display()
        );
        let spec = ServerSpec {
            command: CommandSpec::new("sh", ["-c", script.as_str()]),
            cwd: dir.clone(),
            ready_markers: vec!["Ready in".to_string()],
            error_marker: "Error:".to_string(),
            ready_timeout: Duration::from_secs(5),
        };
        let (handle, ready) = spawn_server(&spec).unwrap();
        assert!(ready.wait().await.matched());
        let mut exit = handle.exit_watch();

        let mut c = ShutdownCoordinator::new(Duration::ZERO);
        c.attach(handle);
        // No explicit trigger: leaving scope is the normal-exit path.
        drop(c);

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            crate::supervisor::wait_exit(&mut exit),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report.exit_code, Some(0));
        let hits = std::fs::read_to_string(&log).unwrap_or_default();
        assert_eq!(hits.lines().count(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn grace_period_escalates_to_kill() {
        use crate::command::CommandSpec;
        use crate::supervisor::{ServerSpec, spawn_server};

        let spec = ServerSpec {
            command: CommandSpec::new(
                "sh",
                ["-c", "trap '' TERM; echo 'Local: x'; while true; do sleep 0.05; done"],
            ),
            cwd: std::env::temp_dir(),
            ready_markers: vec!["Local:".to_string()],
            error_marker: "Error:".to_string(),
            ready_timeout: Duration::from_secs(5),
        };
        let (handle, ready) = spawn_server(&spec).unwrap();
        assert!(ready.wait().await.matched());
        let mut exit = handle.exit_watch();

        let mut c = ShutdownCoordinator::new(Duration::from_millis(300));
        c.attach(handle);
        let outcome = c.shutdown(ShutdownTrigger::Terminate).await;
        assert!(matches!(outcome, ShutdownOutcome::Signaled { .. }));

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            crate::supervisor::wait_exit(&mut exit),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(report.exit_code, None);
    }
}
