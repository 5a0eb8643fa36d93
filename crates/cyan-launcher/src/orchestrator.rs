use std::future::Future;

use cyan_process::{ExitReport, ReadinessOutcome, RunId};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::{
    command::LaunchPlan,
    config::LauncherConfig,
    dependencies::{self, DependencyStatus},
    error::LaunchError,
    opener::{EndpointOpener, OpenOutcome},
    prerequisite,
    shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownSignals, ShutdownTrigger},
    supervisor::{self, ServerSpec},
};

/// Where shutdown requests come from. Signals in production, a channel in tests.
pub trait ShutdownSource {
    fn recv(&mut self) -> impl Future<Output = ShutdownTrigger>;
}

impl ShutdownSource for ShutdownSignals {
    fn recv(&mut self) -> impl Future<Output = ShutdownTrigger> {
        ShutdownSignals::recv(self)
    }
}

impl ShutdownSource for mpsc::UnboundedReceiver<ShutdownTrigger> {
    async fn recv(&mut self) -> ShutdownTrigger {
        match mpsc::UnboundedReceiver::recv(self).await {
            Some(t) => t,
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub trigger: ShutdownTrigger,
    pub outcome: ShutdownOutcome,
    pub dependencies: Option<DependencyStatus>,
    pub readiness: Option<ReadinessOutcome>,
    pub browser: Option<OpenOutcome>,
    pub restarts: u32,
    pub heartbeats: u64,
}

impl RunSummary {
    pub fn exit_code(&self) -> u8 {
        0
    }
}

/// Progress through the startup sequence, used to fill the summary when a
/// shutdown arrives part-way through.
#[derive(Debug, Default)]
struct Progress {
    dependencies: Option<DependencyStatus>,
    readiness: Option<ReadinessOutcome>,
    browser: Option<OpenOutcome>,
    restarts: u32,
    heartbeats: u64,
}

pub struct Orchestrator {
    config: LauncherConfig,
    plan: LaunchPlan,
    opener: EndpointOpener,
    run_id: RunId,
}

impl Orchestrator {
    pub fn new(config: LauncherConfig, plan: LaunchPlan) -> Self {
        let opener = EndpointOpener::detect(config.browser.clone());
        Self {
            config,
            plan,
            opener,
            run_id: RunId::new(),
        }
    }

    pub fn with_opener(mut self, opener: EndpointOpener) -> Self {
        self.opener = opener;
        self
    }

    /// Runs until SIGINT/SIGTERM. Signal listeners are armed before anything is spawned.
    pub async fn run(&self) -> Result<RunSummary, LaunchError> {
        let mut signals = ShutdownSignals::install()?;
        self.run_until(&mut signals).await
    }

    pub async fn run_until<S: ShutdownSource>(
        &self,
        shutdown: &mut S,
    ) -> Result<RunSummary, LaunchError> {
        let span = tracing::info_span!("cyan", run_id = %self.run_id);
        self.drive(shutdown).instrument(span).await
    }

    async fn drive<S: ShutdownSource>(&self, shutdown: &mut S) -> Result<RunSummary, LaunchError> {
        let cfg = &self.config;
        let url = cfg.url();
        // Dropping the coordinator on any early return terminates the server.
        let mut coordinator = ShutdownCoordinator::new(cfg.shutdown_grace);
        let mut progress = Progress::default();

        tracing::info!(root = %cfg.project_root.display(), "starting Cyan orchestrator");

        match or_shutdown(shutdown, prerequisite::probe_runtime(&self.plan.runtime_probe)).await {
            Ok(version) => {
                version?;
            }
            Err(t) => return Ok(self.stop(&mut coordinator, t, progress).await),
        }

        match or_shutdown(
            shutdown,
            dependencies::ensure_dependencies(
                &cfg.project_root,
                &self.plan.layout,
                &self.plan.install,
            ),
        )
        .await
        {
            Ok(status) => progress.dependencies = Some(status?),
            Err(t) => return Ok(self.stop(&mut coordinator, t, progress).await),
        }

        tracing::info!(port = cfg.port, %url, "starting Cyan development server");
        let spec = ServerSpec::from_plan(&self.plan, cfg.project_root.clone(), cfg.ready_timeout);
        let (handle, ready) = supervisor::spawn_server(&spec)?;
        let mut exit_rx = Some(handle.exit_watch());
        coordinator.attach(handle);

        match or_shutdown(shutdown, ready.wait()).await {
            Ok(outcome) => {
                match &outcome {
                    ReadinessOutcome::Matched { marker, elapsed, .. } => {
                        tracing::info!(%marker, elapsed_ms = elapsed.as_millis() as u64, "server ready");
                    }
                    ReadinessOutcome::TimedOut { waited } => {
                        tracing::warn!(
                            waited_ms = waited.as_millis() as u64,
                            "no readiness marker seen; assuming the server is up"
                        );
                    }
                }
                progress.readiness = Some(outcome);
            }
            Err(t) => return Ok(self.stop(&mut coordinator, t, progress).await),
        }

        // Settle delay for late startup work after the marker.
        if let Err(t) = or_shutdown(shutdown, tokio::time::sleep(cfg.settle_delay)).await {
            return Ok(self.stop(&mut coordinator, t, progress).await);
        }

        if cfg.open_browser {
            progress.browser = Some(self.opener.open(&url));
        } else {
            tracing::info!(%url, "browser opening disabled");
        }

        tracing::info!(%url, "Cyan orchestrator is now running");
        tracing::info!("to stop the server: close this window or press Ctrl+C");

        let started = tokio::time::Instant::now();
        let period = cfg.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(started + period, period);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            match next_idle_event(shutdown, &mut exit_rx, &mut heartbeat).await {
                IdleEvent::Shutdown(t) => {
                    return Ok(self.stop(&mut coordinator, t, progress).await);
                }
                IdleEvent::Exited(report) => {
                    let report = coordinator.clear_exited().or(report);
                    exit_rx = None;
                    let Some(report) = report else {
                        continue;
                    };
                    match self.restart_after(&report, &spec, &mut progress, shutdown).await {
                        Restart::Spawned(handle) => {
                            exit_rx = Some(handle.exit_watch());
                            coordinator.attach(handle);
                        }
                        Restart::Skipped => {}
                        Restart::Interrupted(t) => {
                            return Ok(self.stop(&mut coordinator, t, progress).await);
                        }
                    }
                }
                IdleEvent::Heartbeat => {
                    progress.heartbeats += 1;
                    let status = coordinator.server().map(|h| h.status());
                    tracing::info!(
                        %url,
                        uptime_sec = started.elapsed().as_secs(),
                        server = ?status.map(|s| s.state),
                        "Cyan is running"
                    );
                }
            }
        }
    }

    async fn restart_after<S: ShutdownSource>(
        &self,
        report: &ExitReport,
        spec: &ServerSpec,
        progress: &mut Progress,
        shutdown: &mut S,
    ) -> Restart {
        let restart = self.config.restart;
        if !restart.policy.should_restart(report.success()) {
            return Restart::Skipped;
        }
        if progress.restarts >= restart.max_retries {
            tracing::error!(
                attempts = progress.restarts,
                "server restart limit reached; not restarting"
            );
            return Restart::Skipped;
        }

        progress.restarts = progress.restarts.saturating_add(1);
        let delay = restart.backoff(progress.restarts);
        tracing::warn!(
            attempt = progress.restarts,
            max = restart.max_retries,
            delay_ms = delay.as_millis() as u64,
            "restarting server"
        );
        if let Err(t) = or_shutdown(shutdown, tokio::time::sleep(delay)).await {
            return Restart::Interrupted(t);
        }

        match supervisor::spawn_server(spec) {
            // Readiness of a restarted server is only logged by its reader task.
            Ok((handle, _ready)) => Restart::Spawned(handle),
            Err(e) => {
                tracing::error!(error = %e, "server restart failed");
                Restart::Skipped
            }
        }
    }

    async fn stop(
        &self,
        coordinator: &mut ShutdownCoordinator,
        trigger: ShutdownTrigger,
        progress: Progress,
    ) -> RunSummary {
        let outcome = coordinator.shutdown(trigger).await;
        tracing::info!(?trigger, ?outcome, "Cyan orchestrator stopped");
        RunSummary {
            run_id: self.run_id.clone(),
            trigger,
            outcome,
            dependencies: progress.dependencies,
            readiness: progress.readiness,
            browser: progress.browser,
            restarts: progress.restarts,
            heartbeats: progress.heartbeats,
        }
    }
}

enum Restart {
    Spawned(supervisor::ServerHandle),
    Skipped,
    Interrupted(ShutdownTrigger),
}

/// Runs `fut` unless a shutdown request arrives first. Shutdown wins ties.
async fn or_shutdown<S: ShutdownSource, T>(
    shutdown: &mut S,
    fut: impl Future<Output = T>,
) -> Result<T, ShutdownTrigger> {
    tokio::select! {
        biased;
        t = shutdown.recv() => Err(t),
        v = fut => Ok(v),
    }
}

enum IdleEvent {
    Shutdown(ShutdownTrigger),
    Exited(Option<ExitReport>),
    Heartbeat,
}

/// One step of the idle loop. Shutdown beats a child exit, which beats a due heartbeat.
async fn next_idle_event<S: ShutdownSource>(
    shutdown: &mut S,
    exit_rx: &mut Option<watch::Receiver<Option<ExitReport>>>,
    heartbeat: &mut tokio::time::Interval,
) -> IdleEvent {
    tokio::select! {
        biased;
        t = shutdown.recv() => IdleEvent::Shutdown(t),
        report = next_exit(exit_rx) => IdleEvent::Exited(report),
        _ = heartbeat.tick() => IdleEvent::Heartbeat,
    }
}

async fn next_exit(rx: &mut Option<watch::Receiver<Option<ExitReport>>>) -> Option<ExitReport> {
    match rx {
        Some(rx) => supervisor::wait_exit(rx).await,
        None => std::future::pending().await,
    }
}
