//! Readiness detection for the supervised server.
//!
//! Readiness is inferred from log text: the first stdout line containing one of
//! the configured markers resolves a one-shot latch. The wait on that latch is
//! raced against a fixed timeout and always resolves; a timeout counts as ready.

use std::time::Duration;

use cyan_process::ReadinessOutcome;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadySignal {
    pub marker: String,
    pub line: String,
}

#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    markers: Vec<String>,
}

impl ReadinessProbe {
    pub fn new(markers: Vec<String>) -> Self {
        Self { markers }
    }

    pub fn match_line(&self, line: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|m| line.contains(m.as_str()))
            .map(String::as_str)
    }
}

/// Resolves at most once. Lines observed after resolution are ignored.
#[derive(Debug)]
pub struct ReadinessLatch {
    probe: ReadinessProbe,
    tx: Option<oneshot::Sender<ReadySignal>>,
}

impl ReadinessLatch {
    pub fn new(probe: ReadinessProbe) -> (Self, oneshot::Receiver<ReadySignal>) {
        let (tx, rx) = oneshot::channel();
        (Self { probe, tx: Some(tx) }, rx)
    }

    /// Returns true only for the line that resolved the latch.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.tx.is_none() {
            return false;
        }
        let Some(marker) = self.probe.match_line(line) else {
            return false;
        };
        let signal = ReadySignal {
            marker: marker.to_string(),
            line: line.to_string(),
        };
        if let Some(tx) = self.tx.take() {
            // The waiter may already have timed out and dropped the receiver.
            let _ = tx.send(signal);
        }
        true
    }
}

/// Races the latch against `timeout`. Never fails.
///
/// If the latch is dropped without resolving (stdout closed), the wait still
/// runs until the deadline so the caller sees the same timing as a silent server.
pub async fn wait_for_ready(
    rx: oneshot::Receiver<ReadySignal>,
    timeout: Duration,
) -> ReadinessOutcome {
    let started = tokio::time::Instant::now();
    let deadline = started + timeout;
    match tokio::time::timeout_at(deadline, rx).await {
        Ok(Ok(signal)) => ReadinessOutcome::Matched {
            marker: signal.marker,
            line: signal.line,
            elapsed: started.elapsed(),
        },
        Ok(Err(_closed)) => {
            tokio::time::sleep_until(deadline).await;
            ReadinessOutcome::TimedOut { waited: timeout }
        }
        Err(_elapsed) => ReadinessOutcome::TimedOut { waited: timeout },
    }
}
