use std::time::Duration;

/// Identifier for one launcher run. Attached to the root tracing span.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChildState {
    Running,
    Stopping,
    Exited,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChildStatus {
    pub state: ChildState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

/// How the readiness wait for the supervised child resolved.
///
/// The wait never fails: a timeout is reported as `TimedOut` and the caller
/// proceeds as if the server were ready.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReadinessOutcome {
    Matched {
        marker: String,
        line: String,
        #[serde(with = "duration_ms")]
        elapsed: Duration,
    },
    TimedOut {
        #[serde(with = "duration_ms")]
        waited: Duration,
    },
}

impl ReadinessOutcome {
    pub fn matched(&self) -> bool {
        matches!(self, ReadinessOutcome::Matched { .. })
    }
}

/// Final state of a supervised child as observed by its exit watcher.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitReport {
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    #[serde(with = "duration_ms")]
    pub runtime: Duration,
    pub message: Option<String>,
}

impl ExitReport {
    /// Signal deaths carry no exit code on unix; those count as failures too.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn state(&self) -> ChildState {
        if self.success() {
            ChildState::Exited
        } else {
            ChildState::Failed
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis().min(u128::from(u64::MAX)) as u64)
    }

    pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = <u64 as serde::Deserialize>::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_non_empty_and_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert!(!a.0.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn exit_report_without_code_is_failure() {
        let report = ExitReport {
            pid: Some(42),
            exit_code: None,
            runtime: Duration::from_secs(1),
            message: Some("terminated by signal 15".to_string()),
        };
        assert!(!report.success());
        assert_eq!(report.state(), ChildState::Failed);
    }

    #[test]
    fn readiness_outcome_serializes_elapsed_as_millis() {
        let outcome = ReadinessOutcome::Matched {
            marker: "Local:".to_string(),
            line: "  - Local: http://localhost:8000".to_string(),
            elapsed: Duration::from_millis(1500),
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["Matched"]["elapsed"], 1500);
        assert!(outcome.matched());
    }
}
