use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    TimedOut,
    Unresolved,
    Failed(String),
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Success => f.write_str("Success"),
            ProbeStatus::TimedOut => f.write_str("TimedOut"),
            ProbeStatus::Unresolved => f.write_str("Unresolved"),
            ProbeStatus::Failed(reason) => write!(f, "Failed ({})", reason),
        }
    }
}

/// Outcome of a single reachability check against one destination.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub destination: String,
    pub status: ProbeStatus,
    pub round_trip: Option<Duration>,
}

impl ProbeResult {
    pub fn success(destination: &str, round_trip: Duration) -> Self {
        Self {
            destination: destination.to_string(),
            status: ProbeStatus::Success,
            round_trip: Some(round_trip),
        }
    }

    pub fn failure(destination: &str, status: ProbeStatus) -> Self {
        Self {
            destination: destination.to_string(),
            status,
            round_trip: None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.status == ProbeStatus::Success
    }

    pub fn round_trip_ms(&self) -> Option<u128> {
        self.round_trip.map(|rtt| rtt.as_millis())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RoundOutcome {
    pub success_count: usize,
    pub failure_count: usize,
}

impl RoundOutcome {
    pub fn from_results(results: &[ProbeResult]) -> Self {
        let success_count = results.iter().filter(|r| r.is_reachable()).count();
        Self {
            success_count,
            failure_count: results.len() - success_count,
        }
    }

    pub fn all_failed(&self) -> bool {
        self.success_count == 0
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0
    }
}

/// A running instance of the managed process, as seen in the OS process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedProcess {
    pub pid: u32,
    pub image_path: Option<PathBuf>,
}
