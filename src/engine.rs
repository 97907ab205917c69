use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auxiliary::AuxiliaryRunner;
use crate::config::WatchdogConfig;
use crate::error::{Result, WatchdogError};
use crate::models::RoundOutcome;
use crate::probe::{IcmpProbe, Probe, Prober};
use crate::process::{ProcessTable, Spawner, SystemProcessTable, SystemSpawner};
use crate::supervisor::ProcessSupervisor;
use crate::utils::plural;

/// What a round's outcome means for the managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Recovered { previous: u32 },
    Failing { consecutive: u32 },
    /// The threshold was reached; the counter has already been reset.
    Trigger { consecutive: u32 },
}

/// Counts back-to-back rounds in which every probe failed.
#[derive(Debug)]
pub struct FailureTracker {
    consecutive: u32,
    max_failures: u32,
}

impl FailureTracker {
    pub fn new(max_failures: u32) -> Self {
        Self {
            consecutive: 0,
            max_failures: max_failures.max(1),
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn record(&mut self, outcome: &RoundOutcome) -> Verdict {
        if outcome.all_failed() {
            self.consecutive = self.consecutive.saturating_add(1);
            warn!("Consecutive failures now stands at {}", self.consecutive);

            if self.consecutive >= self.max_failures {
                let consecutive = self.consecutive;
                self.consecutive = 0;
                return Verdict::Trigger { consecutive };
            }
            return Verdict::Failing { consecutive: self.consecutive };
        }

        if self.consecutive > 0 {
            info!("At least one ping test succeeded. Resetting consecutive failure count.");
            let previous = self.consecutive;
            self.consecutive = 0;
            return Verdict::Recovered { previous };
        }
        Verdict::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The configured number of rounds ran to completion.
    Completed,
    Cancelled,
}

impl LoopExit {
    pub fn code(self) -> u8 {
        match self {
            LoopExit::Completed => 0,
            LoopExit::Cancelled => 1,
        }
    }
}

/// Drives rounds of probing and recovery. All counters live here and are
/// only touched from [`Monitor::run`].
pub struct Monitor<P, T, S> {
    config: WatchdogConfig,
    prober: Prober<P>,
    supervisor: ProcessSupervisor<T, S>,
    auxiliary: AuxiliaryRunner<S>,
    tracker: FailureTracker,
    periods: u64,
}

impl Monitor<IcmpProbe, SystemProcessTable, SystemSpawner> {
    pub fn system(config: WatchdogConfig) -> Result<Self> {
        let probe = IcmpProbe::new()?;
        Ok(Self::new(config, probe, SystemProcessTable::new(), SystemSpawner))
    }
}

impl<P: Probe, T: ProcessTable, S: Spawner + Clone> Monitor<P, T, S> {
    pub fn new(config: WatchdogConfig, probe: P, table: T, spawner: S) -> Self {
        let supervisor = ProcessSupervisor::new(table, spawner.clone(), config.timings.restart_delay());
        let auxiliary = AuxiliaryRunner::new(config.aux.clone(), spawner);
        let tracker = FailureTracker::new(config.max_failures);

        Self {
            config,
            prober: Prober::new(probe),
            supervisor,
            auxiliary,
            tracker,
            periods: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.tracker.consecutive()
    }

    pub fn periods(&self) -> u64 {
        self.periods
    }

    /// Run rounds until `cancel` fires or `max_rounds` is reached.
    ///
    /// A round that errors or panics is logged and followed by the cooldown;
    /// it never ends the loop.
    pub async fn run(&mut self, cancel: &CancellationToken) -> LoopExit {
        info!(
            "Watching {} via {} {}: {} failed {} trigger a restart",
            self.config.process,
            self.config.destinations.len(),
            plural(self.config.destinations.len(), "destination", "destinations"),
            self.config.max_failures,
            plural(self.config.max_failures as usize, "round", "rounds"),
        );

        self.tracker.reset();

        while !cancel.is_cancelled() {
            if self.config.max_rounds.is_some_and(|max| self.periods >= max) {
                info!("Completed {} {}. Stopping.", self.periods, plural(self.periods as usize, "round", "rounds"));
                return LoopExit::Completed;
            }

            let start_time = Utc::now();
            let round = AssertUnwindSafe(self.round(cancel)).catch_unwind().await;

            let failure = match round {
                Ok(Ok(())) => None,
                Ok(Err(WatchdogError::Cancelled)) => break,
                Ok(Err(e)) => Some(e.to_string()),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };

            if let Some(reason) = failure {
                let cooldown = self.config.timings.cooldown();
                error!("An error occurred: {}. Sleeping for {} seconds.", reason, cooldown.as_secs());
                if pause(cooldown, cancel).await.is_err() {
                    break;
                }
            } else {
                let duration = Utc::now() - start_time;
                debug!("Round {} completed in {:.2}s", self.periods, duration.num_milliseconds() as f64 / 1000.0);
            }

            self.periods += 1;
        }

        error!("Monitoring loop has been cancelled.");
        LoopExit::Cancelled
    }

    async fn round(&mut self, cancel: &CancellationToken) -> Result<()> {
        let outcome = self
            .prober
            .probe(&self.config.destinations, self.config.timeout(), cancel)
            .await?;

        if let Verdict::Trigger { .. } = self.tracker.record(&outcome) {
            error!("Consecutive failures limit {} has been reached.", self.config.max_failures);

            if self.supervisor.restart(&self.config.process, &self.config.restart_args).await {
                info!("Giving process time to start up before monitoring is resumed...");
                pause(self.config.timings.restart_delay(), cancel).await?;
            }
        }

        let interval = self.config.interval_secs;
        info!("Sleeping for {} {}", interval, plural(interval as usize, "second", "seconds"));

        self.auxiliary.maybe_run(self.periods);

        pause(self.config.interval(), cancel).await
    }
}

/// Sleep that ends early with [`WatchdogError::Cancelled`].
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WatchdogError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = panic.downcast_ref::<String>() {
        return msg.clone();
    }
    "round panicked".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuxSchedule, Timings};
    use crate::models::{ProbeResult, ProbeStatus};
    use crate::probe::tests::ScriptedProbe;
    use crate::process::fakes::{CallLog, FakeSpawner, FakeTable, OsCall};
    use std::num::NonZeroU32;
    use tokio::time::Instant;

    fn outcome(success_count: usize, failure_count: usize) -> RoundOutcome {
        RoundOutcome { success_count, failure_count }
    }

    fn config(destinations: &[&str], max_failures: u32, max_rounds: u64) -> WatchdogConfig {
        WatchdogConfig {
            restart_args: vec!["--connect".to_string(), "profile.ovpn".to_string()],
            process: "vpn".to_string(),
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            interval_secs: 0,
            max_failures,
            timeout_secs: 1,
            aux: None,
            timings: Timings::default(),
            max_rounds: Some(max_rounds),
        }
    }

    fn monitor(
        config: WatchdogConfig,
        reachable: &[&str],
        calls: &CallLog,
    ) -> Monitor<ScriptedProbe, FakeTable, FakeSpawner> {
        let table = FakeTable::new(calls, &[("vpn", 100, Some("/opt/vpn/vpn"))]);
        Monitor::new(config, ScriptedProbe::new(reachable), table, FakeSpawner::new(calls))
    }

    fn spawns(calls: &CallLog) -> usize {
        calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| matches!(call, OsCall::Spawn(..)))
            .count()
    }

    #[test]
    fn test_tracker_triggers_at_threshold_and_resets() {
        let mut tracker = FailureTracker::new(3);

        assert_eq!(tracker.record(&outcome(0, 2)), Verdict::Failing { consecutive: 1 });
        assert_eq!(tracker.record(&outcome(0, 2)), Verdict::Failing { consecutive: 2 });
        assert_eq!(tracker.record(&outcome(0, 2)), Verdict::Trigger { consecutive: 3 });
        assert_eq!(tracker.consecutive(), 0);
        assert_eq!(tracker.record(&outcome(0, 2)), Verdict::Failing { consecutive: 1 });
    }

    #[test]
    fn test_tracker_resets_on_any_success() {
        let mut tracker = FailureTracker::new(5);

        assert_eq!(tracker.record(&outcome(2, 0)), Verdict::Healthy);
        tracker.record(&outcome(0, 3));
        tracker.record(&outcome(0, 3));
        assert_eq!(tracker.record(&outcome(1, 2)), Verdict::Recovered { previous: 2 });
        assert_eq!(tracker.consecutive(), 0);
    }

    #[test]
    fn test_tracker_threshold_of_one() {
        let mut tracker = FailureTracker::new(1);
        assert_eq!(tracker.record(&outcome(0, 1)), Verdict::Trigger { consecutive: 1 });
        assert_eq!(tracker.record(&outcome(0, 1)), Verdict::Trigger { consecutive: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_destination_restarts_once() {
        let calls = CallLog::default();
        let mut monitor = monitor(config(&["10.255.255.1"], 2, 2), &[], &calls);

        let exit = monitor.run(&CancellationToken::new()).await;

        assert_eq!(exit, LoopExit::Completed);
        assert_eq!(monitor.consecutive_failures(), 0);
        assert_eq!(monitor.periods(), 2);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                OsCall::Kill(100),
                OsCall::Spawn("/opt/vpn/vpn".into(), vec!["--connect".to_string(), "profile.ovpn".to_string()]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_fires_once_per_threshold() {
        let calls = CallLog::default();
        let mut monitor = monitor(config(&["10.0.0.1", "10.0.0.2"], 3, 7), &[], &calls);

        monitor.run(&CancellationToken::new()).await;

        // Rounds 3 and 6 trigger; the relaunched fake is gone, so only the
        // first restart finds something to kill.
        assert_eq!(spawns(&calls), 1);
        assert_eq!(monitor.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_round_does_not_count() {
        let calls = CallLog::default();
        let mut monitor = monitor(config(&["1.1.1.1", "8.8.8.8", "10.255.255.1"], 1, 4), &["8.8.8.8"], &calls);

        assert_eq!(monitor.run(&CancellationToken::new()).await, LoopExit::Completed);
        assert_eq!(monitor.consecutive_failures(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let calls = CallLog::default();
        let mut config = config(&["1.1.1.1"], 5, 100);
        config.interval_secs = 3600;
        let mut monitor = monitor(config, &["1.1.1.1"], &calls);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        assert_eq!(monitor.run(&cancel).await, LoopExit::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(11));
        assert_eq!(monitor.periods(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let calls = CallLog::default();
        let mut monitor = monitor(config(&["1.1.1.1"], 1, 5), &[], &calls);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(monitor.run(&cancel).await, LoopExit::Cancelled);
        assert_eq!(monitor.periods(), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    struct PanickingProbe;

    impl Probe for PanickingProbe {
        async fn check(&self, destination: &str, _timeout: Duration) -> ProbeResult {
            if destination == "boom" {
                panic!("probe exploded");
            }
            ProbeResult::failure(destination, ProbeStatus::TimedOut)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_panic_is_isolated_with_cooldown() {
        let calls = CallLog::default();
        let table = FakeTable::new(&calls, &[]);
        let mut monitor = Monitor::new(config(&["boom"], 1, 2), PanickingProbe, table, FakeSpawner::new(&calls));

        let start = Instant::now();
        assert_eq!(monitor.run(&CancellationToken::new()).await, LoopExit::Completed);

        assert_eq!(monitor.periods(), 2);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auxiliary_runs_on_schedule() {
        let aux = tempfile::NamedTempFile::new().unwrap();
        let calls = CallLog::default();
        let mut config = config(&["1.1.1.1"], 5, 5);
        config.aux = Some(AuxSchedule {
            path: aux.path().to_path_buf(),
            arguments: None,
            skip_periods: NonZeroU32::new(2).unwrap(),
        });
        let mut monitor = monitor(config, &["1.1.1.1"], &calls);

        monitor.run(&CancellationToken::new()).await;

        // Periods 0, 2 and 4.
        assert_eq!(spawns(&calls), 0);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![OsCall::SpawnLowPriority(aux.path().to_path_buf(), Vec::new()); 3]
        );
    }
}
