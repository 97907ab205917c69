use tracing::{error, info, warn};

use crate::config::AuxSchedule;
use crate::process::{split_arguments, Spawner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxRun {
    Disabled,
    Missing,
    Skipped,
    Launched(u32),
    Failed,
}

/// Launches the auxiliary helper every `skip_periods` rounds at reduced
/// scheduling priority.
pub struct AuxiliaryRunner<S> {
    schedule: Option<AuxSchedule>,
    spawner: S,
}

impl<S: Spawner> AuxiliaryRunner<S> {
    pub fn new(schedule: Option<AuxSchedule>, spawner: S) -> Self {
        Self { schedule, spawner }
    }

    pub fn maybe_run(&self, period: u64) -> AuxRun {
        let Some(schedule) = &self.schedule else {
            return AuxRun::Disabled;
        };

        if !schedule.path.exists() {
            warn!("Auxiliary process specified {} can not be found", schedule.path.display());
            return AuxRun::Missing;
        }

        if !is_due(period, schedule) {
            return AuxRun::Skipped;
        }

        info!("Auxiliary process {} found and running this period.", schedule.path.display());

        let args = split_arguments(schedule.arguments.as_deref().unwrap_or_default());
        match self.spawner.spawn_low_priority(&schedule.path, &args) {
            Ok(pid) => {
                info!("Auxiliary started with ID {}", pid);
                AuxRun::Launched(pid)
            }
            Err(e) => {
                error!("Auxiliary process at {} could not be started: {}", schedule.path.display(), e);
                AuxRun::Failed
            }
        }
    }
}

fn is_due(period: u64, schedule: &AuxSchedule) -> bool {
    period % u64::from(schedule.skip_periods.get()) == 0
}
