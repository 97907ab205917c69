use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::models::ManagedProcess;
use crate::process::{ProcessTable, Spawner};
use crate::utils::plural;

/// Kills every running instance of the managed process and relaunches one.
pub struct ProcessSupervisor<T, S> {
    table: T,
    spawner: S,
    restart_delay: Duration,
}

impl<T: ProcessTable, S: Spawner> ProcessSupervisor<T, S> {
    pub fn new(table: T, spawner: S, restart_delay: Duration) -> Self {
        Self { table, spawner, restart_delay }
    }

    /// Restart the process called `name`, passing `args` on its command line.
    ///
    /// Returns true when a new instance was launched, or when nothing was
    /// running under that name. Failures are logged here and never returned
    /// as errors.
    pub async fn restart(&mut self, name: &str, args: &[String]) -> bool {
        let processes = self.table.find_by_name(name);

        if processes.is_empty() {
            warn!("No processes matching name {} found. No processes will be closed or killed", name);
            return true;
        }

        warn!(
            "There {} {} matching {} found",
            plural(processes.len(), "is", "are"),
            processes.len(),
            plural(processes.len(), "process", "processes")
        );

        let Some(image_path) = select_image_path(&processes) else {
            error!("No image path found for processes matching name {}. The process will not be killed or restarted.", name);
            return false;
        };

        for process in &processes {
            warn!("Performing kill of process {}", process.pid);
            if !self.table.kill(process.pid) {
                warn!("Process {} could not be killed, it may have already exited", process.pid);
            }
        }

        info!(
            "Restarting process at {} in {} seconds",
            image_path.display(),
            self.restart_delay.as_secs()
        );
        tokio::time::sleep(self.restart_delay).await;

        match self.spawner.spawn(&image_path, args) {
            Ok(pid) => {
                info!("Started process {} successfully. Process ID is {}", image_path.display(), pid);
                true
            }
            Err(e) => {
                error!("Process could not be started using executable at {}: {}", image_path.display(), e);
                false
            }
        }
    }
}

/// Pick the executable path shared by the most processes.
///
/// Processes without a resolvable path don't vote. Ties go to the
/// lexicographically smallest path.
pub fn select_image_path(processes: &[ManagedProcess]) -> Option<PathBuf> {
    let mut votes: BTreeMap<&Path, usize> = BTreeMap::new();
    for path in processes
        .iter()
        .filter_map(|p| p.image_path.as_deref())
        .filter(|p| !p.as_os_str().is_empty())
    {
        *votes.entry(path).or_default() += 1;
    }

    votes
        .into_iter()
        .fold(None, |best: Option<(&Path, usize)>, (path, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((path, count)),
        })
        .map(|(path, _)| path.to_path_buf())
}
