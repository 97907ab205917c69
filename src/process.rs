//! Access to the host process table: enumerate by name, kill, launch.

use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::models::ManagedProcess;
use crate::priority;

pub trait ProcessTable {
    /// Processes currently running under `name`, freshly enumerated.
    fn find_by_name(&mut self, name: &str) -> Vec<ManagedProcess>;

    /// Kill `pid` outright. Returns false if the process could not be
    /// signalled, typically because it already exited.
    fn kill(&mut self, pid: u32) -> bool;
}

pub trait Spawner {
    /// Launch `program` with `args` and return the new process id.
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<u32>;

    /// Like [`Spawner::spawn`], but the child runs at below-normal
    /// scheduling priority.
    fn spawn_low_priority(&self, program: &Path, args: &[String]) -> io::Result<u32>;
}

pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self { system: System::new() }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn find_by_name(&mut self, name: &str) -> Vec<ManagedProcess> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        // On Linux every thread shows up as its own entry; only whole
        // processes count.
        let mut found: Vec<ManagedProcess> = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| process_matches(process.name(), process.exe(), name))
            .map(|(pid, process)| ManagedProcess {
                pid: pid.as_u32(),
                image_path: process.exe().map(Path::to_path_buf),
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        found
    }

    fn kill(&mut self, pid: u32) -> bool {
        self.system
            .process(Pid::from_u32(pid))
            .is_some_and(|process| process.kill())
    }
}

/// Launches detached children through tokio, which reaps them once they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSpawner;

impl Spawner for SystemSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> io::Result<u32> {
        launch(command(program, args))
    }

    fn spawn_low_priority(&self, program: &Path, args: &[String]) -> io::Result<u32> {
        let mut command = command(program, args);

        #[cfg(unix)]
        {
            priority::lower_in_child(&mut command);
        }
        #[cfg(windows)]
        let _priority = match priority::PriorityGuard::lower() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Could not lower priority for auxiliary process: {}", e);
                None
            }
        };

        launch(command)
    }
}

fn command(program: &Path, args: &[String]) -> tokio::process::Command {
    let mut command = tokio::process::Command::new(program);

    // Windows children get the joined command line as-is; Unix children
    // get the arguments as separate argv entries.
    #[cfg(windows)]
    {
        if !args.is_empty() {
            command.raw_arg(command_line(args));
        }
    }
    #[cfg(not(windows))]
    {
        command.args(args);
    }

    command.stdin(Stdio::null());
    command
}

fn launch(mut command: tokio::process::Command) -> io::Result<u32> {
    let child = command.spawn()?;
    child
        .id()
        .ok_or_else(|| io::Error::other("process exited before its id could be read"))
}

/// Join arguments into the single command line handed to a Windows child.
#[cfg(any(windows, test))]
pub fn command_line(args: &[String]) -> String {
    args.join(" ")
}

/// Turn a free-form argument string into launch arguments.
///
/// Windows keeps the string whole so it reaches the child verbatim. Unix
/// splits on whitespace; quoting is not interpreted.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    if cfg!(windows) {
        if arguments.is_empty() {
            Vec::new()
        } else {
            vec![arguments.to_string()]
        }
    } else {
        arguments.split_whitespace().map(str::to_string).collect()
    }
}

/// Whether a process table entry is the wanted process.
///
/// The executable's file name is checked too, since Linux cuts the reported
/// process name to 15 bytes.
pub fn process_matches(name: &OsStr, exe: Option<&Path>, wanted: &str) -> bool {
    name_matches(name, wanted)
        || exe
            .and_then(Path::file_name)
            .is_some_and(|file_name| name_matches(file_name, wanted))
}

/// Case-insensitive process name match that ignores a trailing `.exe`.
pub fn name_matches(candidate: &OsStr, wanted: &str) -> bool {
    let candidate = candidate.to_string_lossy();
    strip_exe(&candidate).eq_ignore_ascii_case(strip_exe(wanted))
}

fn strip_exe(name: &str) -> &str {
    let split = name.len().saturating_sub(4);
    match name.get(split..) {
        Some(ext) if split > 0 && ext.eq_ignore_ascii_case(".exe") => &name[..split],
        _ => name,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_joins_with_spaces() {
        let args = vec!["--connect".to_string(), "profile.ovpn".to_string()];
        assert_eq!(command_line(&args), "--connect profile.ovpn");
        assert_eq!(command_line(&[]), "");
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches(OsStr::new("OpenVPNConnect"), "OpenVPNConnect"));
        assert!(name_matches(OsStr::new("OpenVPNConnect.exe"), "OpenVPNConnect"));
        assert!(name_matches(OsStr::new("openvpnconnect.EXE"), "OpenVPNConnect"));
        assert!(name_matches(OsStr::new("openvpn"), "openvpn.exe"));
        assert!(!name_matches(OsStr::new("OpenVPNConnectHelper"), "OpenVPNConnect"));
        assert!(!name_matches(OsStr::new(".exe"), ""));
    }

    #[test]
    fn test_system_table_finds_nothing_for_unknown_name() {
        let mut table = SystemProcessTable::new();
        assert!(table.find_by_name("pulse-watchdog-no-such-process").is_empty());
    }

    #[tokio::test]
    async fn test_system_spawner_reports_missing_program() {
        let args = vec!["--flag".to_string()];
        assert!(SystemSpawner.spawn(Path::new("/nonexistent/pulse-watchdog-aux"), &args).is_err());
        assert!(SystemSpawner
            .spawn_low_priority(Path::new("/nonexistent/pulse-watchdog-aux"), &args)
            .is_err());
    }

    #[test]
    fn test_long_name_matches_executable_file_name() {
        // Linux reports only the first 15 bytes of the name.
        let short = OsStr::new("OpenVPNConnectS");
        let exe = Path::new("/opt/vpn/OpenVPNConnectService");

        assert!(process_matches(short, Some(exe), "OpenVPNConnectService"));
        assert!(process_matches(short, Some(Path::new("C:/vpn/OpenVPNConnectService.exe")), "OpenVPNConnectService"));
        assert!(!process_matches(short, None, "OpenVPNConnectService"));
        assert!(!process_matches(short, Some(Path::new("/opt/vpn/OpenVPNConnect")), "OpenVPNConnectService"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_spawner_keeps_argument_with_space_whole() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("argv");
        let args = vec![
            "-c".to_string(),
            "printf '%s|%s' \"$1\" \"$#\" > \"$2\"".to_string(),
            "sh".to_string(),
            "my profile.ovpn".to_string(),
            out.to_string_lossy().into_owned(),
        ];

        SystemSpawner.spawn(Path::new("/bin/sh"), &args).unwrap();

        let mut written = String::new();
        for _ in 0..100 {
            written = std::fs::read_to_string(&out).unwrap_or_default();
            if !written.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert_eq!(written, "my profile.ovpn|2");
    }

    #[cfg(unix)]
    #[test]
    fn test_split_arguments_on_whitespace() {
        assert_eq!(split_arguments("--refresh  now"), vec!["--refresh", "now"]);
        assert!(split_arguments("").is_empty());
    }

    #[cfg(windows)]
    #[test]
    fn test_split_arguments_keeps_string_whole() {
        assert_eq!(split_arguments("--profile \"my profile\""), vec!["--profile \"my profile\""]);
        assert!(split_arguments("").is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_system_table_lists_multithreaded_process_once() {
        use std::sync::mpsc;

        // Extra threads appear as /proc/<pid>/task entries and must not be
        // counted as separate instances.
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let stop_rx = std::sync::Arc::new(std::sync::Mutex::new(stop_rx));
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let stop_rx = stop_rx.clone();
                std::thread::spawn(move || {
                    let _ = stop_rx.lock().unwrap().recv();
                })
            })
            .collect();

        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_str().unwrap().to_string();
        let found = SystemProcessTable::new().find_by_name(&name);

        drop(stop_tx);
        for worker in workers {
            worker.join().unwrap();
        }

        let own = std::process::id();
        assert_eq!(found.iter().filter(|p| p.pid == own).count(), 1);
    }
}
