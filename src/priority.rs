//! Below-normal scheduling priority for launched helpers.
//!
//! Unix lowers the nice value inside the forked child before `exec`, so the
//! watchdog itself is never touched. Windows children inherit the parent's
//! priority class, so the parent is lowered for the launch and restored by
//! [`PriorityGuard`].

#[cfg(unix)]
pub use unix::lower_in_child;
#[cfg(windows)]
pub use windows::PriorityGuard;

#[cfg(unix)]
mod unix {
    const BELOW_NORMAL_NICE: libc::c_int = 10;

    /// Make the child raise its nice value to at least 10 before it execs.
    ///
    /// Errors are ignored: a helper that cannot be lowered still runs.
    pub fn lower_in_child(command: &mut tokio::process::Command) {
        // SAFETY: the hook only calls getpriority and setpriority, which are
        // async-signal-safe, and allocates nothing.
        unsafe {
            command.pre_exec(|| {
                let current = libc::getpriority(libc::PRIO_PROCESS, 0);
                if current < BELOW_NORMAL_NICE {
                    libc::setpriority(libc::PRIO_PROCESS, 0, BELOW_NORMAL_NICE);
                }
                Ok(())
            });
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::io;
    use tracing::warn;
    use windows_sys::Win32::System::Threading::{
        GetCurrentProcess, GetPriorityClass, SetPriorityClass, BELOW_NORMAL_PRIORITY_CLASS,
    };

    /// Drops the process to the below-normal class and restores the original
    /// class when dropped, whichever way the guarded scope exits.
    pub struct PriorityGuard {
        original: u32,
    }

    impl PriorityGuard {
        pub fn lower() -> io::Result<Self> {
            let original = current()?;
            set(BELOW_NORMAL_PRIORITY_CLASS)?;
            Ok(Self { original })
        }
    }

    impl Drop for PriorityGuard {
        fn drop(&mut self) {
            if let Err(e) = set(self.original) {
                warn!("Failed to restore process priority: {}", e);
            }
        }
    }

    pub(super) fn current() -> io::Result<u32> {
        let class = unsafe { GetPriorityClass(GetCurrentProcess()) };
        if class == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(class)
    }

    fn set(class: u32) -> io::Result<()> {
        if unsafe { SetPriorityClass(GetCurrentProcess(), class) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
