//! Child processes that do not outlive the benchmark driver, and liveness
//! checks on processes that are not our children.

use std::io;
use std::process::{Child, Command};

#[cfg(target_os = "linux")]
fn set_pdeathsig() -> io::Result<()> {
    // SAFETY: prctl(PR_SET_PDEATHSIG) is async-signal-safe.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Spawn `command` so that the kernel SIGKILLs it if this process dies
/// first. Outside Linux this is a plain spawn.
pub fn spawn_dying_with_parent(mut command: Command) -> io::Result<Child> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: the hook only calls prctl, which is async-signal-safe.
        unsafe { command.pre_exec(set_pdeathsig) };
    }
    command.spawn()
}

/// Block until child `pid` has exited without reaping it, so the pid stays
/// reserved until the caller waits on it for real.
pub fn wait_for_exit(pid: u32) -> io::Result<()> {
    let pid = libc::id_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    loop {
        let mut info = std::mem::MaybeUninit::<libc::siginfo_t>::zeroed();
        // SAFETY: `info` is a valid out-pointer for the duration of the call.
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid,
                info.as_mut_ptr(),
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

/// Whether a process with this pid is still around (possibly as a zombie).
///
/// A pid we may not signal still counts as alive.
pub fn process_exists(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}
