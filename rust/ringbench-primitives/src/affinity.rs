//! CPU pinning for benchmark participants.

use std::io;

/// Bind the calling thread to logical core `core`.
///
/// Pinning only narrows timing variance; callers are expected to log a
/// failure and carry on.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    let max = libc::CPU_SETSIZE as usize;
    if core >= max {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} exceeds CPU_SETSIZE ({max})"),
        ));
    }

    // SAFETY: an all-zero cpu_set_t is the empty set; CPU_SET stays in bounds
    // per the check above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread pinning is only implemented on Linux",
    ))
}
