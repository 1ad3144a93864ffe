//! Unnamed POSIX semaphores stored inline in a region.

use std::cell::UnsafeCell;
use std::io;

use crate::Sharing;

/// A `sem_t` that lives wherever its region puts it.
///
/// The value is zero bytes until [`init`](Self::init) runs, which matches a
/// freshly created region. It must never move after initialization.
#[repr(C)]
pub struct Semaphore {
    raw: UnsafeCell<libc::sem_t>,
}

// SAFETY: sem_t is designed to be operated on concurrently.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Initialize the semaphore in place with `value` permits.
    ///
    /// # Safety
    ///
    /// No other thread or process may use the semaphore until this returns,
    /// and it must not already be initialized.
    pub unsafe fn init(&self, sharing: Sharing, value: u32) -> io::Result<()> {
        // SAFETY: the pointer is valid for the lifetime of &self.
        let rc = unsafe { libc::sem_init(self.raw.get(), sharing.sem_pshared(), value) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Take one permit, blocking without timeout. `EINTR` is retried.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: initialized per the contract of `init`.
            if unsafe { libc::sem_wait(self.raw.get()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Take one permit if one is available right now.
    pub fn try_wait(&self) -> io::Result<bool> {
        loop {
            // SAFETY: initialized per the contract of `init`.
            if unsafe { libc::sem_trywait(self.raw.get()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(false),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
    }

    /// Release one permit, waking one waiter if any.
    pub fn post(&self) -> io::Result<()> {
        // SAFETY: initialized per the contract of `init`.
        if unsafe { libc::sem_post(self.raw.get()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Current permit count (diagnostics only, racy by nature).
    pub fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;
        // SAFETY: initialized per the contract of `init`.
        if unsafe { libc::sem_getvalue(self.raw.get(), &mut value) } == 0 {
            Ok(value)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Destroy the semaphore.
    ///
    /// # Safety
    ///
    /// Nobody may be blocked on or use the semaphore afterwards, and it must
    /// be destroyed exactly once.
    pub unsafe fn destroy(&self) -> io::Result<()> {
        // SAFETY: forwarded to the caller.
        if unsafe { libc::sem_destroy(self.raw.get()) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::HeapRegion;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn heap_semaphore(heap: &HeapRegion) -> &Semaphore {
        unsafe { heap.region().at::<Semaphore>(0).as_ref() }
    }

    #[test]
    fn counts_permits() {
        let heap = HeapRegion::zeroed(64);
        let sem = heap_semaphore(&heap);
        unsafe { sem.init(Sharing::Thread, 2).unwrap() };

        assert!(sem.try_wait().unwrap());
        assert!(sem.try_wait().unwrap());
        assert!(!sem.try_wait().unwrap());

        sem.post().unwrap();
        assert_eq!(sem.value().unwrap(), 1);
        sem.wait().unwrap();
        assert_eq!(sem.value().unwrap(), 0);

        unsafe { sem.destroy().unwrap() };
    }

    #[test]
    fn post_wakes_blocked_waiter() {
        let heap = Arc::new(HeapRegion::zeroed(64));
        unsafe { heap_semaphore(&heap).init(Sharing::Process, 0).unwrap() };

        let waiter_heap = heap.clone();
        let waiter = thread::spawn(move || heap_semaphore(&waiter_heap).wait());

        thread::sleep(Duration::from_millis(20));
        heap_semaphore(&heap).post().unwrap();
        waiter.join().unwrap().unwrap();

        unsafe { heap_semaphore(&heap).destroy().unwrap() };
    }
}
