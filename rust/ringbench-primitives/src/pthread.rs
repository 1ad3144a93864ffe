//! pthread mutexes and condition variables stored inline in a region.
//!
//! pthread calls report failure through their return value rather than
//! `errno`, hence [`check`].

use std::cell::UnsafeCell;
use std::io;
use std::mem::MaybeUninit;

use crate::Sharing;

#[inline]
fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// A `pthread_mutex_t` placed in a region.
#[repr(C)]
pub struct Mutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    /// Initialize in place with the given sharing mode.
    ///
    /// # Safety
    ///
    /// No one may use the mutex until this returns, and it must not already
    /// be initialized.
    pub unsafe fn init(&self, sharing: Sharing) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        // SAFETY: attr is initialized by pthread_mutexattr_init before any
        // other use and destroyed before returning.
        unsafe {
            check(libc::pthread_mutexattr_init(attr.as_mut_ptr()))?;
            let result = check(libc::pthread_mutexattr_setpshared(
                attr.as_mut_ptr(),
                sharing.pthread_pshared(),
            ))
            .and_then(|()| check(libc::pthread_mutex_init(self.raw.get(), attr.as_ptr())));
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    pub fn lock(&self) -> io::Result<()> {
        // SAFETY: initialized per the contract of `init`.
        check(unsafe { libc::pthread_mutex_lock(self.raw.get()) })
    }

    pub fn unlock(&self) -> io::Result<()> {
        // SAFETY: initialized per the contract of `init`.
        check(unsafe { libc::pthread_mutex_unlock(self.raw.get()) })
    }

    /// # Safety
    ///
    /// The mutex must be unlocked, unused from now on, and destroyed once.
    pub unsafe fn destroy(&self) -> io::Result<()> {
        // SAFETY: forwarded to the caller.
        check(unsafe { libc::pthread_mutex_destroy(self.raw.get()) })
    }

    fn as_raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }
}

/// A `pthread_cond_t` placed in a region.
#[repr(C)]
pub struct Condvar {
    raw: UnsafeCell<libc::pthread_cond_t>,
}

unsafe impl Send for Condvar {}
unsafe impl Sync for Condvar {}

impl Condvar {
    /// Initialize in place with the given sharing mode.
    ///
    /// # Safety
    ///
    /// Same as [`Mutex::init`].
    pub unsafe fn init(&self, sharing: Sharing) -> io::Result<()> {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        // SAFETY: see Mutex::init.
        unsafe {
            check(libc::pthread_condattr_init(attr.as_mut_ptr()))?;
            let result = check(libc::pthread_condattr_setpshared(
                attr.as_mut_ptr(),
                sharing.pthread_pshared(),
            ))
            .and_then(|()| check(libc::pthread_cond_init(self.raw.get(), attr.as_ptr())));
            libc::pthread_condattr_destroy(attr.as_mut_ptr());
            result
        }
    }

    /// Atomically release `mutex` and sleep until signalled.
    ///
    /// The caller must hold `mutex`; it is held again on return, including on
    /// error. Wakeups may be spurious: always wait in a predicate loop.
    pub fn wait(&self, mutex: &Mutex) -> io::Result<()> {
        // SAFETY: both initialized; the caller holds the mutex.
        check(unsafe { libc::pthread_cond_wait(self.raw.get(), mutex.as_raw()) })
    }

    /// Wake at most one waiter.
    pub fn signal(&self) -> io::Result<()> {
        // SAFETY: initialized per the contract of `init`.
        check(unsafe { libc::pthread_cond_signal(self.raw.get()) })
    }

    /// Wake every waiter.
    pub fn broadcast(&self) -> io::Result<()> {
        // SAFETY: initialized per the contract of `init`.
        check(unsafe { libc::pthread_cond_broadcast(self.raw.get()) })
    }

    /// # Safety
    ///
    /// No thread may be waiting, and the condvar must be destroyed once.
    pub unsafe fn destroy(&self) -> io::Result<()> {
        // SAFETY: forwarded to the caller.
        check(unsafe { libc::pthread_cond_destroy(self.raw.get()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeapRegion;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[repr(C)]
    struct Pair {
        mutex: Mutex,
        cond: Condvar,
    }

    fn pair(heap: &HeapRegion) -> &Pair {
        unsafe { heap.region().at::<Pair>(0).as_ref() }
    }

    #[test]
    fn signal_wakes_predicate_waiter() {
        let heap = Arc::new(HeapRegion::zeroed(std::mem::size_of::<Pair>()));
        unsafe {
            pair(&heap).mutex.init(Sharing::Process).unwrap();
            pair(&heap).cond.init(Sharing::Process).unwrap();
        }
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let heap = heap.clone();
            let flag = flag.clone();
            thread::spawn(move || {
                let p = pair(&heap);
                p.mutex.lock().unwrap();
                while !flag.load(Ordering::Relaxed) {
                    p.cond.wait(&p.mutex).unwrap();
                }
                p.mutex.unlock().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(20));
        let p = pair(&heap);
        p.mutex.lock().unwrap();
        flag.store(true, Ordering::Relaxed);
        p.cond.signal().unwrap();
        p.mutex.unlock().unwrap();
        waiter.join().unwrap();

        unsafe {
            p.cond.destroy().unwrap();
            p.mutex.destroy().unwrap();
        }
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        let heap = HeapRegion::zeroed(std::mem::size_of::<Pair>());
        let p = pair(&heap);
        unsafe {
            p.mutex.init(Sharing::Thread).unwrap();
            p.cond.init(Sharing::Thread).unwrap();
        }
        let flag = AtomicBool::new(false);

        thread::scope(|s| {
            let waiters: Vec<_> = (0..3)
                .map(|_| {
                    s.spawn(|| {
                        p.mutex.lock().unwrap();
                        while !flag.load(Ordering::Relaxed) {
                            p.cond.wait(&p.mutex).unwrap();
                        }
                        p.mutex.unlock().unwrap();
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(20));
            p.mutex.lock().unwrap();
            flag.store(true, Ordering::Relaxed);
            p.cond.broadcast().unwrap();
            p.mutex.unlock().unwrap();
            for waiter in waiters {
                waiter.join().unwrap();
            }
        });

        unsafe {
            p.cond.destroy().unwrap();
            p.mutex.destroy().unwrap();
        }
    }
}
