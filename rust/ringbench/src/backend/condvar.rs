use std::ptr::NonNull;

use ringbench_primitives::{Condvar, Mutex, Sharing};

use super::{SyncBackend, note};
use crate::error::{SetupError, SyncError};
use crate::ring::Ring;

/// Shared state of the mutex + condition variable pair.
#[repr(C)]
pub struct CondvarState {
    mutex: Mutex,
    /// Signalled when a slot is freed.
    space: Condvar,
    /// Signalled when a slot is filled.
    product: Condvar,
}

pub struct CondvarBackend {
    state: NonNull<CondvarState>,
    ring: Ring,
}

// SAFETY: the ring is only touched with `mutex` held.
unsafe impl Send for CondvarBackend {}
unsafe impl Sync for CondvarBackend {}

impl CondvarBackend {
    /// # Safety
    ///
    /// `state` must be zeroed, unused memory that outlives the backend.
    pub(crate) unsafe fn init(
        state: NonNull<CondvarState>,
        ring: Ring,
        sharing: Sharing,
    ) -> Result<Self, SetupError> {
        // SAFETY: forwarded to the caller.
        let s = unsafe { state.as_ref() };

        // SAFETY: nobody else can see the state yet.
        unsafe {
            s.mutex
                .init(sharing)
                .map_err(|e| SetupError::primitive("ring mutex", e))?;
            if let Err(e) = s.space.init(sharing) {
                let _ = s.mutex.destroy();
                return Err(SetupError::primitive("space condition variable", e));
            }
            if let Err(e) = s.product.init(sharing) {
                let _ = s.space.destroy();
                let _ = s.mutex.destroy();
                return Err(SetupError::primitive("product condition variable", e));
            }
        }

        tracing::debug!(capacity = ring.capacity(), ?sharing, "condvar backend initialized");
        Ok(Self { state, ring })
    }

    /// # Safety
    ///
    /// `state` must have been set up by [`CondvarBackend::init`].
    pub(crate) unsafe fn attach(state: NonNull<CondvarState>, ring: Ring) -> Self {
        Self { state, ring }
    }

    /// # Safety
    ///
    /// See [`Backend::destroy`](super::Backend::destroy).
    pub(crate) unsafe fn destroy(&self, failures: &mut Vec<(&'static str, std::io::Error)>) {
        let s = self.state();
        // SAFETY: forwarded to the caller.
        unsafe {
            note(failures, "destroy product condition variable", s.product.destroy());
            note(failures, "destroy space condition variable", s.space.destroy());
            note(failures, "destroy ring mutex", s.mutex.destroy());
        }
    }

    #[inline]
    fn state(&self) -> &CondvarState {
        // SAFETY: see the constructors.
        unsafe { self.state.as_ref() }
    }

    /// Lock, then sleep on `cond` while `blocked` holds and the ring is live.
    ///
    /// Returns with the mutex held. On any error, abort included, the mutex
    /// is released before the error is returned.
    fn lock_until(
        &self,
        cond: &Condvar,
        blocked: impl Fn(&Ring) -> bool,
        lock_op: &'static str,
        wait_op: &'static str,
    ) -> Result<(), SyncError> {
        let s = self.state();
        s.mutex.lock().map_err(|e| SyncError::new(lock_op, e))?;
        while !self.ring.is_aborted() && blocked(&self.ring) {
            if let Err(e) = cond.wait(&s.mutex) {
                let _ = s.mutex.unlock();
                return Err(SyncError::new(wait_op, e));
            }
        }
        self.unlock_if_aborted(wait_op)
    }

    /// Lock and check `blocked` once. `false` means the lock was dropped again.
    fn lock_if_ready(
        &self,
        blocked: impl Fn(&Ring) -> bool,
        lock_op: &'static str,
        unlock_op: &'static str,
    ) -> Result<bool, SyncError> {
        let s = self.state();
        s.mutex.lock().map_err(|e| SyncError::new(lock_op, e))?;
        self.unlock_if_aborted(lock_op)?;
        if blocked(&self.ring) {
            s.mutex.unlock().map_err(|e| SyncError::new(unlock_op, e))?;
            return Ok(false);
        }
        Ok(true)
    }

    /// With the mutex held: drop it and fail if the ring was aborted.
    fn unlock_if_aborted(&self, op: &'static str) -> Result<(), SyncError> {
        if !self.ring.is_aborted() {
            return Ok(());
        }
        let _ = self.state().mutex.unlock();
        Err(SyncError::aborted(op))
    }

    /// Signal `cond`, then unlock. The mutex is released even if signalling fails.
    fn signal_and_unlock(
        &self,
        cond: &Condvar,
        signal_op: &'static str,
        unlock_op: &'static str,
    ) -> Result<(), SyncError> {
        let s = self.state();
        if let Err(e) = cond.signal() {
            let _ = s.mutex.unlock();
            return Err(SyncError::new(signal_op, e));
        }
        s.mutex.unlock().map_err(|e| SyncError::new(unlock_op, e))
    }
}

impl SyncBackend for CondvarBackend {
    fn begin_write(&self) -> Result<usize, SyncError> {
        self.lock_until(
            &self.state().space,
            Ring::is_full,
            "begin_write: lock",
            "begin_write: wait(space)",
        )?;
        Ok(self.ring.slot_for_write())
    }

    fn try_begin_write(&self) -> Result<Option<usize>, SyncError> {
        let ready = self.lock_if_ready(
            Ring::is_full,
            "try_begin_write: lock",
            "try_begin_write: unlock",
        )?;
        Ok(ready.then(|| self.ring.slot_for_write()))
    }

    fn end_write(&self) -> Result<(), SyncError> {
        self.ring.advance_write();
        self.signal_and_unlock(
            &self.state().product,
            "end_write: signal(product)",
            "end_write: unlock",
        )
    }

    fn begin_read(&self) -> Result<usize, SyncError> {
        self.lock_until(
            &self.state().product,
            Ring::is_empty,
            "begin_read: lock",
            "begin_read: wait(product)",
        )?;
        Ok(self.ring.slot_for_read())
    }

    fn try_begin_read(&self) -> Result<Option<usize>, SyncError> {
        let ready = self.lock_if_ready(
            Ring::is_empty,
            "try_begin_read: lock",
            "try_begin_read: unlock",
        )?;
        Ok(ready.then(|| self.ring.slot_for_read()))
    }

    fn end_read(&self) -> Result<(), SyncError> {
        self.ring.advance_read();
        self.signal_and_unlock(
            &self.state().space,
            "end_read: signal(space)",
            "end_read: unlock",
        )
    }

    fn interrupt(&self) -> Result<(), SyncError> {
        let s = self.state();
        // Flag under the lock, so a waiter cannot test it and then miss the
        // broadcast.
        s.mutex
            .lock()
            .map_err(|e| SyncError::new("interrupt: lock", e))?;
        self.ring.abort();
        let space = s.space.broadcast();
        let product = s.product.broadcast();
        let unlocked = s.mutex.unlock();

        space.map_err(|e| SyncError::new("interrupt: broadcast(space)", e))?;
        product.map_err(|e| SyncError::new("interrupt: broadcast(product)", e))?;
        unlocked.map_err(|e| SyncError::new("interrupt: unlock", e))
    }

    #[inline]
    fn ring(&self) -> &Ring {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingHeader;
    use ringbench_primitives::HeapRegion;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn blocked_writer_resumes_after_a_read() {
        let heap = HeapRegion::zeroed(512);
        let region = heap.region();
        let ring = unsafe { Ring::init(region.at::<RingHeader>(256), 1) };
        let backend = unsafe { CondvarBackend::init(region.at(0), ring, Sharing::Thread).unwrap() };

        backend.begin_write().unwrap();
        backend.end_write().unwrap();

        thread::scope(|s| {
            let writer = s.spawn(|| {
                let idx = backend.begin_write().unwrap();
                backend.end_write().unwrap();
                idx
            });
            thread::sleep(Duration::from_millis(20));
            assert!(!writer.is_finished());
            assert!(backend.ring().is_full());

            backend.begin_read().unwrap();
            backend.end_read().unwrap();
            assert_eq!(writer.join().unwrap(), 0);
        });
        assert_eq!(backend.ring().ready_count(), 1);

        let mut failures = Vec::new();
        unsafe { backend.destroy(&mut failures) };
        assert!(failures.is_empty());
    }
}
