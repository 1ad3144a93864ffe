use std::ptr::NonNull;

use ringbench_primitives::{Semaphore, Sharing};

use super::{SyncBackend, note};
use crate::error::{SetupError, SyncError};
use crate::ring::Ring;

/// Shared state of the semaphore triad.
///
/// `space` starts at the ring capacity and `product` at zero, so capacity is
/// enforced by the counting semaphores alone; `mutex` only serializes cursor
/// updates.
#[repr(C)]
pub struct SemaphoreState {
    mutex: Semaphore,
    space: Semaphore,
    product: Semaphore,
}

pub struct SemaphoreBackend {
    state: NonNull<SemaphoreState>,
    ring: Ring,
}

// SAFETY: all shared mutation goes through the semaphores.
unsafe impl Send for SemaphoreBackend {}
unsafe impl Sync for SemaphoreBackend {}

impl SemaphoreBackend {
    /// # Safety
    ///
    /// `state` must be zeroed, unused memory that outlives the backend.
    pub(crate) unsafe fn init(
        state: NonNull<SemaphoreState>,
        ring: Ring,
        sharing: Sharing,
    ) -> Result<Self, SetupError> {
        // SAFETY: forwarded to the caller.
        let s = unsafe { state.as_ref() };
        let capacity = ring.capacity();
        let primitive = SetupError::primitive;

        // SAFETY: nobody else can see the state yet; each earlier semaphore is
        // destroyed again if a later one fails.
        unsafe {
            s.mutex
                .init(sharing, 1)
                .map_err(|e| primitive("exclusion semaphore", e))?;
            if let Err(e) = s.space.init(sharing, capacity) {
                let _ = s.mutex.destroy();
                return Err(primitive("space semaphore", e));
            }
            if let Err(e) = s.product.init(sharing, 0) {
                let _ = s.space.destroy();
                let _ = s.mutex.destroy();
                return Err(primitive("product semaphore", e));
            }
        }

        tracing::debug!(capacity, ?sharing, "semaphore backend initialized");
        Ok(Self { state, ring })
    }

    /// # Safety
    ///
    /// `state` must have been set up by [`SemaphoreBackend::init`].
    pub(crate) unsafe fn attach(state: NonNull<SemaphoreState>, ring: Ring) -> Self {
        Self { state, ring }
    }

    /// # Safety
    ///
    /// See [`Backend::destroy`](super::Backend::destroy).
    pub(crate) unsafe fn destroy(&self, failures: &mut Vec<(&'static str, std::io::Error)>) {
        let s = self.state();
        // SAFETY: forwarded to the caller.
        unsafe {
            note(failures, "destroy product semaphore", s.product.destroy());
            note(failures, "destroy space semaphore", s.space.destroy());
            note(failures, "destroy exclusion semaphore", s.mutex.destroy());
        }
    }

    #[inline]
    fn state(&self) -> &SemaphoreState {
        // SAFETY: see the constructors.
        unsafe { self.state.as_ref() }
    }

    /// After a successful wait on `gate`: fail if the ring was aborted,
    /// passing the wakeup on so later waits on `gate` fail too.
    #[inline]
    fn check_aborted(&self, gate: &Semaphore, op: &'static str) -> Result<(), SyncError> {
        if !self.ring.is_aborted() {
            return Ok(());
        }
        if let Err(error) = gate.post() {
            tracing::debug!(op, %error, "re-posting after abort failed");
        }
        Err(SyncError::aborted(op))
    }

    #[inline]
    fn enter(&self, op: &'static str) -> Result<(), SyncError> {
        self.state()
            .mutex
            .wait()
            .map_err(|e| SyncError::new(op, e))
    }

    #[inline]
    fn leave(&self, op: &'static str) -> Result<(), SyncError> {
        self.state()
            .mutex
            .post()
            .map_err(|e| SyncError::new(op, e))
    }
}

impl SyncBackend for SemaphoreBackend {
    fn begin_write(&self) -> Result<usize, SyncError> {
        let space = &self.state().space;
        space
            .wait()
            .map_err(|e| SyncError::new("begin_write: wait(space)", e))?;
        self.check_aborted(space, "begin_write")?;
        self.enter("begin_write: wait(mutex)")?;
        Ok(self.ring.slot_for_write())
    }

    fn try_begin_write(&self) -> Result<Option<usize>, SyncError> {
        if self.ring.is_aborted() {
            return Err(SyncError::aborted("try_begin_write"));
        }
        let got = self
            .state()
            .space
            .try_wait()
            .map_err(|e| SyncError::new("try_begin_write: trywait(space)", e))?;
        if !got {
            return Ok(None);
        }
        self.enter("try_begin_write: wait(mutex)")?;
        Ok(Some(self.ring.slot_for_write()))
    }

    fn end_write(&self) -> Result<(), SyncError> {
        self.ring.advance_write();
        self.leave("end_write: post(mutex)")?;
        self.state()
            .product
            .post()
            .map_err(|e| SyncError::new("end_write: post(product)", e))
    }

    fn begin_read(&self) -> Result<usize, SyncError> {
        let product = &self.state().product;
        product
            .wait()
            .map_err(|e| SyncError::new("begin_read: wait(product)", e))?;
        self.check_aborted(product, "begin_read")?;
        self.enter("begin_read: wait(mutex)")?;
        Ok(self.ring.slot_for_read())
    }

    fn try_begin_read(&self) -> Result<Option<usize>, SyncError> {
        if self.ring.is_aborted() {
            return Err(SyncError::aborted("try_begin_read"));
        }
        let got = self
            .state()
            .product
            .try_wait()
            .map_err(|e| SyncError::new("try_begin_read: trywait(product)", e))?;
        if !got {
            return Ok(None);
        }
        self.enter("try_begin_read: wait(mutex)")?;
        Ok(Some(self.ring.slot_for_read()))
    }

    fn end_read(&self) -> Result<(), SyncError> {
        self.ring.advance_read();
        self.leave("end_read: post(mutex)")?;
        self.state()
            .space
            .post()
            .map_err(|e| SyncError::new("end_read: post(space)", e))
    }

    fn interrupt(&self) -> Result<(), SyncError> {
        self.ring.abort();
        let s = self.state();
        let space = s
            .space
            .post()
            .map_err(|e| SyncError::new("interrupt: post(space)", e));
        let product = s
            .product
            .post()
            .map_err(|e| SyncError::new("interrupt: post(product)", e));
        space.and(product)
    }

    #[inline]
    fn ring(&self) -> &Ring {
        &self.ring
    }
}
