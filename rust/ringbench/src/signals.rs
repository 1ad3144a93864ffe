//! Semaphores and counters the participants use outside the ring itself.

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64};

use ringbench_primitives::{Semaphore, Sharing};

use crate::backend::note;
use crate::error::SetupError;

#[repr(C)]
pub struct SignalBlock {
    /// One post per participant that finished setup.
    pub(crate) ready: Semaphore,
    /// Posted once per participant by the driver to start the timed phase.
    pub(crate) start_gun: Semaphore,
    /// Posted by the consumer after its last read, or by whoever aborts.
    pub(crate) complete: Semaphore,
    /// Set by the consumer right before it posts `complete`.
    pub(crate) finished: AtomicU32,
    pub(crate) consumed: AtomicU64,
    pub(crate) checksum: AtomicU64,
}

impl SignalBlock {
    /// # Safety
    ///
    /// The block must be zeroed and not yet visible to another participant.
    pub(crate) unsafe fn init(&self, sharing: Sharing) -> Result<(), SetupError> {
        // SAFETY: forwarded to the caller; on failure every semaphore already
        // initialized is destroyed again.
        unsafe {
            self.ready
                .init(sharing, 0)
                .map_err(|e| SetupError::primitive("ready semaphore", e))?;
            if let Err(e) = self.start_gun.init(sharing, 0) {
                let _ = self.ready.destroy();
                return Err(SetupError::primitive("start-gun semaphore", e));
            }
            if let Err(e) = self.complete.init(sharing, 0) {
                let _ = self.start_gun.destroy();
                let _ = self.ready.destroy();
                return Err(SetupError::primitive("completion semaphore", e));
            }
        }
        Ok(())
    }

    /// # Safety
    ///
    /// Nobody may wait on or post any of the semaphores afterwards.
    pub(crate) unsafe fn destroy(&self, failures: &mut Vec<(&'static str, io::Error)>) {
        // SAFETY: forwarded to the caller.
        unsafe {
            note(failures, "destroy completion semaphore", self.complete.destroy());
            note(failures, "destroy start-gun semaphore", self.start_gun.destroy());
            note(failures, "destroy ready semaphore", self.ready.destroy());
        }
    }
}
