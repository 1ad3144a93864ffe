#![doc = include_str!("../README.md")]
#![cfg(unix)]

pub mod affinity;
pub mod pthread;
pub mod region;
pub mod segment;
pub mod semaphore;
pub mod spawn;

pub use affinity::pin_current_thread;
pub use pthread::{Condvar, Mutex};
pub use region::{HeapRegion, Region};
pub use segment::{SharedSegment, default_segment_dir};
pub use semaphore::Semaphore;
pub use spawn::{process_exists, spawn_dying_with_parent, wait_for_exit};

/// Who may touch a primitive once it is initialized.
///
/// Primitives that live in a [`SharedSegment`] must be process-shared; the
/// ones inside a [`HeapRegion`] are only ever seen by threads of one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sharing {
    /// Visible to threads of the creating process only.
    Thread,
    /// Visible to every process that maps the same memory.
    Process,
}

impl Sharing {
    /// The `pshared` argument for `sem_init`.
    #[inline]
    pub fn sem_pshared(self) -> libc::c_int {
        match self {
            Sharing::Thread => 0,
            Sharing::Process => 1,
        }
    }

    /// The attribute value for `pthread_*attr_setpshared`.
    #[inline]
    pub fn pthread_pshared(self) -> libc::c_int {
        match self {
            Sharing::Thread => libc::PTHREAD_PROCESS_PRIVATE,
            Sharing::Process => libc::PTHREAD_PROCESS_SHARED,
        }
    }
}
