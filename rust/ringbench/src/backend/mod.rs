//! Locking disciplines guarding the ring.
//!
//! Both variants honor the same contract:
//!
//! - `begin_write` blocks until a slot is free and returns holding exclusive
//!   access plus the slot index to fill.
//! - `end_write` publishes that slot, wakes one reader, releases exclusion.
//! - `begin_read` / `end_read` mirror them for the consumer.
//!
//! Every `begin_*` that returns `Ok` must be followed by its `end_*` from the
//! same participant before any other ring operation.
//!
//! `interrupt` marks the ring aborted and wakes both sides. From then on
//! every `begin_*`, blocked or not, fails with [`SyncError::Aborted`].

mod condvar;
mod semaphore;

use std::fmt;
use std::mem::{align_of, size_of};

use ringbench_primitives::{Region, Sharing};

use crate::error::{SetupError, SyncError};
use crate::ring::Ring;

pub use condvar::{CondvarBackend, CondvarState};
pub use semaphore::{SemaphoreBackend, SemaphoreState};

/// The four-operation bounded-buffer contract.
pub trait SyncBackend {
    fn begin_write(&self) -> Result<usize, SyncError>;

    /// Like `begin_write`, but returns `None` instead of blocking.
    fn try_begin_write(&self) -> Result<Option<usize>, SyncError>;

    fn end_write(&self) -> Result<(), SyncError>;

    fn begin_read(&self) -> Result<usize, SyncError>;

    /// Like `begin_read`, but returns `None` instead of blocking.
    fn try_begin_read(&self) -> Result<Option<usize>, SyncError>;

    fn end_read(&self) -> Result<(), SyncError>;

    /// Abort the ring and release whoever is blocked in `begin_*`.
    fn interrupt(&self) -> Result<(), SyncError>;

    /// The ring this backend guards.
    fn ring(&self) -> &Ring;
}

/// Which backend a channel was created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
#[repr(u32)]
pub enum BackendKind {
    /// Binary semaphore plus "space" and "product" counting semaphores.
    Semaphore = 1,
    /// One mutex plus "space" and "product" condition variables.
    Condvar = 2,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Semaphore, BackendKind::Condvar];

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(BackendKind::Semaphore),
            2 => Some(BackendKind::Condvar),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Semaphore => "semaphore",
            BackendKind::Condvar => "condvar",
        }
    }

    /// Bytes the backend's shared state occupies.
    pub fn state_size(self) -> usize {
        match self {
            BackendKind::Semaphore => size_of::<SemaphoreState>(),
            BackendKind::Condvar => size_of::<CondvarState>(),
        }
    }

    pub fn state_align(self) -> usize {
        match self {
            BackendKind::Semaphore => align_of::<SemaphoreState>(),
            BackendKind::Condvar => align_of::<CondvarState>(),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend chosen at channel creation.
pub enum Backend {
    Semaphore(SemaphoreBackend),
    Condvar(CondvarBackend),
}

impl Backend {
    /// Initialize the backend state at `offset` and wrap `ring`.
    ///
    /// # Safety
    ///
    /// The state bytes must be unused and stay mapped while the backend lives.
    pub(crate) unsafe fn init(
        kind: BackendKind,
        region: Region,
        offset: usize,
        ring: Ring,
        sharing: Sharing,
    ) -> Result<Self, SetupError> {
        // SAFETY: forwarded to the caller.
        unsafe {
            Ok(match kind {
                BackendKind::Semaphore => Backend::Semaphore(SemaphoreBackend::init(
                    region.at(offset),
                    ring,
                    sharing,
                )?),
                BackendKind::Condvar => {
                    Backend::Condvar(CondvarBackend::init(region.at(offset), ring, sharing)?)
                }
            })
        }
    }

    /// View state another participant already initialized.
    ///
    /// # Safety
    ///
    /// The state at `offset` must have been initialized with the same `kind`.
    pub(crate) unsafe fn attach(
        kind: BackendKind,
        region: Region,
        offset: usize,
        ring: Ring,
    ) -> Self {
        // SAFETY: forwarded to the caller.
        unsafe {
            match kind {
                BackendKind::Semaphore => {
                    Backend::Semaphore(SemaphoreBackend::attach(region.at(offset), ring))
                }
                BackendKind::Condvar => {
                    Backend::Condvar(CondvarBackend::attach(region.at(offset), ring))
                }
            }
        }
    }

    /// Destroy every primitive, collecting failures.
    ///
    /// # Safety
    ///
    /// Both participants must be done with the backend; call at most once.
    pub(crate) unsafe fn destroy(&self, failures: &mut Vec<(&'static str, std::io::Error)>) {
        // SAFETY: forwarded to the caller.
        unsafe {
            match self {
                Backend::Semaphore(b) => b.destroy(failures),
                Backend::Condvar(b) => b.destroy(failures),
            }
        }
    }
}

impl SyncBackend for Backend {
    #[inline]
    fn begin_write(&self) -> Result<usize, SyncError> {
        match self {
            Backend::Semaphore(b) => b.begin_write(),
            Backend::Condvar(b) => b.begin_write(),
        }
    }

    #[inline]
    fn try_begin_write(&self) -> Result<Option<usize>, SyncError> {
        match self {
            Backend::Semaphore(b) => b.try_begin_write(),
            Backend::Condvar(b) => b.try_begin_write(),
        }
    }

    #[inline]
    fn end_write(&self) -> Result<(), SyncError> {
        match self {
            Backend::Semaphore(b) => b.end_write(),
            Backend::Condvar(b) => b.end_write(),
        }
    }

    #[inline]
    fn begin_read(&self) -> Result<usize, SyncError> {
        match self {
            Backend::Semaphore(b) => b.begin_read(),
            Backend::Condvar(b) => b.begin_read(),
        }
    }

    #[inline]
    fn try_begin_read(&self) -> Result<Option<usize>, SyncError> {
        match self {
            Backend::Semaphore(b) => b.try_begin_read(),
            Backend::Condvar(b) => b.try_begin_read(),
        }
    }

    #[inline]
    fn end_read(&self) -> Result<(), SyncError> {
        match self {
            Backend::Semaphore(b) => b.end_read(),
            Backend::Condvar(b) => b.end_read(),
        }
    }

    fn interrupt(&self) -> Result<(), SyncError> {
        match self {
            Backend::Semaphore(b) => b.interrupt(),
            Backend::Condvar(b) => b.interrupt(),
        }
    }

    #[inline]
    fn ring(&self) -> &Ring {
        match self {
            Backend::Semaphore(b) => b.ring(),
            Backend::Condvar(b) => b.ring(),
        }
    }
}

/// Record a failed destroy step.
pub(crate) fn note(
    failures: &mut Vec<(&'static str, std::io::Error)>,
    step: &'static str,
    result: std::io::Result<()>,
) {
    if let Err(e) = result {
        failures.push((step, e));
    }
}
