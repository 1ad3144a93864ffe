//! Error taxonomy: setup, synchronization, teardown, plus the run-level
//! umbrella the binary turns into an exit code.

use std::fmt;
use std::io;
use std::process::ExitStatus;

use crate::harness::Role;

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroCapacity,
    ZeroMessageLen,
    ZeroRuns,
    /// capacity × message length does not fit in the address space.
    LayoutOverflow { capacity: u32, message_len: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroCapacity => write!(f, "buffer capacity must be at least 1"),
            ConfigError::ZeroMessageLen => write!(f, "message length must be at least 1 byte"),
            ConfigError::ZeroRuns => write!(f, "run count must be at least 1"),
            ConfigError::LayoutOverflow {
                capacity,
                message_len,
            } => write!(
                f,
                "{capacity} slots of {message_len} bytes do not fit in one region"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure before any timing is taken.
#[derive(Debug)]
pub enum SetupError {
    Config(ConfigError),
    /// Creating, sizing, mapping or opening the shared segment failed.
    Segment(io::Error),
    /// A semaphore, mutex or condition variable failed to initialize.
    Primitive {
        what: &'static str,
        source: io::Error,
    },
    /// The segment exists but its creator has not published a channel yet.
    NotPublished,
    /// The segment was published by a process that no longer exists.
    CreatorGone(u32),
    /// The attached segment does not hold a channel we understand.
    BadHeader(&'static str),
    /// A participant thread or process could not be started.
    Spawn(io::Error),
}

impl SetupError {
    pub(crate) fn primitive(what: &'static str, source: io::Error) -> Self {
        SetupError::Primitive { what, source }
    }
}

impl From<ConfigError> for SetupError {
    fn from(e: ConfigError) -> Self {
        SetupError::Config(e)
    }
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(e) => write!(f, "invalid configuration: {e}"),
            SetupError::Segment(e) => write!(f, "shared segment: {e}"),
            SetupError::Primitive { what, source } => {
                write!(f, "initializing {what} failed: {source}")
            }
            SetupError::NotPublished => write!(f, "no channel published in segment yet"),
            SetupError::CreatorGone(pid) => {
                write!(f, "segment left behind by exited process {pid}")
            }
            SetupError::BadHeader(msg) => write!(f, "bad channel header: {msg}"),
            SetupError::Spawn(e) => write!(f, "spawning participant failed: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Config(e) => Some(e),
            SetupError::Segment(e) | SetupError::Spawn(e) => Some(e),
            SetupError::Primitive { source, .. } => Some(source),
            SetupError::NotPublished | SetupError::CreatorGone(_) | SetupError::BadHeader(_) => {
                None
            }
        }
    }
}

/// A ring or signal operation failed mid-run.
#[derive(Debug)]
pub enum SyncError {
    /// A wait, post, lock or signal reported an OS error.
    Os { op: &'static str, source: io::Error },
    /// The run was aborted while `op` was blocked or about to block.
    Aborted { op: &'static str },
}

impl SyncError {
    pub(crate) fn new(op: &'static str, source: io::Error) -> Self {
        SyncError::Os { op, source }
    }

    pub(crate) fn aborted(op: &'static str) -> Self {
        SyncError::Aborted { op }
    }

    /// Whether this is fallout from somebody else's abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, SyncError::Aborted { .. })
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Os { op, source } => write!(f, "{op} failed: {source}"),
            SyncError::Aborted { op } => write!(f, "{op}: run aborted"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Os { source, .. } => Some(source),
            SyncError::Aborted { .. } => None,
        }
    }
}

/// Every step of teardown that failed. Never empty.
#[derive(Debug)]
pub struct TeardownError {
    pub failures: Vec<(&'static str, io::Error)>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown failed:")?;
        for (step, error) in &self.failures {
            write!(f, " [{step}: {error}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

/// Why a benchmark run did not succeed.
#[derive(Debug)]
pub enum BenchError {
    Setup(SetupError),
    Sync(SyncError),
    /// A participant hit a fatal error and raised the abort flag.
    Aborted,
    /// A participant thread panicked.
    Panicked(Role),
    /// The consumer process exited unsuccessfully.
    ConsumerExited(ExitStatus),
    /// The consumer drained fewer messages than were produced.
    ShortCount { expected: u64, consumed: u64 },
    /// The last consumed payload did not fold to the template's checksum.
    ChecksumMismatch { expected: u64, actual: u64 },
    Teardown(TeardownError),
}

impl From<SetupError> for BenchError {
    fn from(e: SetupError) -> Self {
        BenchError::Setup(e)
    }
}

impl From<ConfigError> for BenchError {
    fn from(e: ConfigError) -> Self {
        BenchError::Setup(SetupError::Config(e))
    }
}

impl From<SyncError> for BenchError {
    fn from(e: SyncError) -> Self {
        if e.is_abort() {
            BenchError::Aborted
        } else {
            BenchError::Sync(e)
        }
    }
}

impl From<TeardownError> for BenchError {
    fn from(e: TeardownError) -> Self {
        BenchError::Teardown(e)
    }
}

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchError::Setup(e) => write!(f, "setup: {e}"),
            BenchError::Sync(e) => write!(f, "synchronization: {e}"),
            BenchError::Aborted => write!(f, "a participant aborted the run"),
            BenchError::Panicked(role) => write!(f, "{role} thread panicked"),
            BenchError::ConsumerExited(status) => write!(f, "consumer process {status}"),
            BenchError::ShortCount { expected, consumed } => {
                write!(f, "consumer drained {consumed} of {expected} messages")
            }
            BenchError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            BenchError::Teardown(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BenchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BenchError::Setup(e) => Some(e),
            BenchError::Sync(e) => Some(e),
            BenchError::Teardown(e) => Some(e),
            _ => None,
        }
    }
}
