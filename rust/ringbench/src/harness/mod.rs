//! Participant loops and the drivers that time them.

mod process;
mod thread;

use std::fmt;
use std::process::ExitStatus;
use std::time::Instant;

use ringbench_primitives::pin_current_thread;

use crate::channel::{Channel, ChannelSpec};
use crate::completion::CompletionRecord;
use crate::error::{BenchError, SyncError, TeardownError};
use crate::timing::{Report, TimingMarks};
use crate::workload::{Validator, Workload};

pub use process::{ConsumerLaunch, run_consumer_process, run_process_driver};
pub use thread::run_threads;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        })
    }
}

/// Everything one run needs besides the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub channel: ChannelSpec,
    pub producer_core: Option<usize>,
    pub consumer_core: Option<usize>,
}

/// How one participant's loop went.
#[derive(Debug, Clone, Copy)]
pub struct LoopOutcome {
    pub role: Role,
    pub completed: u64,
    /// Taken right before the first `begin_*`; `None` for an empty run.
    pub first_op_at: Option<Instant>,
}

/// A run that reached the completion signal without an abort.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Report,
    pub marks: TimingMarks,
    pub record: CompletionRecord,
    pub expected_count: u64,
    pub expected_checksum: u64,
    /// Present for thread runs, and for the producer in process runs.
    pub producer: Option<LoopOutcome>,
    /// Present for thread runs only.
    pub consumer: Option<LoopOutcome>,
    /// Exit status of a consumer process this driver spawned.
    pub consumer_status: Option<ExitStatus>,
    pub teardown: Option<TeardownError>,
}

impl RunOutcome {
    /// Checks that only make sense once the timing line is out.
    pub fn verify(self) -> Result<(), BenchError> {
        if let Some(status) = self.consumer_status
            && !status.success()
        {
            return Err(BenchError::ConsumerExited(status));
        }
        if self.record.consumed != self.expected_count {
            return Err(BenchError::ShortCount {
                expected: self.expected_count,
                consumed: self.record.consumed,
            });
        }
        if self.expected_count > 0 && self.record.checksum != self.expected_checksum {
            return Err(BenchError::ChecksumMismatch {
                expected: self.expected_checksum,
                actual: self.record.checksum,
            });
        }
        match self.teardown {
            Some(e) => Err(BenchError::Teardown(e)),
            None => Ok(()),
        }
    }
}

/// Pin the calling thread if a core was requested. Failures only warn.
pub(crate) fn pin(role: Role, core: Option<usize>) {
    let Some(core) = core else { return };
    match pin_current_thread(core) {
        Ok(()) => tracing::debug!(%role, core, "pinned"),
        Err(error) => tracing::warn!(%role, core, %error, "pinning failed, continuing unpinned"),
    }
}

/// The producer's timed loop: `iterations` template copies.
pub fn produce_loop(channel: &Channel, workload: &Workload) -> Result<LoopOutcome, SyncError> {
    let iterations = channel.spec().iterations;
    let first_op_at = (iterations > 0).then(Instant::now);
    for _ in 0..iterations {
        channel.produce_with(|slot| workload.fill(slot))?;
    }
    Ok(LoopOutcome {
        role: Role::Producer,
        completed: iterations,
        first_op_at,
    })
}

/// The consumer's timed loop. Publishes the validator summary on success.
pub fn consume_loop(channel: &Channel) -> Result<LoopOutcome, SyncError> {
    let iterations = channel.spec().iterations;
    let mut validator = Validator::default();
    let first_op_at = (iterations > 0).then(Instant::now);
    for _ in 0..iterations {
        channel.consume_with(|payload| validator.record(payload))?;
    }
    channel.completion().finish(validator.summary())?;
    Ok(LoopOutcome {
        role: Role::Consumer,
        completed: iterations,
        first_op_at,
    })
}

/// Full participant lifecycle: pin, rendezvous, then `body`. A failure or a
/// panic raises the abort flag so neither the peer nor the driver is left
/// waiting.
pub fn participate(
    channel: &Channel,
    role: Role,
    core: Option<usize>,
    body: impl FnOnce(&Channel) -> Result<LoopOutcome, SyncError>,
) -> Result<LoopOutcome, SyncError> {
    let _guard = AbortOnPanic { channel, role };
    pin(role, core);
    let result = channel.rendezvous().arrive().and_then(|()| body(channel));
    match &result {
        Err(error) if error.is_abort() => {
            tracing::debug!(%role, "stopped by abort");
            channel.completion().abort();
        }
        Err(error) => {
            tracing::error!(%role, %error, "participant failed, aborting run");
            channel.completion().abort();
        }
        Ok(_) => {}
    }
    result
}

struct AbortOnPanic<'a> {
    channel: &'a Channel,
    role: Role,
}

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(role = %self.role, "participant panicked, aborting run");
            self.channel.completion().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::completion::CompletionRecord;
    use crate::timing::Report;
    use std::time::Duration;

    fn outcome(consumed: u64, checksum: u64) -> RunOutcome {
        RunOutcome {
            report: Report {
                init_time: Duration::ZERO,
                comm_time: Duration::ZERO,
            },
            marks: TimingMarks::start(),
            record: CompletionRecord {
                consumed,
                checksum,
                aborted: false,
            },
            expected_count: 10,
            expected_checksum: 66495,
            producer: None,
            consumer: None,
            consumer_status: None,
            teardown: None,
        }
    }

    #[test]
    fn verify_flags_short_counts_and_bad_checksums() {
        assert!(outcome(10, 66495).verify().is_ok());
        assert!(matches!(
            outcome(9, 66495).verify(),
            Err(BenchError::ShortCount {
                expected: 10,
                consumed: 9
            })
        ));
        assert!(matches!(
            outcome(10, 1).verify(),
            Err(BenchError::ChecksumMismatch { actual: 1, .. })
        ));
    }

    #[test]
    fn verify_reports_teardown_failures_last() {
        let teardown = || TeardownError {
            failures: vec![("unmap segment", std::io::Error::other("boom"))],
        };

        let mut failed = outcome(10, 66495);
        failed.teardown = Some(teardown());
        assert!(matches!(failed.verify(), Err(BenchError::Teardown(_))));

        let mut short = outcome(3, 66495);
        short.teardown = Some(teardown());
        assert!(matches!(short.verify(), Err(BenchError::ShortCount { .. })));
    }

    fn small_channel(backend: BackendKind, iterations: u64) -> Channel {
        Channel::create_heap(ChannelSpec {
            backend,
            capacity: 1,
            message_len: 16,
            iterations,
        })
        .unwrap()
    }

    #[test]
    fn failing_participant_aborts_the_run() {
        for backend in BackendKind::ALL {
            let channel = small_channel(backend, 5);
            std::thread::scope(|s| {
                let failing = s.spawn(|| {
                    participate(&channel, Role::Consumer, None, |_| {
                        Err(SyncError::new("wait(product)", std::io::Error::other("gone")))
                    })
                });
                channel.rendezvous().open(1).unwrap();
                let record = channel.completion().wait().unwrap();
                assert!(record.aborted, "{backend}");
                assert!(!failing.join().unwrap().unwrap_err().is_abort());
            });
            channel.close().unwrap();
        }
    }

    #[test]
    fn abort_stops_the_peer_blocked_mid_loop() {
        let workload = Workload::template(16);
        for backend in BackendKind::ALL {
            let channel = small_channel(backend, 1_000);
            std::thread::scope(|s| {
                let producer = s.spawn(|| {
                    participate(&channel, Role::Producer, None, |c| produce_loop(c, &workload))
                });
                let consumer = s.spawn(|| {
                    participate(&channel, Role::Consumer, None, |c| {
                        c.consume_with(|_| ())?;
                        Err(SyncError::new("end_read", std::io::Error::other("injected")))
                    })
                });
                channel.rendezvous().open(2).unwrap();
                assert!(channel.completion().wait().unwrap().aborted, "{backend}");

                let stopped = producer.join().unwrap().unwrap_err();
                assert!(stopped.is_abort(), "{backend}: {stopped}");
                assert!(consumer.join().unwrap().is_err());
            });
            channel.close().unwrap();
        }
    }

    #[test]
    fn panicking_participant_aborts_the_run() {
        let channel = small_channel(BackendKind::Condvar, 5);
        std::thread::scope(|s| {
            let panicking = s.spawn(|| {
                participate(&channel, Role::Consumer, None, |_| panic!("consumer blew up"))
            });
            channel.rendezvous().open(1).unwrap();
            assert!(channel.completion().wait().unwrap().aborted);
            assert!(panicking.join().is_err());
        });
        channel.close().unwrap();
    }

    #[test]
    fn empty_run_skips_the_checksum() {
        let channel = Channel::create_heap(ChannelSpec {
            backend: BackendKind::Semaphore,
            capacity: 1,
            message_len: 16,
            iterations: 0,
        })
        .unwrap();
        let consumed = consume_loop(&channel).unwrap();
        assert_eq!(consumed.completed, 0);
        assert!(consumed.first_op_at.is_none());
        assert_eq!(channel.completion().wait().unwrap().consumed, 0);
        channel.close().unwrap();
    }
}
