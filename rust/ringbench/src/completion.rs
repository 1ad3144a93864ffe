//! One-shot "all messages drained" signal plus the record that goes with it.

use std::sync::atomic::Ordering;

use crate::backend::{Backend, SyncBackend};
use crate::error::SyncError;
use crate::signals::SignalBlock;
use crate::workload::ValidationSummary;

/// What the driver learns once `complete` fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionRecord {
    pub consumed: u64,
    /// Checksum of the last consumed payload.
    pub checksum: u64,
    /// A participant gave up; `consumed` and `checksum` are meaningless.
    pub aborted: bool,
}

pub struct Completion<'a> {
    signals: &'a SignalBlock,
    backend: &'a Backend,
}

impl<'a> Completion<'a> {
    pub(crate) fn new(signals: &'a SignalBlock, backend: &'a Backend) -> Self {
        Self { signals, backend }
    }

    /// Consumer side: publish the summary, then post `complete`.
    pub fn finish(&self, summary: ValidationSummary) -> Result<(), SyncError> {
        let s = self.signals;
        s.consumed.store(summary.consumed, Ordering::Relaxed);
        s.checksum.store(summary.checksum, Ordering::Relaxed);
        s.finished.store(1, Ordering::Release);
        // sem_post is a release barrier for the stores above.
        s.complete
            .post()
            .map_err(|e| SyncError::new("post(complete)", e))
    }

    /// Whether the consumer got as far as [`finish`](Self::finish).
    pub fn is_finished(&self) -> bool {
        self.signals.finished.load(Ordering::Acquire) != 0
    }

    /// Raise the abort flag, release anyone parked on the ring, and wake the
    /// driver. Best effort.
    pub fn abort(&self) {
        if let Err(error) = self.backend.interrupt() {
            tracing::error!(%error, "releasing ring waiters after abort failed");
        }
        if let Err(error) = self.signals.complete.post() {
            tracing::error!(%error, "posting complete after abort failed");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.backend.ring().is_aborted()
    }

    /// Driver side: block until `complete` is posted.
    pub fn wait(&self) -> Result<CompletionRecord, SyncError> {
        let s = self.signals;
        s.complete
            .wait()
            .map_err(|e| SyncError::new("wait(complete)", e))?;
        Ok(CompletionRecord {
            consumed: s.consumed.load(Ordering::Relaxed),
            checksum: s.checksum.load(Ordering::Relaxed),
            aborted: self.is_aborted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::backend::BackendKind;
    use crate::channel::{Channel, ChannelSpec};
    use crate::workload::ValidationSummary;

    fn channel() -> Channel {
        Channel::create_heap(ChannelSpec {
            backend: BackendKind::Condvar,
            capacity: 1,
            message_len: 4,
            iterations: 0,
        })
        .unwrap()
    }

    #[test]
    fn record_travels_with_the_signal() {
        let channel = channel();
        channel
            .completion()
            .finish(ValidationSummary {
                consumed: 12,
                checksum: 66495,
            })
            .unwrap();
        let record = channel.completion().wait().unwrap();
        assert_eq!(record.consumed, 12);
        assert_eq!(record.checksum, 66495);
        assert!(!record.aborted);
        assert!(channel.completion().is_finished());
        channel.close().unwrap();
    }

    #[test]
    fn abort_wakes_the_driver() {
        let channel = channel();
        std::thread::scope(|s| {
            s.spawn(|| channel.completion().abort());
            assert!(channel.completion().wait().unwrap().aborted);
        });
        assert!(!channel.completion().is_finished());
        channel.close().unwrap();
    }

    #[test]
    fn abort_releases_a_producer_blocked_on_a_full_ring() {
        for backend in BackendKind::ALL {
            let channel = Channel::create_heap(ChannelSpec {
                backend,
                capacity: 1,
                message_len: 4,
                iterations: 2,
            })
            .unwrap();
            channel.produce_with(|slot| slot.fill(1)).unwrap();

            std::thread::scope(|s| {
                let blocked = s.spawn(|| channel.produce_with(|slot| slot.fill(2)));
                std::thread::sleep(Duration::from_millis(20));
                assert!(!blocked.is_finished(), "{backend}: ring should be full");

                channel.completion().abort();
                let err = blocked.join().unwrap().unwrap_err();
                assert!(err.is_abort(), "{backend}: {err}");
            });

            assert!(channel.completion().wait().unwrap().aborted);
            let err = channel.consume_with(|p| p[0]).unwrap_err();
            assert!(err.is_abort(), "{backend}: reads fail after abort");
            channel.close().unwrap();
        }
    }

    #[test]
    fn abort_releases_a_consumer_blocked_on_an_empty_ring() {
        for backend in BackendKind::ALL {
            let channel = Channel::create_heap(ChannelSpec {
                backend,
                capacity: 4,
                message_len: 4,
                iterations: 1,
            })
            .unwrap();

            std::thread::scope(|s| {
                let blocked = s.spawn(|| channel.consume_with(|p| p[0]));
                std::thread::sleep(Duration::from_millis(20));
                assert!(!blocked.is_finished(), "{backend}: ring should be empty");

                channel.completion().abort();
                assert!(blocked.join().unwrap().unwrap_err().is_abort(), "{backend}");
            });
            assert!(channel.try_produce_with(|_| ()).unwrap_err().is_abort());
            channel.close().unwrap();
        }
    }
}
