//! Ready barrier followed by a start gun.
//!
//! Participants announce themselves on `ready` and park on `start_gun`. The
//! driver collects one `ready` per participant, takes the `comm_start` mark,
//! and only then fires the gun, so no loop iteration can precede the mark.

use std::time::Instant;

use crate::error::SyncError;
use crate::signals::SignalBlock;

pub struct Rendezvous<'a> {
    signals: &'a SignalBlock,
}

impl<'a> Rendezvous<'a> {
    pub(crate) fn new(signals: &'a SignalBlock) -> Self {
        Self { signals }
    }

    /// Participant side: report ready, then block until the gun fires.
    pub fn arrive(&self) -> Result<(), SyncError> {
        self.signals
            .ready
            .post()
            .map_err(|e| SyncError::new("post(ready)", e))?;
        self.signals
            .start_gun
            .wait()
            .map_err(|e| SyncError::new("wait(start_gun)", e))
    }

    /// Driver side: wait for `participants` arrivals, then release them all.
    ///
    /// Returns the instant taken between the last arrival and the first
    /// release.
    pub fn open(&self, participants: u32) -> Result<Instant, SyncError> {
        for _ in 0..participants {
            self.signals
                .ready
                .wait()
                .map_err(|e| SyncError::new("wait(ready)", e))?;
        }
        let comm_start = Instant::now();
        for _ in 0..participants {
            self.signals
                .start_gun
                .post()
                .map_err(|e| SyncError::new("post(start_gun)", e))?;
        }
        tracing::debug!(participants, "start gun fired");
        Ok(comm_start)
    }

    /// Unblock a driver stuck in [`open`](Self::open) on behalf of a
    /// participant that will never arrive.
    pub(crate) fn stand_in(&self) {
        if let Err(error) = self.signals.ready.post() {
            tracing::warn!(%error, "posting ready on behalf of a dead participant failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::BackendKind;
    use crate::channel::{Channel, ChannelSpec};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn nobody_passes_before_the_gun() {
        let channel = Channel::create_heap(ChannelSpec {
            backend: BackendKind::Semaphore,
            capacity: 1,
            message_len: 8,
            iterations: 0,
        })
        .unwrap();

        let (comm_start, released) = thread::scope(|s| {
            let waiters: Vec<_> = (0..2)
                .map(|_| {
                    s.spawn(|| {
                        channel.rendezvous().arrive().unwrap();
                        Instant::now()
                    })
                })
                .collect();
            let comm_start = channel.rendezvous().open(2).unwrap();
            let released: Vec<Instant> = waiters.into_iter().map(|w| w.join().unwrap()).collect();
            (comm_start, released)
        });

        for at in released {
            assert!(at >= comm_start);
        }
        channel.close().unwrap();
    }
}
