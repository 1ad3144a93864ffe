#![allow(dead_code)]

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ringbench::{BackendKind, ChannelSpec};

/// Generous bound for anything that should finish in milliseconds. Hitting it
/// means a participant is parked forever.
pub const DEADLINE: Duration = Duration::from_secs(60);

/// Run `f` on its own thread and panic if it does not return within `limit`.
///
/// A deadlocked body is leaked; the test still fails instead of hanging.
pub fn within<T: Send + 'static>(
    what: &str,
    limit: Duration,
    f: impl FnOnce() -> T + Send + 'static,
) -> T {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(limit) {
        Ok(value) => value,
        Err(mpsc::RecvTimeoutError::Timeout) => panic!("{what}: no progress after {limit:?}"),
        Err(mpsc::RecvTimeoutError::Disconnected) => panic!("{what}: body panicked"),
    }
}

pub fn spec(backend: BackendKind, capacity: u32, iterations: u64) -> ChannelSpec {
    ChannelSpec {
        backend,
        capacity,
        message_len: 64,
        iterations,
    }
}

pub fn stamp(slot: &mut [u8], seq: u64) {
    slot[..8].copy_from_slice(&seq.to_le_bytes());
}

pub fn read_stamp(payload: &[u8]) -> u64 {
    u64::from_le_bytes(payload[..8].try_into().unwrap())
}
