//! A ring, its backend and the rendezvous signals, carved out of one region.
//!
//! The creator owns the channel: it initializes every primitive, publishes
//! the header, and is the only side that destroys primitives on teardown.
//! An attacher (the consumer process) just maps the same bytes.

use std::io;
use std::path::Path;
use std::ptr::NonNull;
use std::slice;
use std::thread;
use std::time::Duration;

use ringbench_primitives::{HeapRegion, Region, SharedSegment, Sharing};

use crate::backend::{Backend, BackendKind, SyncBackend, note};
use crate::completion::Completion;
use crate::error::{ConfigError, SetupError, SyncError, TeardownError};
use crate::layout::{ChannelHeader, ChannelLayout};
use crate::rendezvous::Rendezvous;
use crate::ring::{Ring, RingStatus};
use crate::signals::SignalBlock;

/// Geometry and workload size of a channel, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    pub backend: BackendKind,
    pub capacity: u32,
    pub message_len: u32,
    /// Messages the producer sends. Stored in the header so an attaching
    /// consumer knows when to stop.
    pub iterations: u64,
}

impl ChannelSpec {
    pub fn validate(&self) -> Result<ChannelLayout, ConfigError> {
        ChannelLayout::compute(self.backend, self.capacity, self.message_len)
    }
}

enum Backing {
    Heap(HeapRegion),
    Segment(SharedSegment),
}

impl Backing {
    fn region(&self) -> Region {
        match self {
            Backing::Heap(heap) => heap.region(),
            Backing::Segment(segment) => segment.region(),
        }
    }
}

pub struct Channel {
    backing: Backing,
    spec: ChannelSpec,
    layout: ChannelLayout,
    header: NonNull<ChannelHeader>,
    signals: NonNull<SignalBlock>,
    slots: NonNull<u8>,
    backend: Backend,
    owner: bool,
    torn_down: bool,
}

// SAFETY: every pointer targets the backing, which the channel owns; shared
// state is guarded by the backend and the signal semaphores.
unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}

impl Channel {
    /// Channel for two threads of this process.
    pub fn create_heap(spec: ChannelSpec) -> Result<Self, SetupError> {
        let layout = spec.validate()?;
        let heap = HeapRegion::zeroed(layout.total_size);
        Self::create_in(Backing::Heap(heap), spec, layout, Sharing::Thread)
    }

    /// Channel in a new shared segment at `path`, for two processes.
    ///
    /// The segment is unlinked when the channel is closed or dropped.
    pub fn create_segment(path: &Path, spec: ChannelSpec) -> Result<Self, SetupError> {
        let layout = spec.validate()?;
        let segment =
            SharedSegment::create(path, layout.total_size).map_err(SetupError::Segment)?;
        Self::create_in(Backing::Segment(segment), spec, layout, Sharing::Process)
    }

    fn create_in(
        backing: Backing,
        spec: ChannelSpec,
        layout: ChannelLayout,
        sharing: Sharing,
    ) -> Result<Self, SetupError> {
        let region = backing.region();
        let header = region.at::<ChannelHeader>(0);
        let signals = region.at::<SignalBlock>(layout.signals_offset);
        let slots = region.bytes_at(
            layout.slots_offset,
            spec.capacity as usize * layout.slot_stride,
        );

        // SAFETY: the region is freshly zeroed and nobody else can see it
        // until the header is published below.
        let backend = unsafe {
            ChannelHeader::write(header, &spec, &layout);
            signals.as_ref().init(sharing)?;
            let ring = Ring::init(region.at(layout.ring_offset), spec.capacity);
            match Backend::init(spec.backend, region, layout.sync_offset, ring, sharing) {
                Ok(backend) => backend,
                Err(e) => {
                    let mut ignored = Vec::new();
                    signals.as_ref().destroy(&mut ignored);
                    return Err(e);
                }
            }
        };

        // SAFETY: written above.
        unsafe { header.as_ref() }.publish();
        tracing::debug!(?spec, ?sharing, size = layout.total_size, "channel created");

        Ok(Self {
            backing,
            spec,
            layout,
            header,
            signals,
            slots,
            backend,
            owner: true,
            torn_down: false,
        })
    }

    /// Map the channel another process published at `path`.
    pub fn attach_segment(path: &Path) -> Result<Self, SetupError> {
        let segment = SharedSegment::attach(path).map_err(SetupError::Segment)?;
        let region = segment.region();
        if region.len() < std::mem::size_of::<ChannelHeader>() {
            return Err(SetupError::BadHeader("segment smaller than a channel header"));
        }

        let header = region.at::<ChannelHeader>(0);
        // SAFETY: in bounds per the check above; the header is only read.
        let (spec, layout) = unsafe { header.as_ref() }.read(region.len())?;

        let signals = region.at::<SignalBlock>(layout.signals_offset);
        let slots = region.bytes_at(
            layout.slots_offset,
            spec.capacity as usize * layout.slot_stride,
        );
        // SAFETY: the published header guarantees both were initialized with
        // this layout and backend.
        let backend = unsafe {
            let ring = Ring::attach(region.at(layout.ring_offset));
            Backend::attach(spec.backend, region, layout.sync_offset, ring)
        };
        tracing::debug!(path = %path.display(), ?spec, "attached channel");

        Ok(Self {
            backing: Backing::Segment(segment),
            spec,
            layout,
            header,
            signals,
            slots,
            backend,
            owner: false,
            torn_down: false,
        })
    }

    /// [`attach_segment`](Self::attach_segment), retrying every `poll` until
    /// the segment exists and a channel is published in it. Never times out.
    pub fn attach_segment_waiting(path: &Path, poll: Duration) -> Result<Self, SetupError> {
        let mut logged = false;
        loop {
            match Self::attach_segment(path) {
                Ok(channel) => return Ok(channel),
                Err(e) if not_there_yet(&e) => {
                    if !logged {
                        tracing::debug!(
                            path = %path.display(),
                            "waiting for channel to be published"
                        );
                        logged = true;
                    }
                    thread::sleep(poll);
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[inline]
    pub fn spec(&self) -> &ChannelSpec {
        &self.spec
    }

    #[inline]
    pub fn layout(&self) -> &ChannelLayout {
        &self.layout
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Cursor snapshot, safe to take at any moment.
    pub fn status(&self) -> RingStatus {
        self.backend.ring().status()
    }

    pub fn rendezvous(&self) -> Rendezvous<'_> {
        Rendezvous::new(self.signals())
    }

    pub fn completion(&self) -> Completion<'_> {
        Completion::new(self.signals(), &self.backend)
    }

    /// Block for a free slot, let `fill` write it, publish it.
    #[inline]
    pub fn produce_with(&self, fill: impl FnOnce(&mut [u8])) -> Result<(), SyncError> {
        let idx = self.backend.begin_write()?;
        // SAFETY: begin_write handed us exclusive access to slot `idx`.
        fill(unsafe { self.slot_mut(idx) });
        self.backend.end_write()
    }

    /// Block for a full slot, hand it to `read`, release it.
    #[inline]
    pub fn consume_with<R>(&self, read: impl FnOnce(&[u8]) -> R) -> Result<R, SyncError> {
        let idx = self.backend.begin_read()?;
        // SAFETY: begin_read handed us exclusive access to slot `idx`.
        let out = read(unsafe { self.slot_mut(idx) });
        self.backend.end_read()?;
        Ok(out)
    }

    /// Non-blocking [`produce_with`](Self::produce_with). `false` if full.
    pub fn try_produce_with(&self, fill: impl FnOnce(&mut [u8])) -> Result<bool, SyncError> {
        let Some(idx) = self.backend.try_begin_write()? else {
            return Ok(false);
        };
        // SAFETY: as in produce_with.
        fill(unsafe { self.slot_mut(idx) });
        self.backend.end_write()?;
        Ok(true)
    }

    /// Non-blocking [`consume_with`](Self::consume_with). `None` if empty.
    pub fn try_consume_with<R>(
        &self,
        read: impl FnOnce(&[u8]) -> R,
    ) -> Result<Option<R>, SyncError> {
        let Some(idx) = self.backend.try_begin_read()? else {
            return Ok(None);
        };
        // SAFETY: as in consume_with.
        let out = read(unsafe { self.slot_mut(idx) });
        self.backend.end_read()?;
        Ok(Some(out))
    }

    /// Tear down now and report every failed step.
    ///
    /// The owner retracts the header and destroys every primitive; both
    /// sides unmap. Nobody may still be using the channel.
    pub fn close(mut self) -> Result<(), TeardownError> {
        let failures = self.teardown();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }

    fn teardown(&mut self) -> Vec<(&'static str, io::Error)> {
        let mut failures = Vec::new();
        if self.torn_down {
            return failures;
        }
        self.torn_down = true;

        if self.owner {
            // SAFETY: close/drop are the last uses of the channel, and the
            // `torn_down` flag makes this run once.
            unsafe {
                self.header.as_ref().retract();
                self.backend.destroy(&mut failures);
                self.signals.as_ref().destroy(&mut failures);
            }
        }
        if let Backing::Segment(segment) = &mut self.backing {
            let step = if segment.owns_file() {
                "unmap and unlink segment"
            } else {
                "unmap segment"
            };
            note(&mut failures, step, segment.release());
        }

        tracing::debug!(owner = self.owner, failures = failures.len(), "channel torn down");
        failures
    }

    #[inline]
    fn signals(&self) -> &SignalBlock {
        // SAFETY: points into the backing, which lives as long as self.
        unsafe { self.signals.as_ref() }
    }

    /// # Safety
    ///
    /// The caller must hold the backend's exclusion for slot `idx`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn slot_mut(&self, idx: usize) -> &mut [u8] {
        debug_assert!(idx < self.spec.capacity as usize);
        let stride = self.layout.slot_stride;
        // SAFETY: in bounds of the slot array; exclusivity per the caller.
        unsafe {
            slice::from_raw_parts_mut(
                self.slots.as_ptr().add(idx * stride),
                self.spec.message_len as usize,
            )
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for (step, error) in self.teardown() {
            tracing::warn!(step, %error, "channel teardown step failed");
        }
    }
}

/// Errors that only mean the creator has not finished yet, or that the file
/// is a leftover a new creator is about to replace.
fn not_there_yet(e: &SetupError) -> bool {
    match e {
        SetupError::NotPublished | SetupError::CreatorGone(_) => true,
        SetupError::Segment(io) => matches!(
            io.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::InvalidData
        ),
        SetupError::BadHeader("segment smaller than a channel header") => true,
        _ => false,
    }
}
