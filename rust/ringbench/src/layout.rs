//! Where everything lives inside a channel region.
//!
//! ```text
//! 0               ChannelHeader   magic, version, creator pid, geometry, offsets
//! signals_offset  SignalBlock     ready / start_gun / complete + completion record
//! sync_offset     backend state   SemaphoreState or CondvarState
//! ring_offset     RingHeader      head, tail, ready_count, capacity, aborted
//! slots_offset    slots           capacity × message_len bytes
//! ```
//!
//! Every section starts on a [`REGION_ALIGN`] boundary. Only offsets are
//! recorded, so each process can map the segment wherever it likes.

use std::mem::size_of;
use std::ptr::{NonNull, addr_of_mut};
use std::sync::atomic::{AtomicU64, Ordering};

use ringbench_primitives::process_exists;
use ringbench_primitives::region::REGION_ALIGN;

use crate::backend::BackendKind;
use crate::channel::ChannelSpec;
use crate::error::{ConfigError, SetupError};
use crate::ring::RingHeader;
use crate::signals::SignalBlock;

/// "RINGBNCH" as a little-endian word.
pub const CHANNEL_MAGIC: u64 = u64::from_le_bytes(*b"RINGBNCH");

pub const LAYOUT_VERSION: u32 = 1;

/// Offsets of every section, derived from the channel geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub signals_offset: usize,
    pub sync_offset: usize,
    pub ring_offset: usize,
    pub slots_offset: usize,
    pub slot_stride: usize,
    pub total_size: usize,
}

impl ChannelLayout {
    pub fn compute(
        backend: BackendKind,
        capacity: u32,
        message_len: u32,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if message_len == 0 {
            return Err(ConfigError::ZeroMessageLen);
        }
        debug_assert!(backend.state_align() <= REGION_ALIGN);

        let overflow = ConfigError::LayoutOverflow {
            capacity,
            message_len,
        };
        let align = |n: usize| n.next_multiple_of(REGION_ALIGN);

        let signals_offset = align(size_of::<ChannelHeader>());
        let sync_offset = align(signals_offset + size_of::<SignalBlock>());
        let ring_offset = align(sync_offset + backend.state_size());
        let slots_offset = align(ring_offset + size_of::<RingHeader>());

        let slot_stride = message_len as usize;
        let total_size = (capacity as usize)
            .checked_mul(slot_stride)
            .and_then(|slots| slots.checked_add(slots_offset))
            .and_then(|n| n.checked_next_multiple_of(REGION_ALIGN))
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or(overflow)?;

        Ok(Self {
            signals_offset,
            sync_offset,
            ring_offset,
            slots_offset,
            slot_stride,
            total_size,
        })
    }
}

/// First bytes of every channel region.
#[repr(C)]
pub struct ChannelHeader {
    /// Zero until every other structure is initialized.
    magic: AtomicU64,
    version: u32,
    /// Attachers refuse a channel whose creator has exited.
    creator_pid: u32,
    backend: u32,
    capacity: u32,
    message_len: u32,
    iterations: u64,
    signals_offset: u64,
    sync_offset: u64,
    ring_offset: u64,
    slots_offset: u64,
    total_size: u64,
}

impl ChannelHeader {
    /// Record geometry and offsets, leaving `magic` untouched.
    ///
    /// # Safety
    ///
    /// `header` must point at zeroed memory that only the creator writes.
    pub(crate) unsafe fn write(
        header: NonNull<ChannelHeader>,
        spec: &ChannelSpec,
        layout: &ChannelLayout,
    ) {
        let p = header.as_ptr();
        // SAFETY: forwarded to the caller. Attachers read these fields only
        // after observing the magic, which is stored last.
        unsafe {
            addr_of_mut!((*p).version).write(LAYOUT_VERSION);
            addr_of_mut!((*p).creator_pid).write(std::process::id());
            addr_of_mut!((*p).backend).write(spec.backend as u32);
            addr_of_mut!((*p).capacity).write(spec.capacity);
            addr_of_mut!((*p).message_len).write(spec.message_len);
            addr_of_mut!((*p).iterations).write(spec.iterations);
            addr_of_mut!((*p).signals_offset).write(layout.signals_offset as u64);
            addr_of_mut!((*p).sync_offset).write(layout.sync_offset as u64);
            addr_of_mut!((*p).ring_offset).write(layout.ring_offset as u64);
            addr_of_mut!((*p).slots_offset).write(layout.slots_offset as u64);
            addr_of_mut!((*p).total_size).write(layout.total_size as u64);
        }
    }

    /// Make the channel visible to attachers.
    pub(crate) fn publish(&self) {
        self.magic.store(CHANNEL_MAGIC, Ordering::Release);
    }

    /// Hide the channel again before its primitives are destroyed.
    pub(crate) fn retract(&self) {
        self.magic.store(0, Ordering::Release);
    }

    /// Validate a published header against a mapping of `mapped_len` bytes.
    pub(crate) fn read(
        &self,
        mapped_len: usize,
    ) -> Result<(ChannelSpec, ChannelLayout), SetupError> {
        match self.magic.load(Ordering::Acquire) {
            0 => return Err(SetupError::NotPublished),
            CHANNEL_MAGIC => {}
            _ => return Err(SetupError::BadHeader("magic mismatch")),
        }
        if self.version != LAYOUT_VERSION {
            return Err(SetupError::BadHeader("unsupported layout version"));
        }
        if !process_exists(self.creator_pid) {
            return Err(SetupError::CreatorGone(self.creator_pid));
        }
        let backend = BackendKind::from_u32(self.backend)
            .ok_or(SetupError::BadHeader("unknown backend tag"))?;

        let spec = ChannelSpec {
            backend,
            capacity: self.capacity,
            message_len: self.message_len,
            iterations: self.iterations,
        };
        let layout = ChannelLayout::compute(backend, spec.capacity, spec.message_len)
            .map_err(|_| SetupError::BadHeader("recorded geometry is invalid"))?;

        let recorded = [
            self.signals_offset,
            self.sync_offset,
            self.ring_offset,
            self.slots_offset,
            self.total_size,
        ];
        let expected = [
            layout.signals_offset,
            layout.sync_offset,
            layout.ring_offset,
            layout.slots_offset,
            layout.total_size,
        ]
        .map(|n| n as u64);
        if recorded != expected {
            return Err(SetupError::BadHeader(
                "recorded offsets differ from this build's layout",
            ));
        }
        if mapped_len < layout.total_size {
            return Err(SetupError::BadHeader("segment smaller than recorded layout"));
        }

        Ok((spec, layout))
    }
}
