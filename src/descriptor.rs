use crossbeam_utils::CachePadded;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared indices of one channel, visible to both the producer group and the
/// host drain agent.
///
/// - `read_idx` is advanced only by the consumer. Producers poll it when
///   their local copy says the ring is full.
/// - `write_idx` is never read by the consumer, which relies on the `valid`
///   flag of each element. Producers work on a local copy and write it back
///   when the group exits, so the channel can be reused without resetting.
///
/// Each index lives on its own cache line. The all-zero bit pattern is a
/// valid, empty descriptor.
#[derive(Default)]
#[repr(C)]
pub struct QueueDescriptor {
    read_idx: CachePadded<AtomicU64>,
    write_idx: CachePadded<AtomicU64>,
}

impl QueueDescriptor {
    /// Loads the consumer's read index.
    #[inline(always)]
    pub fn read_idx(&self) -> u64 {
        self.read_idx.load(Ordering::Acquire)
    }

    /// Loads the write index last flushed by a producer group.
    #[inline(always)]
    pub fn write_idx(&self) -> u64 {
        self.write_idx.load(Ordering::Acquire)
    }

    /// The host-visible read index, polled by producers on a full ring.
    #[inline(always)]
    pub(crate) fn host_read_idx(&self) -> &AtomicU64 {
        &self.read_idx
    }

    /// Publishes a new read index after the consumer released a slot.
    #[inline(always)]
    pub(crate) fn store_read_idx(&self, idx: u64) {
        self.read_idx.store(idx, Ordering::Release);
    }

    /// Flushes a producer group's local write index.
    #[inline(always)]
    pub(crate) fn store_write_idx(&self, idx: u64) {
        self.write_idx.store(idx, Ordering::Release);
    }
}

impl Debug for QueueDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueDescriptor")
            .field("read_idx", &self.read_idx())
            .field("write_idx", &self.write_idx())
            .finish()
    }
}
