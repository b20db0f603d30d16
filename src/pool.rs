use crate::config::RuntimeConfig;
use crate::descriptor::QueueDescriptor;
use crate::element::{ELEMENT_SIZE, QueueElement};
use crate::error::{Error, Result};
use crate::region::{REGION_ALIGN, Region};
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

const MAGIC: u64 = 0x524F_4E45_5451_5545; // "RONETQUE"
const VERSION: u64 = 1;
const HEADER_SIZE: usize = REGION_ALIGN;

const _: () = assert!(align_of::<QueueDescriptor>() <= REGION_ALIGN);
const _: () = assert!(align_of::<QueueElement>() <= REGION_ALIGN);

/// Pool header at offset 0 of the region. `magic` is stored last, with
/// release ordering, so a process that sees it also sees the other fields.
#[repr(C)]
struct PoolHeader {
    magic: AtomicU64,
    version: u64,
    channels: u64,
    queue_capacity: u64,
    threads_per_channel: u64,
}

const _: () = assert!(size_of::<PoolHeader>() <= HEADER_SIZE);

/// Byte offsets of one channel's parts, relative to the channel's base.
///
/// ```text
/// [ header ][ channel 0 ][ channel 1 ] ...
///            [ descriptor | status bytes | ring elements ]
/// ```
///
/// Every part starts on a [`REGION_ALIGN`] boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolLayout {
    channels: usize,
    queue_capacity: usize,
    threads_per_channel: usize,
    status_offset: usize,
    ring_offset: usize,
    stride: usize,
}

impl PoolLayout {
    pub fn new(cfg: &RuntimeConfig) -> Result<Self> {
        cfg.validate()?;
        let overflow = || Error::InvalidConfig("channel pool size overflows".into());

        let status_offset = align_up(size_of::<QueueDescriptor>()).ok_or_else(overflow)?;
        let ring_offset = align_up(cfg.threads_per_channel)
            .and_then(|s| s.checked_add(status_offset))
            .ok_or_else(overflow)?;
        let stride = cfg
            .queue_capacity
            .checked_mul(ELEMENT_SIZE)
            .and_then(|r| r.checked_add(ring_offset))
            .and_then(align_up)
            .ok_or_else(overflow)?;
        stride
            .checked_mul(cfg.channels)
            .and_then(|s| s.checked_add(HEADER_SIZE))
            .ok_or_else(overflow)?;

        Ok(Self {
            channels: cfg.channels,
            queue_capacity: cfg.queue_capacity,
            threads_per_channel: cfg.threads_per_channel,
            status_offset,
            ring_offset,
            stride,
        })
    }

    /// Total bytes a region needs to hold the pool.
    pub fn region_len(&self) -> usize {
        HEADER_SIZE + self.stride * self.channels
    }

    fn channel_offset(&self, id: usize) -> usize {
        HEADER_SIZE + self.stride * id
    }
}

fn align_up(n: usize) -> Option<usize> {
    Some(n.checked_add(REGION_ALIGN - 1)? & !(REGION_ALIGN - 1))
}

/// The fixed set of `{ring, descriptor, status array}` triples, laid out in
/// one host-resident [`Region`].
#[derive(Debug)]
pub struct ChannelPool<R: Region> {
    region: R,
    layout: PoolLayout,
}

impl<R: Region> ChannelPool<R> {
    /// Formats a fresh, zero-filled region as a pool.
    pub fn create(region: R, cfg: &RuntimeConfig) -> Result<Self> {
        let pool = Self::check_len(region, cfg)?;
        let h = pool.region.as_ptr().as_ptr() as *mut PoolHeader;
        unsafe {
            (*h).version = VERSION;
            (*h).channels = pool.layout.channels as u64;
            (*h).queue_capacity = pool.layout.queue_capacity as u64;
            (*h).threads_per_channel = pool.layout.threads_per_channel as u64;
            (*h).magic.store(MAGIC, Ordering::Release);
        }
        Ok(pool)
    }

    /// Attaches to a region formatted by [`ChannelPool::create`] with the
    /// same configuration, possibly in another process.
    pub fn attach(region: R, cfg: &RuntimeConfig) -> Result<Self> {
        let pool = Self::check_len(region, cfg)?;
        let header = pool.header();
        let expect = |field, expected: u64, found: u64| {
            if expected == found {
                Ok(())
            } else {
                Err(Error::LayoutMismatch {
                    field,
                    expected,
                    found,
                })
            }
        };
        expect("magic", MAGIC, header.magic.load(Ordering::Acquire))?;
        expect("version", VERSION, header.version)?;
        expect("channels", pool.layout.channels as u64, header.channels)?;
        expect(
            "queue_capacity",
            pool.layout.queue_capacity as u64,
            header.queue_capacity,
        )?;
        expect(
            "threads_per_channel",
            pool.layout.threads_per_channel as u64,
            header.threads_per_channel,
        )?;
        Ok(pool)
    }

    fn check_len(region: R, cfg: &RuntimeConfig) -> Result<Self> {
        let layout = PoolLayout::new(cfg)?;
        if region.len() < layout.region_len() {
            return Err(Error::LayoutMismatch {
                field: "region_len",
                expected: layout.region_len() as u64,
                found: region.len() as u64,
            });
        }
        Ok(Self { region, layout })
    }

    fn header(&self) -> &PoolHeader {
        unsafe { &*(self.region.as_ptr().as_ptr() as *const PoolHeader) }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.layout.channels
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.layout.channels == 0
    }

    #[inline(always)]
    pub fn queue_capacity(&self) -> usize {
        self.layout.queue_capacity
    }

    #[inline(always)]
    pub fn threads_per_channel(&self) -> usize {
        self.layout.threads_per_channel
    }

    pub fn layout(&self) -> &PoolLayout {
        &self.layout
    }

    /// Borrows channel `id`.
    pub fn channel(&self, id: usize) -> Result<Channel<'_>> {
        if id >= self.layout.channels {
            return Err(Error::ChannelOutOfRange {
                id,
                channels: self.layout.channels,
            });
        }
        // Offsets were validated against the region length in `check_len`,
        // and every part is zero-valid.
        unsafe {
            let base = self.region.as_ptr().as_ptr().add(self.layout.channel_offset(id));
            Ok(Channel {
                id,
                desc: &*(base as *const QueueDescriptor),
                status: std::slice::from_raw_parts(
                    base.add(self.layout.status_offset) as *const AtomicU8,
                    self.layout.threads_per_channel,
                ),
                ring: std::slice::from_raw_parts(
                    base.add(self.layout.ring_offset) as *const QueueElement,
                    self.layout.queue_capacity,
                ),
            })
        }
    }
}

/// One channel of a pool: ring, descriptor, and completion-status bytes.
#[derive(Clone, Copy, Debug)]
pub struct Channel<'a> {
    id: usize,
    desc: &'a QueueDescriptor,
    status: &'a [AtomicU8],
    ring: &'a [QueueElement],
}

impl<'a> Channel<'a> {
    #[inline(always)]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline(always)]
    pub fn descriptor(&self) -> &'a QueueDescriptor {
        self.desc
    }

    #[inline(always)]
    pub fn status(&self) -> &'a [AtomicU8] {
        self.status
    }

    #[inline(always)]
    pub fn ring(&self) -> &'a [QueueElement] {
        self.ring
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.ring.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{HeapRegion, ShmRegion};

    fn cfg() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_channels(3)
            .with_queue_capacity(5)
            .with_threads_per_channel(33)
    }

    fn heap_pool(cfg: &RuntimeConfig) -> ChannelPool<HeapRegion> {
        let layout = PoolLayout::new(cfg).unwrap();
        ChannelPool::create(HeapRegion::new(layout.region_len()).unwrap(), cfg).unwrap()
    }

    #[test]
    fn channels_do_not_overlap() {
        let cfg = cfg();
        let pool = heap_pool(&cfg);
        assert_eq!(pool.len(), 3);

        let mut spans = Vec::new();
        for id in 0..pool.len() {
            let ch = pool.channel(id).unwrap();
            assert_eq!(ch.id(), id);
            assert_eq!(ch.capacity(), 5);
            assert_eq!(ch.status().len(), 33);

            let desc = ch.descriptor() as *const _ as usize;
            let status = ch.status().as_ptr() as usize;
            let ring = ch.ring().as_ptr() as usize;
            let end = ring + ch.ring().len() * ELEMENT_SIZE;
            assert!(desc < status && status + 33 <= ring);
            for part in [desc, status, ring] {
                assert_eq!(part % REGION_ALIGN, 0);
            }
            spans.push((desc, end));
        }
        for w in spans.windows(2) {
            assert!(w[0].1 <= w[1].0, "channel spans overlap: {:?}", w);
        }
    }

    #[test]
    fn fresh_pool_is_empty() {
        let pool = heap_pool(&cfg());
        let ch = pool.channel(2).unwrap();
        assert_eq!((ch.descriptor().read_idx(), ch.descriptor().write_idx()), (0, 0));
        assert!(ch.ring().iter().all(|e| !e.is_valid()));
        assert!(ch.status().iter().all(|s| s.load(Ordering::Relaxed) == 0));
    }

    #[test]
    fn out_of_range_channel() {
        let pool = heap_pool(&cfg());
        assert!(matches!(
            pool.channel(3),
            Err(Error::ChannelOutOfRange { id: 3, channels: 3 })
        ));
    }

    #[test]
    fn short_region_is_rejected() {
        let cfg = cfg();
        let region = HeapRegion::new(256).unwrap();
        assert!(matches!(
            ChannelPool::create(region, &cfg),
            Err(Error::LayoutMismatch { field: "region_len", .. })
        ));
    }

    #[test]
    fn attach_validates_header() {
        let name = format!("/ro_channel_pool_attach_{}", std::process::id());
        let _ = ShmRegion::unlink(&name);

        let cfg = cfg();
        let len = PoolLayout::new(&cfg).unwrap().region_len();
        let created = ChannelPool::create(ShmRegion::create(&name, len).unwrap(), &cfg).unwrap();
        created.channel(1).unwrap().descriptor().store_read_idx(42);

        let attached = ChannelPool::attach(ShmRegion::open(&name).unwrap(), &cfg).unwrap();
        assert_eq!(attached.channel(1).unwrap().descriptor().read_idx(), 42);

        let other = cfg.with_threads_per_channel(32);
        let err = ChannelPool::attach(ShmRegion::open(&name).unwrap(), &other).unwrap_err();
        assert!(matches!(err, Error::LayoutMismatch { field: "threads_per_channel", .. }));

        ShmRegion::unlink(&name).unwrap();
    }

    #[test]
    fn attach_unformatted_region_fails() {
        let cfg = cfg();
        let len = PoolLayout::new(&cfg).unwrap().region_len();
        let err = ChannelPool::attach(HeapRegion::new(len).unwrap(), &cfg).unwrap_err();
        assert!(matches!(err, Error::LayoutMismatch { field: "magic", .. }));
    }
}
