use crate::config::RuntimeConfig;
use crate::drain::Drain;
use crate::error::{Error, Result};
use crate::group::ExecutionGroup;
use crate::pool::{Channel, ChannelPool, PoolLayout};
use crate::profiler::{ProfileSnapshot, Profiler};
use crate::region::{HeapRegion, Region, ShmRegion};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Owns the channel pool and the per-channel bookkeeping around it.
///
/// A channel is served by at most one [`ExecutionGroup`] and at most one
/// [`Drain`] at a time. Reservations are tracked per `Runtime`, so two
/// processes sharing a region must agree on who drains which channel.
#[derive(Debug)]
pub struct Runtime<R: Region = HeapRegion> {
    config: RuntimeConfig,
    pool: ChannelPool<R>,
    profilers: Box<[Profiler]>,
    groups: Box<[AtomicBool]>,
    drains: Box<[AtomicBool]>,
}

impl Runtime<HeapRegion> {
    /// Allocates a pool on the heap, for a drain running in this process.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let layout = PoolLayout::new(&config)?;
        let pool = ChannelPool::create(HeapRegion::new(layout.region_len())?, &config)?;
        debug!(?config, len = layout.region_len(), "heap channel pool created");
        Ok(Self::with_pool(config, pool))
    }
}

impl Runtime<ShmRegion> {
    /// Creates and formats a named shared-memory pool.
    pub fn create_shared(name: &str, config: RuntimeConfig) -> Result<Self> {
        let layout = PoolLayout::new(&config)?;
        let pool = ChannelPool::create(ShmRegion::create(name, layout.region_len())?, &config)?;
        debug!(name, ?config, len = layout.region_len(), "shared channel pool created");
        Ok(Self::with_pool(config, pool))
    }

    /// Attaches to a pool created by [`Runtime::create_shared`] with the same
    /// configuration.
    pub fn open_shared(name: &str, config: RuntimeConfig) -> Result<Self> {
        PoolLayout::new(&config)?;
        let pool = ChannelPool::attach(ShmRegion::open(name)?, &config)?;
        debug!(name, ?config, "shared channel pool attached");
        Ok(Self::with_pool(config, pool))
    }
}

impl<R: Region> Runtime<R> {
    fn with_pool(config: RuntimeConfig, pool: ChannelPool<R>) -> Self {
        let channels = config.channels;
        Self {
            profilers: (0..channels).map(|_| Profiler::new(config.profiling)).collect(),
            groups: (0..channels).map(|_| AtomicBool::new(false)).collect(),
            drains: (0..channels).map(|_| AtomicBool::new(false)).collect(),
            config,
            pool,
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[inline(always)]
    pub fn pool(&self) -> &ChannelPool<R> {
        &self.pool
    }

    pub fn channel(&self, id: usize) -> Result<Channel<'_>> {
        self.pool.channel(id)
    }

    /// Profile accumulated by every group that has exited on channel `id`.
    pub fn profiler(&self, id: usize) -> Result<&Profiler> {
        self.profilers.get(id).ok_or(Error::ChannelOutOfRange {
            id,
            channels: self.config.channels,
        })
    }

    pub fn profile(&self, id: usize) -> Result<ProfileSnapshot> {
        Ok(self.profiler(id)?.snapshot())
    }

    /// Binds `threads` threads to channel `id`.
    pub fn group(&self, id: usize, threads: usize) -> Result<ExecutionGroup<'_>> {
        ExecutionGroup::new(self, id, threads)
    }

    /// A single-thread group for code running on the host itself, bound to
    /// the last channel of the pool.
    pub fn host_group(&self) -> Result<ExecutionGroup<'_>> {
        self.group(self.config.channels - 1, 1)
    }

    /// Takes the consumer end of channel `id`.
    pub fn drain(&self, id: usize) -> Result<Drain<'_>> {
        let channel = self.pool.channel(id)?;
        let token = &self.drains[id];
        if token
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::DrainInUse { id });
        }
        debug!(channel = id, read_idx = channel.descriptor().read_idx(), "drain attached");
        Ok(Drain::new(channel, token))
    }

    pub(crate) fn reserve_group(&self, id: usize) -> Result<&AtomicBool> {
        self.pool.channel(id)?;
        let token = &self.groups[id];
        if token
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ChannelInUse { id });
        }
        Ok(token)
    }
}
