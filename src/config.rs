use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

/// Default number of slots per channel ring.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default upper bound on threads per execution group.
pub const DEFAULT_THREADS_PER_CHANNEL: usize = 256;

/// Sizing and polling behaviour of a [`Runtime`](crate::Runtime).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of pre-allocated channels in the pool.
    pub channels: usize,
    /// Slots per channel ring. Any non-zero value; need not be a power of two.
    pub queue_capacity: usize,
    /// Size of each channel's completion-status array, i.e. the largest
    /// execution group a channel can serve.
    pub threads_per_channel: usize,
    /// Pause between polls of the host read index while the ring is full.
    pub slot_backoff: BackoffPolicy,
    /// Pause between polls of a completion byte.
    pub completion_backoff: BackoffPolicy,
    /// Record per-phase timings.
    pub profiling: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channels: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            threads_per_channel: DEFAULT_THREADS_PER_CHANNEL,
            slot_backoff: BackoffPolicy::Spin,
            completion_backoff: BackoffPolicy::Snooze,
            profiling: true,
        }
    }
}

impl RuntimeConfig {
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn with_threads_per_channel(mut self, threads: usize) -> Self {
        self.threads_per_channel = threads;
        self
    }

    pub fn with_slot_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.slot_backoff = policy;
        self
    }

    pub fn with_completion_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.completion_backoff = policy;
        self
    }

    pub fn with_profiling(mut self, profiling: bool) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels == 0 {
            return Err(Error::InvalidConfig("channels must be non-zero".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be non-zero".into()));
        }
        if self.threads_per_channel == 0 {
            return Err(Error::InvalidConfig(
                "threads_per_channel must be non-zero".into(),
            ));
        }
        if u32::try_from(self.threads_per_channel).is_err() {
            return Err(Error::InvalidConfig(format!(
                "threads_per_channel {} does not fit a thread id",
                self.threads_per_channel
            )));
        }
        Ok(())
    }
}
