use crate::backoff::{BackoffPolicy, wait_until};
use crate::config::RuntimeConfig;
use crate::context::{ChannelState, Context};
use crate::error::{Error, Result};
use crate::pool::Channel;
use crate::profiler::Profiler;
use crate::region::Region;
use crate::runtime::Runtime;
use crossbeam_utils::CachePadded;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Reusable spin barrier for a fixed number of threads.
#[derive(Debug)]
pub struct GroupBarrier {
    threads: usize,
    arrived: CachePadded<AtomicUsize>,
    generation: CachePadded<AtomicUsize>,
    policy: BackoffPolicy,
}

impl GroupBarrier {
    pub fn new(threads: usize, policy: BackoffPolicy) -> Self {
        Self {
            threads,
            arrived: CachePadded::new(AtomicUsize::new(0)),
            generation: CachePadded::new(AtomicUsize::new(0)),
            policy,
        }
    }

    /// Blocks until all `threads` have called `wait` for this generation.
    pub fn wait(&self) {
        let generation = self.generation.load(Ordering::Acquire);
        if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.threads {
            self.arrived.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Release);
        } else {
            wait_until(self.policy, || {
                self.generation.load(Ordering::Acquire) != generation
            });
        }
    }
}

/// A set of cooperating threads bound to one channel for their lifetime.
///
/// Thread 0 builds the group's [`ChannelState`] on [`enter`](Self::enter)
/// and tears it down on [`exit`](Self::exit); every thread passes through a
/// barrier on both sides. A group runs once: create a new one to reuse the
/// channel. The channel stays reserved until the group is dropped.
pub struct ExecutionGroup<'a> {
    channel: Channel<'a>,
    global: &'a Profiler,
    token: &'a AtomicBool,
    config: RuntimeConfig,
    threads: usize,
    barrier: GroupBarrier,
    state: OnceLock<ChannelState<'a>>,
}

impl<'a> ExecutionGroup<'a> {
    pub fn new<R: Region>(runtime: &'a Runtime<R>, channel_id: usize, threads: usize) -> Result<Self> {
        let config = *runtime.config();
        if threads == 0 || threads > config.threads_per_channel {
            return Err(Error::InvalidConfig(format!(
                "group of {threads} threads, channel serves 1..={}",
                config.threads_per_channel
            )));
        }
        let channel = runtime.channel(channel_id)?;
        let global = runtime.profiler(channel_id)?;
        let token = runtime.reserve_group(channel_id)?;
        debug!(channel = channel_id, threads, "execution group bound");
        Ok(Self {
            channel,
            global,
            token,
            config,
            threads,
            barrier: GroupBarrier::new(threads, BackoffPolicy::Snooze),
            state: OnceLock::new(),
        })
    }

    #[inline(always)]
    pub fn threads(&self) -> usize {
        self.threads
    }

    #[inline(always)]
    pub fn channel_id(&self) -> usize {
        self.channel.id()
    }

    /// Group-local state, once thread 0 has entered.
    pub fn state(&self) -> Option<&ChannelState<'a>> {
        self.state.get()
    }

    /// Called by every thread of the group before submitting commands.
    ///
    /// # Panics
    ///
    /// If `thread_id` is not below [`threads`](Self::threads).
    pub fn enter(&self, thread_id: usize) -> Context<'_> {
        assert!(
            thread_id < self.threads,
            "thread {thread_id} outside group of {}",
            self.threads
        );
        if thread_id == 0 && self.state.set(ChannelState::new(self.channel, &self.config)).is_ok() {
            debug!(channel = self.channel.id(), state = ?self.state.get(), "channel state initialized");
        }
        self.barrier.wait();
        let state = self
            .state
            .get()
            .expect("thread 0 initializes the channel state before the barrier");
        Context::new(state, thread_id as u32)
    }

    /// Called by every thread of the group when it is done.
    ///
    /// Thread 0 posts `FINALIZE`, waits for the drain to acknowledge it,
    /// flushes the write index to the shared descriptor and merges the
    /// group's profile into the runtime's per-channel profiler.
    pub fn exit(&self, ctx: Context<'_>) {
        self.barrier.wait();
        if ctx.thread_id() == 0 {
            let state = ctx.state();
            ctx.finalize();
            state.flush(self.channel.descriptor());
            self.global.accumulate(state.profiler());
            debug!(
                channel = self.channel.id(),
                write_idx = state.write_idx(),
                "execution group finalized"
            );
        }
        self.barrier.wait();
    }

    /// Runs `f` on `threads` scoped threads, wrapping each in
    /// [`enter`](Self::enter) and [`exit`](Self::exit).
    ///
    /// A thread whose `f` panics still takes part in `exit`, so the rest of
    /// the group is not left waiting at the barrier; the panic is then
    /// resumed and propagates out of `launch`.
    pub fn launch<F>(&self, f: F)
    where
        F: Fn(&Context<'_>) + Sync,
    {
        std::thread::scope(|s| {
            for thread_id in 0..self.threads {
                let f = &f;
                s.spawn(move || {
                    let ctx = self.enter(thread_id);
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(&ctx)));
                    self.exit(ctx);
                    if let Err(payload) = outcome {
                        warn!(channel = self.channel.id(), thread_id, "group thread panicked");
                        panic::resume_unwind(payload);
                    }
                });
            }
        });
    }
}

impl Drop for ExecutionGroup<'_> {
    fn drop(&mut self) {
        self.token.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ExecutionGroup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGroup")
            .field("channel", &self.channel.id())
            .field("threads", &self.threads)
            .field("state", &self.state.get())
            .finish()
    }
}
