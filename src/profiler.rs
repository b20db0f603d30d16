use crate::utils::mono_time_ns;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Timed phases of command submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Stat {
    /// Waiting for a free ring slot (full-queue polling and CAS retries).
    WaitSlot = 0,
    /// Fence ordering the packed body before `valid`.
    Fence1 = 1,
    /// Fence ordering the `valid` store.
    Fence2 = 2,
    /// Packing the element body.
    Pack = 3,
    /// Waiting on the host to complete a blocking command.
    WaitHost = 4,
    /// Polling local memory in `Context::wait_until`.
    Wait = 5,
    /// One poll of the host read index while the ring looked full, including
    /// the backoff pause after an unsuccessful poll.
    PollHost = 6,
}

impl Stat {
    pub const COUNT: usize = 7;

    pub const ALL: [Stat; Self::COUNT] = [
        Stat::WaitSlot,
        Stat::Fence1,
        Stat::Fence2,
        Stat::Pack,
        Stat::WaitHost,
        Stat::Wait,
        Stat::PollHost,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Stat::WaitSlot => "wait_slot",
            Stat::Fence1 => "fence1",
            Stat::Fence2 => "fence2",
            Stat::Pack => "pack",
            Stat::WaitHost => "wait_host",
            Stat::Wait => "wait",
            Stat::PollHost => "poll_host",
        }
    }
}

/// Accumulated time and event count per [`Stat`].
///
/// Counters are atomics so every thread of an execution group can record
/// into the group's profiler, and groups can merge into the runtime's
/// per-channel profiler without locking. A disabled profiler records nothing
/// and never reads the clock.
pub struct Profiler {
    enabled: bool,
    time_ns: [AtomicU64; Stat::COUNT],
    events: [AtomicU64; Stat::COUNT],
}

impl Profiler {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            time_ns: Default::default(),
            events: Default::default(),
        }
    }

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline(always)]
    pub fn start_timer(&self) -> u64 {
        if self.enabled { mono_time_ns() } else { 0 }
    }

    #[inline(always)]
    pub fn end_timer(&self, start: u64, stat: Stat) {
        if self.enabled {
            let elapsed = mono_time_ns().saturating_sub(start);
            self.time_ns[stat as usize].fetch_add(elapsed, Ordering::Relaxed);
            self.events[stat as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        for i in 0..Stat::COUNT {
            self.time_ns[i].store(0, Ordering::Relaxed);
            self.events[i].store(0, Ordering::Relaxed);
        }
    }

    /// Adds every counter of `other` into `self`.
    pub fn accumulate(&self, other: &Profiler) {
        for i in 0..Stat::COUNT {
            self.time_ns[i].fetch_add(other.time_ns[i].load(Ordering::Relaxed), Ordering::Relaxed);
            self.events[i].fetch_add(other.events[i].load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            time_ns: std::array::from_fn(|i| self.time_ns[i].load(Ordering::Relaxed)),
            events: std::array::from_fn(|i| self.events[i].load(Ordering::Relaxed)),
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("enabled", &self.enabled)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Point-in-time copy of a [`Profiler`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    time_ns: [u64; Stat::COUNT],
    events: [u64; Stat::COUNT],
}

impl ProfileSnapshot {
    #[inline(always)]
    pub fn time_ns(&self, stat: Stat) -> u64 {
        self.time_ns[stat as usize]
    }

    #[inline(always)]
    pub fn events(&self, stat: Stat) -> u64 {
        self.events[stat as usize]
    }

    /// `true` if no counter of `self` is below the same counter of `other`.
    pub fn dominates(&self, other: &ProfileSnapshot) -> bool {
        Stat::ALL
            .iter()
            .all(|&s| self.time_ns(s) >= other.time_ns(s) && self.events(s) >= other.events(s))
    }
}
