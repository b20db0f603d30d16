//! # Reverse-Offload Channel
//!
//! A lock-free command queue that lets large groups of cooperating worker
//! threads (the *producers*) ask a host-side agent (the *drain*) to perform
//! communication operations on their behalf: remote puts and gets, fences,
//! barriers and collective reductions.
//!
//! Each channel is a fixed-capacity ring of 64-byte-aligned
//! [`QueueElement`]s plus a [`QueueDescriptor`] holding the shared read and
//! write indices and one completion byte per producer thread. All threads of
//! an [`ExecutionGroup`] share one channel: they claim slots with a
//! compare-and-swap on a group-local write index, pack the command, publish
//! it by raising the slot's `valid` flag, and (for blocking commands) poll
//! their completion byte until the drain acknowledges it.
//!
//! The pool of channels lives in one [`Region`]: a heap allocation when the
//! drain runs in the same process, or POSIX shared memory
//! ([`Runtime::create_shared`] / [`Runtime::open_shared`]) when it runs in
//! another one.
//!
//! ## Spin-Wait Behavior
//!
//! Producers **never block in the kernel**. Two waits exist, and both are
//! busy polls governed by a [`BackoffPolicy`]:
//!
//! - **Full ring:**
//!   When the group's cached read index says the ring is full, the claiming
//!   thread re-reads the host read index until a slot frees up. The cached
//!   copy is refreshed only then, so an uncontended enqueue touches no
//!   host-written cache line.
//!
//! - **Blocking commands:**
//!   `put`, `get`, `fence`, `quiet`, `barrier_all` and `reduce_to_all`
//!   return only after the drain stores `1` into the caller's completion
//!   byte. A thread waiting this way keeps a logical core busy unless a
//!   `Snooze` or `Sleep` policy is configured.
//!
//! - **Progress:**
//!   Nothing here can fail for lack of space. If no drain ever runs,
//!   producers spin forever.
//!
//! Phase timings (slot wait, packing, each fence, host wait) are recorded in
//! a [`Profiler`] per group and merged into the runtime when the group
//! exits.
//!
//! ## Example
//!
//! ```no_run
//! use ro_channel::{BackoffPolicy, Runtime, RuntimeConfig};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let rt = Runtime::new(RuntimeConfig::default().with_queue_capacity(16))?;
//! let stop = AtomicBool::new(false);
//! let group = rt.group(0, 4)?;
//! std::thread::scope(|s| {
//!     s.spawn(|| {
//!         let mut drain = rt.drain(0).unwrap();
//!         drain.serve(BackoffPolicy::Snooze, &stop, |req| println!("{req:?}"));
//!     });
//!     group.launch(|ctx| {
//!         let mut buf = [0u8; 8];
//!         ctx.put_nbi(buf.as_mut_ptr(), buf.as_ptr(), buf.len(), 1);
//!         ctx.quiet();
//!     });
//!     stop.store(true, Ordering::Release);
//! });
//! # Ok::<(), ro_channel::Error>(())
//! ```
//!
//! ## License
//!
//! Copyright © 2005–2025
//! IKH Software, Inc.
//!
//! Licensed under the terms of the **GNU Lesser General Public License**,
//! version 3.0, or (at your option) any later version.
//!
//! See <https://www.gnu.org/licenses/lgpl-3.0.html> for details.

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

mod backoff;
mod claim;
mod config;
mod context;
mod descriptor;
mod drain;
mod element;
mod error;
mod group;
mod pool;
mod profiler;
mod region;
mod runtime;
mod utils;

pub use backoff::{BackoffPolicy, Wait, WaitState, wait_until};
pub use claim::{claim_index, is_full};
pub use config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_THREADS_PER_CHANNEL, RuntimeConfig};
pub use context::{ChannelState, Compare, Context, ToAll};
pub use descriptor::QueueDescriptor;
pub use drain::{Drain, Request};
pub use element::{Body, Command, DataType, ELEMENT_SIZE, InlineValue, QueueElement, ReduceOp};
pub use error::{Error, Result};
pub use group::{ExecutionGroup, GroupBarrier};
pub use pool::{Channel, ChannelPool, PoolLayout};
pub use profiler::{ProfileSnapshot, Profiler, Stat};
pub use region::{HeapRegion, REGION_ALIGN, Region, ShmRegion};
pub use runtime::Runtime;
pub use utils::{Trials, mono_time_ns};
