use crate::backoff::{BackoffPolicy, wait_until};
use crate::claim::{claim_index, is_full};
use crate::config::RuntimeConfig;
use crate::descriptor::QueueDescriptor;
use crate::element::{Body, Command, DataType, InlineValue, QueueElement, ReduceOp};
use crate::error::{Error, Result};
use crate::pool::Channel;
use crate::profiler::{Profiler, Stat};
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering, fence};
use tracing::{error, trace};

/// Producer-side mirror of a channel, shared by the threads of one
/// execution group.
///
/// `write_idx` is the slot counter all threads of the group race on; it is
/// flushed to the shared descriptor only when the group exits. `read_idx`
/// lags behind the host's read index and is refreshed only when the ring
/// looks full.
pub struct ChannelState<'a> {
    read_idx: CachePadded<AtomicU64>,
    write_idx: CachePadded<AtomicU64>,
    ring: &'a [QueueElement],
    host_read_idx: &'a AtomicU64,
    status: &'a [AtomicU8],
    capacity: u64,
    profiler: Profiler,
    slot_backoff: BackoffPolicy,
    completion_backoff: BackoffPolicy,
}

impl<'a> ChannelState<'a> {
    /// Copies the channel's shared fields one by one into local state.
    pub(crate) fn new(channel: Channel<'a>, cfg: &RuntimeConfig) -> Self {
        let desc = channel.descriptor();
        let profiler = Profiler::new(cfg.profiling);
        profiler.reset();
        Self {
            write_idx: CachePadded::new(AtomicU64::new(desc.write_idx())),
            read_idx: CachePadded::new(AtomicU64::new(desc.read_idx())),
            status: channel.status(),
            host_read_idx: desc.host_read_idx(),
            ring: channel.ring(),
            capacity: channel.capacity(),
            profiler,
            slot_backoff: cfg.slot_backoff,
            completion_backoff: cfg.completion_backoff,
        }
    }

    #[inline(always)]
    pub fn read_idx(&self) -> u64 {
        self.read_idx.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn write_idx(&self) -> u64 {
        self.write_idx.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline(always)]
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Writes the local write index back to the shared descriptor.
    pub(crate) fn flush(&self, desc: &QueueDescriptor) {
        desc.store_write_idx(self.write_idx());
    }

    /// Posts one command, waiting for completion if the command is blocking.
    ///
    /// 1. claim a slot number (polling the host read index while full),
    /// 2. pack the body,
    /// 3. fence, publish `valid`, fence,
    /// 4. for blocking commands, wait on the thread's completion byte.
    pub(crate) fn enqueue(&self, thread_id: u32, body: Body) {
        debug_assert_eq!(body.thread_id, thread_id);

        let start = self.profiler.start_timer();
        let backoff = Backoff::new();
        let mut reported = false;
        let claimed = claim_index(&self.write_idx, |candidate| {
            if !is_full(self.read_idx(), candidate, self.capacity) {
                return true;
            }
            if !reported {
                trace!(candidate, capacity = self.capacity, "ring full, polling host read index");
                reported = true;
            }
            let poll = self.profiler.start_timer();
            // Racing pollers may observe older host values; fetch_max keeps
            // the local copy monotonic.
            let host = self.host_read_idx.load(Ordering::Acquire);
            let read = self.read_idx.fetch_max(host, Ordering::AcqRel).max(host);
            let room = !is_full(read, candidate, self.capacity);
            if !room {
                self.slot_backoff.pause(&backoff);
            }
            self.profiler.end_timer(poll, Stat::PollHost);
            // On `false` the candidate is reloaded, so a thread whose
            // candidate was overtaken never waits on it.
            room
        });
        self.profiler.end_timer(start, Stat::WaitSlot);

        let slot = &self.ring[(claimed % self.capacity) as usize];
        debug_assert!(!slot.is_valid(), "claimed slot {claimed} still holds a command");

        let start = self.profiler.start_timer();
        // The slot was released by the consumer before the read index we
        // checked against moved past it.
        unsafe { slot.pack(body) };
        self.profiler.end_timer(start, Stat::Pack);

        let start = self.profiler.start_timer();
        fence(Ordering::SeqCst);
        self.profiler.end_timer(start, Stat::Fence1);

        let start = self.profiler.start_timer();
        slot.publish();
        fence(Ordering::SeqCst);
        self.profiler.end_timer(start, Stat::Fence2);

        if body.kind.is_blocking() {
            let start = self.profiler.start_timer();
            self.wait_completion(thread_id);
            self.profiler.end_timer(start, Stat::WaitHost);
        }
    }

    fn wait_completion(&self, thread_id: u32) {
        let status = &self.status[thread_id as usize];
        trace!(thread_id, "waiting on host completion");
        wait_until(self.completion_backoff, || status.load(Ordering::Acquire) != 0);
        status.store(0, Ordering::Release);
        fence(Ordering::SeqCst);
    }
}

impl Debug for ChannelState<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("read_idx", &self.read_idx())
            .field("write_idx", &self.write_idx())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Parameters of a collective reduction posted with
/// [`Context::reduce_to_all`].
#[derive(Clone, Copy, Debug)]
pub struct ToAll {
    pub dst: *mut u8,
    pub src: *const u8,
    /// Number of elements to reduce.
    pub count: usize,
    pub pe_start: u32,
    pub log_pe_stride: u32,
    pub pe_size: u32,
    pub work: *mut u8,
    pub sync: *mut i64,
    pub op: ReduceOp,
    pub datatype: DataType,
}

/// Comparison used by [`Context::wait_until`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Compare {
    #[inline(always)]
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Compare::Eq => lhs == rhs,
            Compare::Ne => lhs != rhs,
            Compare::Gt => lhs > rhs,
            Compare::Ge => lhs >= rhs,
            Compare::Lt => lhs < rhs,
            Compare::Le => lhs <= rhs,
        }
    }
}

#[inline(always)]
fn addr<T>(ptr: *const T) -> u64 {
    ptr as usize as u64
}

/// One thread's handle on its group's channel.
///
/// Addresses are opaque to the producer side: they are recorded in the
/// command and interpreted by the host agent. Queue-full conditions are
/// absorbed by polling, so none of the submission calls can fail.
#[derive(Clone, Copy)]
pub struct Context<'g> {
    state: &'g ChannelState<'g>,
    thread_id: u32,
}

impl<'g> Context<'g> {
    pub(crate) fn new(state: &'g ChannelState<'g>, thread_id: u32) -> Self {
        Self { state, thread_id }
    }

    #[inline(always)]
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    #[inline(always)]
    pub fn state(&self) -> &'g ChannelState<'g> {
        self.state
    }

    #[inline(always)]
    fn post(&self, kind: Command, dst: u64, src: u64, size: u64, pe: u32) {
        self.state
            .enqueue(self.thread_id, Body::new(kind, pe, size, src, dst, self.thread_id));
    }

    /// Copies `len` bytes from local `src` to `dst` on `pe`; returns once the
    /// host has completed the transfer.
    pub fn put(&self, dst: *mut u8, src: *const u8, len: usize, pe: u32) {
        self.post(Command::Put, addr(dst), addr(src), len as u64, pe);
    }

    /// Copies `len` bytes from `src` on `pe` to local `dst`; returns once the
    /// data has arrived.
    pub fn get(&self, dst: *mut u8, src: *const u8, len: usize, pe: u32) {
        self.post(Command::Get, addr(dst), addr(src), len as u64, pe);
    }

    /// Non-blocking [`Context::put`]: returns as soon as the command is queued.
    pub fn put_nbi(&self, dst: *mut u8, src: *const u8, len: usize, pe: u32) {
        self.post(Command::PutNbi, addr(dst), addr(src), len as u64, pe);
    }

    /// Non-blocking [`Context::get`]: returns as soon as the command is queued.
    pub fn get_nbi(&self, dst: *mut u8, src: *const u8, len: usize, pe: u32) {
        self.post(Command::GetNbi, addr(dst), addr(src), len as u64, pe);
    }

    /// Stores a single value at `dst` on `pe`. The value travels inside the
    /// command itself.
    pub fn put_inline<V: InlineValue>(&self, dst: *mut V, value: V, pe: u32) {
        self.post(
            Command::PutInline,
            addr(dst),
            value.to_inline(),
            V::SIZE as u64,
            pe,
        );
    }

    /// Orders this thread's earlier non-blocking operations before later ones.
    pub fn fence(&self) {
        self.post(Command::Fence, 0, 0, 0, 0);
    }

    /// Waits until all of this thread's outstanding operations have retired.
    pub fn quiet(&self) {
        self.post(Command::Quiet, 0, 0, 0, 0);
    }

    pub fn barrier_all(&self) {
        self.post(Command::BarrierAll, 0, 0, 0, 0);
    }

    pub fn sync_all(&self) {
        self.post(Command::BarrierAll, 0, 0, 0, 0);
    }

    /// Posts a collective reduction and waits for the host to finish it.
    pub fn reduce_to_all(&self, req: &ToAll) {
        let mut body = Body::new(
            Command::ToAll,
            req.pe_start,
            req.count as u64,
            addr(req.src),
            addr(req.dst),
            self.thread_id,
        );
        body.log_pe_stride = req.log_pe_stride;
        body.pe_size = req.pe_size;
        body.op = req.op;
        body.datatype = req.datatype;
        body.work = addr(req.work);
        body.sync = addr(req.sync);
        self.state.enqueue(self.thread_id, body);
    }

    /// Polls a local variable until `cmp(value, target)` holds.
    pub fn wait_until(&self, var: &AtomicI64, cmp: Compare, target: i64) {
        let profiler = self.state.profiler();
        let start = profiler.start_timer();
        wait_until(self.state.completion_backoff, || {
            cmp.holds(var.load(Ordering::Acquire), target)
        });
        profiler.end_timer(start, Stat::Wait);
    }

    pub(crate) fn finalize(&self) {
        self.post(Command::Finalize, 0, 0, 0, 0);
    }

    pub fn amo_fetch_add(&self, _dst: *mut i64, _value: i64, _pe: u32) -> Result<i64> {
        Err(self.unsupported("amo_fetch_add"))
    }

    pub fn amo_add(&self, _dst: *mut i64, _value: i64, _pe: u32) -> Result<()> {
        Err(self.unsupported("amo_add"))
    }

    pub fn amo_fetch_cas(&self, _dst: *mut i64, _value: i64, _cond: i64, _pe: u32) -> Result<i64> {
        Err(self.unsupported("amo_fetch_cas"))
    }

    pub fn amo_cas(&self, _dst: *mut i64, _value: i64, _cond: i64, _pe: u32) -> Result<()> {
        Err(self.unsupported("amo_cas"))
    }

    #[cold]
    fn unsupported(&self, op: &'static str) -> Error {
        error!(thread_id = self.thread_id, op, "atomic operation not supported on reverse-offload path");
        Error::Unsupported { op }
    }
}

impl Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("thread_id", &self.thread_id)
            .field("state", self.state)
            .finish()
    }
}
