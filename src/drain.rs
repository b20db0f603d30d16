//! Host side of a channel: consumes published elements in ring order and
//! acknowledges blocking commands.
//!
//! The drain is the single consumer of its channel. For each element it
//! copies the body out, clears `valid`, and advances the shared read index,
//! which is what lets producers reuse the slot. Performing the requested
//! operation (copying memory, running a collective) is up to the caller;
//! [`Drain::complete`] then releases a blocked thread.

use crate::backoff::{BackoffPolicy, Wait, WaitState};
use crate::element::{Body, Command, InlineValue};
use crate::pool::Channel;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{trace, warn};

/// One command taken off the ring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Request {
    /// Ring position the command was read from, counted from channel creation.
    pub index: u64,
    pub body: Body,
}

impl Request {
    #[inline(always)]
    pub fn kind(&self) -> Command {
        self.body.kind
    }

    #[inline(always)]
    pub fn thread_id(&self) -> u32 {
        self.body.thread_id
    }

    #[inline(always)]
    pub fn is_blocking(&self) -> bool {
        self.body.kind.is_blocking()
    }

    /// The value of a `PutInline` command, decoded as `V`.
    ///
    /// Returns `None` for other commands or if the recorded size is not
    /// `V`'s size.
    pub fn inline_value<V: InlineValue>(&self) -> Option<V> {
        (self.body.kind == Command::PutInline && self.body.size == V::SIZE as u64)
            .then(|| V::from_inline(self.body.src))
    }
}

pub struct Drain<'a> {
    channel: Channel<'a>,
    read_idx: u64,
    token: &'a AtomicBool,
}

impl<'a> Drain<'a> {
    /// `token` must already be held for `channel`; it is released on drop.
    pub(crate) fn new(channel: Channel<'a>, token: &'a AtomicBool) -> Self {
        Self {
            read_idx: channel.descriptor().read_idx(),
            channel,
            token,
        }
    }

    #[inline(always)]
    pub fn channel_id(&self) -> usize {
        self.channel.id()
    }

    /// Index of the next element to consume.
    #[inline(always)]
    pub fn read_idx(&self) -> u64 {
        self.read_idx
    }

    /// Takes the next element if it has been published.
    pub fn try_next(&mut self) -> Option<Request> {
        let slot = &self.channel.ring()[(self.read_idx % self.channel.capacity()) as usize];
        if !slot.is_valid() {
            return None;
        }
        // `valid` was observed with acquire ordering.
        let body = unsafe { slot.read() };
        slot.clear();
        let index = self.read_idx;
        self.read_idx += 1;
        self.channel.descriptor().store_read_idx(self.read_idx);
        trace!(channel = self.channel.id(), index, kind = ?body.kind, thread_id = body.thread_id, "drained");
        Some(Request { index, body })
    }

    /// Waits for the next element, polling with `policy`, until `cancel` is
    /// raised.
    pub fn next_until(&mut self, policy: BackoffPolicy, cancel: &AtomicBool) -> Option<Request> {
        let mut next = None;
        let mut wait = Wait::new(policy, || {
            next = self.try_next();
            next.is_some()
        });
        match wait.run_cancellable(cancel) {
            WaitState::Ready => next,
            _ => None,
        }
    }

    /// Releases a thread blocked on a command.
    ///
    /// The id comes from shared memory; an id outside the status array is
    /// logged and ignored.
    #[inline(always)]
    pub fn complete(&self, thread_id: u32) {
        match self.channel.status().get(thread_id as usize) {
            Some(status) => status.store(1, Ordering::Release),
            None => warn!(
                channel = self.channel.id(),
                thread_id,
                threads = self.channel.status().len(),
                "completion for thread outside the status array"
            ),
        }
    }

    /// Handles every element currently published, acknowledging blocking
    /// ones after `f` returns. Returns the number handled.
    pub fn poll(&mut self, mut f: impl FnMut(&Request)) -> usize {
        let mut handled = 0;
        while let Some(req) = self.try_next() {
            f(&req);
            if req.is_blocking() {
                self.complete(req.thread_id());
            }
            handled += 1;
        }
        handled
    }

    /// Polls until `stop` is raised, then drains what is left. Returns the
    /// number of elements handled.
    pub fn serve(&mut self, policy: BackoffPolicy, stop: &AtomicBool, mut f: impl FnMut(&Request)) -> usize {
        let mut handled = 0;
        while let Some(req) = self.next_until(policy, stop) {
            f(&req);
            if req.is_blocking() {
                self.complete(req.thread_id());
            }
            handled += 1;
        }
        handled + self.poll(f)
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        self.token.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Drain<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain")
            .field("channel", &self.channel.id())
            .field("read_idx", &self.read_idx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Runtime;
    use std::thread;
    use std::time::Duration;

    fn publish(channel: Channel<'_>, index: u64, body: Body) {
        let slot = &channel.ring()[(index % channel.capacity()) as usize];
        unsafe { slot.pack(body) };
        slot.publish();
    }

    #[test]
    fn consumes_in_order_and_advances_read_index() {
        let rt = Runtime::new(RuntimeConfig::default().with_queue_capacity(2)).unwrap();
        let ch = rt.channel(0).unwrap();
        let mut drain = rt.drain(0).unwrap();
        assert!(drain.try_next().is_none());

        for i in 0..5u64 {
            publish(ch, i, Body::new(Command::PutNbi, 0, i, 0, 0, 0));
            let req = drain.try_next().unwrap();
            assert_eq!((req.index, req.body.size), (i, i));
            assert!(!ch.ring()[(i % 2) as usize].is_valid());
            assert_eq!(ch.descriptor().read_idx(), i + 1);
        }
        assert_eq!(drain.read_idx(), 5);
    }

    #[test]
    fn poll_completes_blocking_commands_only() {
        let rt = Runtime::new(RuntimeConfig::default().with_threads_per_channel(4)).unwrap();
        let ch = rt.channel(0).unwrap();
        let mut drain = rt.drain(0).unwrap();

        publish(ch, 0, Body::new(Command::PutNbi, 0, 8, 0, 0, 1));
        publish(ch, 1, Body::new(Command::Quiet, 0, 0, 0, 0, 2));
        publish(ch, 2, Body::new(Command::PutInline, 0, 4, 7, 0, 3));

        let mut kinds = Vec::new();
        assert_eq!(drain.poll(|r| kinds.push(r.kind())), 3);
        assert_eq!(kinds, [Command::PutNbi, Command::Quiet, Command::PutInline]);
        let status: Vec<_> = ch.status().iter().map(|s| s.load(Ordering::Acquire)).collect();
        assert_eq!(status, [0, 0, 1, 0]);
    }

    #[test]
    fn corrupt_thread_id_is_not_completed() {
        let rt = Runtime::new(RuntimeConfig::default().with_threads_per_channel(2)).unwrap();
        let ch = rt.channel(0).unwrap();
        let mut drain = rt.drain(0).unwrap();

        publish(ch, 0, Body::new(Command::Quiet, 0, 0, 0, 0, 99));
        publish(ch, 1, Body::new(Command::Quiet, 0, 0, 0, 0, 1));

        assert_eq!(drain.poll(|_| {}), 2);
        let status: Vec<_> = ch.status().iter().map(|s| s.load(Ordering::Acquire)).collect();
        assert_eq!(status, [0, 1]);
        drain.complete(u32::MAX);
    }

    #[test]
    fn inline_value_checks_kind_and_size() {
        let inline = Request {
            index: 0,
            body: Body::new(Command::PutInline, 0, 4, (-3i32).to_inline(), 0, 0),
        };
        assert_eq!(inline.inline_value::<i32>(), Some(-3));
        assert_eq!(inline.inline_value::<u64>(), None);

        let put = Request {
            index: 0,
            body: Body::new(Command::Put, 0, 4, 0, 0, 0),
        };
        assert_eq!(put.inline_value::<i32>(), None);
    }

    #[test]
    fn serve_stops_on_request() {
        let rt = Runtime::new(RuntimeConfig::default()).unwrap();
        let ch = rt.channel(0).unwrap();
        let stop = AtomicBool::new(false);

        let handled = thread::scope(|s| {
            let server = s.spawn(|| {
                let mut drain = rt.drain(0).unwrap();
                drain.serve(BackoffPolicy::Snooze, &stop, |_| {})
            });
            for i in 0..3 {
                publish(ch, i, Body::new(Command::GetNbi, 0, 0, 0, 0, 0));
            }
            thread::sleep(Duration::from_millis(5));
            stop.store(true, Ordering::Release);
            server.join().unwrap()
        });
        assert_eq!(handled, 3);
    }
}
