use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How a poll loop pauses between two unsuccessful polls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Issue a spin-loop hint (`pause` on x86_64) and poll again.
    #[default]
    Spin,
    /// Exponential spinning that falls back to yielding the thread.
    Snooze,
    /// Sleep for a fixed, bounded interval.
    Sleep(Duration),
}

impl BackoffPolicy {
    /// Pauses once. `backoff` carries the step count for `Snooze` across
    /// calls; the other policies ignore it.
    #[inline(always)]
    pub fn pause(self, backoff: &crossbeam_utils::Backoff) {
        match self {
            BackoffPolicy::Spin => core::hint::spin_loop(),
            BackoffPolicy::Snooze => backoff.snooze(),
            BackoffPolicy::Sleep(interval) => std::thread::sleep(interval),
        }
    }
}

/// Observable state of a [`Wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitState {
    Waiting,
    Ready,
    Cancelled,
}

/// Busy-poll state machine: `Waiting` until `ready` returns `true`.
///
/// [`Wait::step`] performs exactly one non-blocking poll, so callers (and
/// tests) can drive the machine by hand. [`Wait::run`] loops with the
/// configured backoff until ready.
pub struct Wait<F> {
    ready: F,
    policy: BackoffPolicy,
    backoff: crossbeam_utils::Backoff,
    state: WaitState,
    polls: u64,
}

impl<F: FnMut() -> bool> Wait<F> {
    pub fn new(policy: BackoffPolicy, ready: F) -> Self {
        Self {
            ready,
            policy,
            backoff: crossbeam_utils::Backoff::new(),
            state: WaitState::Waiting,
            polls: 0,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Number of polls performed so far.
    #[inline(always)]
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Polls once. A machine that is no longer `Waiting` keeps its state.
    #[inline(always)]
    pub fn step(&mut self) -> WaitState {
        if self.state == WaitState::Waiting {
            self.polls += 1;
            if (self.ready)() {
                self.state = WaitState::Ready;
            }
        }
        self.state
    }

    /// Polls until ready.
    #[inline(always)]
    pub fn run(&mut self) {
        while self.step() == WaitState::Waiting {
            self.pause();
        }
    }

    /// Polls until ready or until `cancel` is raised.
    pub fn run_cancellable(&mut self, cancel: &AtomicBool) -> WaitState {
        while self.step() == WaitState::Waiting {
            if cancel.load(Ordering::Acquire) {
                self.state = WaitState::Cancelled;
                break;
            }
            self.pause();
        }
        self.state
    }

    #[inline(always)]
    fn pause(&self) {
        self.policy.pause(&self.backoff);
    }
}

/// Spins with `policy` until `ready` returns `true`.
#[inline(always)]
pub fn wait_until(policy: BackoffPolicy, ready: impl FnMut() -> bool) {
    Wait::new(policy, ready).run();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn step_transitions_waiting_to_ready() {
        let mut remaining = 2;
        let mut wait = Wait::new(BackoffPolicy::Spin, || {
            remaining -= 1;
            remaining == 0
        });
        assert_eq!(wait.state(), WaitState::Waiting);
        assert_eq!(wait.step(), WaitState::Waiting);
        assert_eq!(wait.step(), WaitState::Ready);
        // Ready is terminal and does not poll again.
        assert_eq!(wait.step(), WaitState::Ready);
        assert_eq!(wait.polls(), 2);
    }

    #[test]
    fn instant_completion_polls_once() {
        let mut wait = Wait::new(BackoffPolicy::Sleep(Duration::from_secs(10)), || true);
        let start = Instant::now();
        wait.run();
        assert_eq!(wait.polls(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn run_observes_other_thread() {
        for policy in [
            BackoffPolicy::Spin,
            BackoffPolicy::Snooze,
            BackoffPolicy::Sleep(Duration::from_micros(50)),
        ] {
            let flag = Arc::new(AtomicU32::new(0));
            let setter = {
                let flag = Arc::clone(&flag);
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5));
                    flag.store(1, Ordering::Release);
                })
            };
            wait_until(policy, || flag.load(Ordering::Acquire) == 1);
            setter.join().unwrap();
        }
    }

    #[test]
    fn cancellation_stops_waiting() {
        let cancel = AtomicBool::new(true);
        let mut wait = Wait::new(BackoffPolicy::Snooze, || false);
        assert_eq!(wait.run_cancellable(&cancel), WaitState::Cancelled);
        assert_eq!(wait.polls(), 1);
    }

    #[test]
    fn cancellation_does_not_override_ready() {
        let cancel = AtomicBool::new(true);
        let mut wait = Wait::new(BackoffPolicy::Spin, || true);
        assert_eq!(wait.run_cancellable(&cancel), WaitState::Ready);
    }
}
