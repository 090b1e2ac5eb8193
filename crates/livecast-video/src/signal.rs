//! Counting wake-up signal between the producer and the dispatch thread.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counting semaphore: every post allows one wait to return `true`.
#[derive(Debug, Default)]
pub struct FrameSignal {
    count: Mutex<u64>,
    cond: Condvar,
    /// Bumped by `interrupt` so a waiter can tell it from a stray wake-up.
    interrupts: AtomicU64,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one publication and wake the waiter.
    pub fn post(&self) {
        *self.count.lock() += 1;
        self.cond.notify_one();
    }

    /// Wait for a post for up to `timeout`. Returns `false` on timeout or
    /// after [`interrupt`](Self::interrupt).
    ///
    /// Wake-ups without a post keep waiting until the deadline.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        let seen = self.interrupts.load(Ordering::Acquire);
        while *count == 0 {
            if self.interrupts.load(Ordering::Acquire) != seen {
                return false;
            }
            if self.cond.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Wake the waiter without a post, e.g. at shutdown.
    pub fn interrupt(&self) {
        let _count = self.count.lock();
        self.interrupts.fetch_add(1, Ordering::AcqRel);
        self.cond.notify_all();
    }

    pub fn pending(&self) -> u64 {
        *self.count.lock()
    }
}
