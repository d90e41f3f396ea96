//! Queue-based dispatcher, emulating a UI event loop
//!
//! Tasks can be posted from any thread, but only run when the thread which
//! created the dispatcher drains its queue. This is how a main-thread looper
//! behaves, and lets tests reproduce its threading guarantees faithfully.

use crate::dispatch::{self, Dispatcher, Task};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::warn;


/// Dispatcher whose tasks run on the thread that created it
pub struct QueueDispatcher {
    /// Thread which is allowed to drain the queue
    owner: ThreadId,

    /// Tasks waiting for the owner thread (mutex-protected)
    queue: Mutex<VecDeque<Task>>,

    /// Condition variable used to wake the owner thread when work arrives
    posted_cv: Condvar,
}
//
impl QueueDispatcher {
    /// Create a dispatcher owned by the calling thread
    ///
    /// The calling thread gets flagged as a dispatcher thread, so that blocking
    /// waits on futures are refused there from now on.
    ///
    pub fn new() -> Self {
        dispatch::mark_dispatcher_thread();
        QueueDispatcher {
            owner: thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
            posted_cv: Condvar::new(),
        }
    }

    /// Number of tasks waiting to be run
    pub fn pending(&self) -> usize {
        self.lock_queue().len()
    }

    /// Run every task that is currently queued, return how many ran
    ///
    /// Tasks posted while draining are run too. Calls from a thread other than
    /// the owner are ignored.
    ///
    pub fn run_pending(&self) -> usize {
        if !self.check_owner() {
            return 0;
        }
        let mut ran = 0;
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        ran
    }

    /// Keep running tasks until the condition holds or the timeout expires
    ///
    /// Returns whether the condition was eventually met.
    ///
    pub fn run_until<F: FnMut() -> bool>(&self,
                                          mut condition: F,
                                          timeout: Duration) -> bool {
        if !self.check_owner() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if condition() {
                return true;
            }

            // Sleep until new work arrives, or we run out of time
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let queue = self.lock_queue();
            if queue.is_empty() {
                let _ = self.posted_cv.wait_timeout(queue, deadline - now);
            }
        }
    }

    fn pop(&self) -> Option<Task> {
        self.lock_queue().pop_front()
    }

    fn lock_queue(&self) -> MutexGuard<VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_owner(&self) -> bool {
        let owner = self.is_current();
        if !owner {
            warn!("Queue dispatcher drained from a foreign thread, ignoring");
        }
        owner
    }
}
//
impl Default for QueueDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
//
impl Drop for QueueDispatcher {
    fn drop(&mut self) {
        if self.is_current() {
            dispatch::unmark_dispatcher_thread();
        }
    }
}
//
impl Dispatcher for QueueDispatcher {
    fn is_current(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn post(&self, task: Task) {
        self.lock_queue().push_back(task);
        self.posted_cv.notify_all();
    }
}
