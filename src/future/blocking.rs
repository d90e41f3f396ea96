//! Blocking-based future monitoring
//!
//! This module provides a way to synchronize with an observable future by
//! blocking until its outcome arrives. This synchronization mechanism is easy
//! to use and reason about, but should be used with care as the unpredictable
//! delays that it introduces can be harmful to performance. And it must never
//! be used on a dispatcher thread, which could be the very thread that the
//! outcome needs in order to be delivered.

use crate::dispatch;
use crate::error::{Error, Failure};
use crate::future::ObservableFuture;
use crate::status::FutureStatus;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;


impl<T: Send + 'static> ObservableFuture<T> {
    /// Block until the outcome of the future is available
    ///
    /// The future must not have listeners or be observed already, since the
    /// outcome is delivered to the caller instead.
    ///
    pub fn execute(&self) -> Result<T, Failure> {
        self.wait(None)
    }

    /// Block until the outcome is available, or the timeout expires
    ///
    /// On timeout, the future is cancelled and `Error::Timeout` is returned.
    ///
    pub fn execute_timeout(&self, timeout: Duration) -> Result<T, Failure> {
        self.wait(Some(timeout))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<T, Failure> {
        assert_not_dispatcher()?;

        // Start by building the shared slot...
        let slot = Arc::new(Slot {
            state: Mutex::new(SlotState { outcome: None, senders: 0 }),
            filled_cv: Condvar::new(),
        });

        // ...then route both listeners into it
        let on_success = SlotSender::new(&slot);
        let on_failure = SlotSender::new(&slot);
        self.subscribe(move |value| on_success.send(Ok(value)),
                       move |failure| on_failure.send(Err(failure)))
            .map_err(|_| Error::AlreadyObserving)?;

        match slot.wait(timeout) {
            Waited::Outcome(outcome) => outcome,
            Waited::TimedOut(timeout) => {
                debug!(?timeout, "Blocking wait timed out, cancelling future");
                self.cancel();
                Err(Error::Timeout(timeout).into())
            }
            Waited::Closed => {
                if self.status() == FutureStatus::Cancelled {
                    Err(Error::Cancelled.into())
                } else {
                    Err(Error::NoResult.into())
                }
            }
        }
    }
}


/// Fail if the calling thread drives a dispatcher
pub fn assert_not_dispatcher() -> Result<(), Error> {
    if dispatch::is_dispatcher_thread() {
        Err(Error::BlockingOnDispatcher)
    } else {
        Ok(())
    }
}


/// Rendez-vous point between the listeners and the waiting thread
struct Slot<T> {
    /// Outcome and number of live listeners (mutex-protected)
    state: Mutex<SlotState<T>>,

    /// Condition variable used to wake up the waiting thread
    filled_cv: Condvar,
}
//
struct SlotState<T> {
    /// Outcome of the future, once delivered
    outcome: Option<Result<T, Failure>>,

    /// Listeners which may still deliver an outcome
    senders: usize,
}
//
impl<T> Slot<T> {
    fn lock_state(&self) -> MutexGuard<SlotState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait for an outcome, for all listeners to be gone, or for the timeout
    fn wait(&self, timeout: Option<Duration>) -> Waited<T> {
        let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
        let mut state = self.lock_state();
        loop {
            if let Some(outcome) = state.outcome.take() {
                return Waited::Outcome(outcome);
            }
            if state.senders == 0 {
                return Waited::Closed;
            }
            state = match deadline {
                None => self.filled_cv
                            .wait(state)
                            .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Waited::TimedOut(timeout);
                    }
                    self.filled_cv
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }
}
//
enum Waited<T> {
    Outcome(Result<T, Failure>),
    TimedOut(Duration),
    Closed,
}


/// Listener-side handle of a slot
///
/// When a listener is dropped without being called, as happens on
/// cancellation, the waiting thread must hear about it rather than block
/// forever.
///
struct SlotSender<T> {
    slot: Arc<Slot<T>>,
}
//
impl<T> SlotSender<T> {
    fn new(slot: &Arc<Slot<T>>) -> Self {
        slot.lock_state().senders += 1;
        SlotSender { slot: slot.clone() }
    }

    fn send(self, outcome: Result<T, Failure>) {
        self.slot.lock_state().outcome = Some(outcome);
    }
}
//
impl<T> Drop for SlotSender<T> {
    fn drop(&mut self) {
        self.slot.lock_state().senders -= 1;
        self.slot.filled_cv.notify_all();
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::QueueDispatcher;
    use std::io;
    use std::thread;

    /// Check that already resolved futures don't block
    #[test]
    fn resolved() {
        assert_eq!(ObservableFuture::with_data("First").execute().unwrap(),
                   "First");
        let failure = ObservableFuture::<u32>::with_error(
            io::Error::new(io::ErrorKind::NotFound, "Not found")
        ).execute().unwrap_err();
        assert!(failure.is::<io::Error>());
    }

    /// Check that waiting for an outcome from another thread works
    #[test]
    fn wait() {
        let (completer, future) = ObservableFuture::pending();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            completer.complete("Second");
        });
        let result = future.execute_timeout(Duration::from_secs(5));
        assert_eq!(result.unwrap(), "Second");
        worker.join().unwrap();
    }

    /// Check that timeouts cancel the future
    #[test]
    fn timeout() {
        let (completer, future) = ObservableFuture::<u32>::pending();
        let failure = future.execute_timeout(Duration::from_millis(20))
                            .unwrap_err();
        assert_eq!(failure.downcast_ref::<Error>(),
                   Some(&Error::Timeout(Duration::from_millis(20))));
        assert!(completer.is_cancelled());
    }

    /// Cancellation while waiting wakes the waiter up
    #[test]
    fn cancelled_while_waiting() {
        let (completer, future) = ObservableFuture::<u32>::pending();
        let canceller = future.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
            completer
        });
        let failure = future.execute_timeout(Duration::from_secs(5)).unwrap_err();
        assert_eq!(failure.downcast_ref::<Error>(), Some(&Error::Cancelled));
        let _completer = worker.join().unwrap();
    }

    /// Futures that already have a subscriber cannot be waited for
    #[test]
    fn already_observed() {
        let future = ObservableFuture::with_data(1u32);
        future.observe_on_caller().unwrap();
        let failure = future.execute().unwrap_err();
        assert_eq!(failure.downcast_ref::<Error>(),
                   Some(&Error::AlreadyObserving));
    }

    /// Blocking on a dispatcher thread is refused
    #[test]
    fn refuse_dispatcher_thread() {
        let _dispatcher = QueueDispatcher::new();
        let failure = ObservableFuture::with_data(1u32).execute().unwrap_err();
        assert_eq!(failure.downcast_ref::<Error>(),
                   Some(&Error::BlockingOnDispatcher));
    }
}
