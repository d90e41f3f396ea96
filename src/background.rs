//! Running work away from the dispatcher thread
//!
//! These helpers run a fallible closure on some background thread, and hand
//! out a future of its outcome. The closure's error, or its panic, becomes
//! the failure of the future.

use crate::completer::Completer;
use crate::dispatch::{Dispatcher, Task};
use crate::error::{Error, Failure};
use crate::future::ObservableFuture;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::warn;

pub use crate::future::blocking::assert_not_dispatcher;


/// Something which can run tasks in the background
pub trait Executor: Send + Sync {
    /// Run the task at some point, on some thread
    fn execute(&self, task: Task);
}


/// Executor which spawns a new thread for every task
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPerTask;
//
impl Executor for ThreadPerTask {
    fn execute(&self, task: Task) {
        thread::spawn(task);
    }
}


/// Run a closure on a new thread, get a future of its outcome
pub fn on_background<T, E, F>(work: F) -> ObservableFuture<T>
    where T: Send + 'static,
          E: Into<Failure>,
          F: FnOnce() -> Result<T, E> + Send + 'static
{
    on_background_with(&ThreadPerTask, work)
}


/// Run a closure on an executor, get a future of its outcome
pub fn on_background_with<T, E, F, X>(executor: &X, work: F) -> ObservableFuture<T>
    where T: Send + 'static,
          E: Into<Failure>,
          F: FnOnce() -> Result<T, E> + Send + 'static,
          X: Executor + ?Sized
{
    let (completer, future) = ObservableFuture::pending();
    executor.execute(Box::new(move || run_into(completer, work)));
    future
}


/// Keep a closure off the dispatcher thread
///
/// When called from elsewhere, the closure runs right away on the calling
/// thread and the returned future is already resolved. When called from the
/// dispatcher's thread, this behaves like `on_background`.
///
pub fn off_main<T, E, F>(dispatcher: &dyn Dispatcher, work: F) -> ObservableFuture<T>
    where T: Send + 'static,
          E: Into<Failure>,
          F: FnOnce() -> Result<T, E> + Send + 'static
{
    off_main_with(dispatcher, &ThreadPerTask, work)
}


/// Keep a closure off the dispatcher thread, using a specific executor
pub fn off_main_with<T, E, F, X>(dispatcher: &dyn Dispatcher,
                                 executor: &X,
                                 work: F) -> ObservableFuture<T>
    where T: Send + 'static,
          E: Into<Failure>,
          F: FnOnce() -> Result<T, E> + Send + 'static,
          X: Executor + ?Sized
{
    if dispatcher.is_current() {
        return on_background_with(executor, work);
    }
    match guarded(work) {
        Ok(value) => ObservableFuture::with_data(value),
        Err(failure) => ObservableFuture::with_error(failure),
    }
}


/// Run the closure, resolve the completer with its outcome
fn run_into<T, E, F>(completer: Completer<T>, work: F)
    where T: Send + 'static,
          E: Into<Failure>,
          F: FnOnce() -> Result<T, E>
{
    if completer.is_cancelled() {
        return;
    }
    completer.resolve(guarded(work));
}


/// Run the closure, turning its error or panic into a failure
fn guarded<T, E, F>(work: F) -> Result<T, Failure>
    where E: Into<Failure>,
          F: FnOnce() -> Result<T, E>
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(%message, "Background work panicked");
            Err(Error::Panicked(message).into())
        }
    }
}


fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::inline::InlineDispatcher;
    use crate::dispatch::queue::QueueDispatcher;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Executor which runs everything on the submitting thread
    struct CountingExecutor(AtomicUsize);
    //
    impl Executor for CountingExecutor {
        fn execute(&self, task: Task) {
            self.0.fetch_add(1, Ordering::SeqCst);
            task();
        }
    }

    /// Check that values come back from the background thread
    #[test]
    fn background_value() {
        let caller = thread::current().id();
        let future = on_background(move || {
            assert_ne!(thread::current().id(), caller);
            Ok::<_, io::Error>(42)
        });
        assert_eq!(future.execute_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    /// Check that closure errors become failures
    #[test]
    fn background_error() {
        let future = on_background(|| -> Result<u32, io::Error> {
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        });
        let failure = future.execute_timeout(Duration::from_secs(5)).unwrap_err();
        assert!(failure.is::<io::Error>());
        assert_eq!(failure.to_string(), "disk on fire");
    }

    /// Check that panics become failures instead of hanging the future
    #[test]
    fn background_panic() {
        let future = on_background(|| -> Result<u32, Failure> { panic!("boom") });
        let failure = future.execute_timeout(Duration::from_secs(5)).unwrap_err();
        assert_eq!(failure.downcast_ref::<Error>(),
                   Some(&Error::Panicked("boom".to_owned())));
    }

    /// Check that custom executors get the work
    #[test]
    fn custom_executor() {
        let executor = Arc::new(CountingExecutor(AtomicUsize::new(0)));
        let future = on_background_with(&*executor, || Ok::<_, Failure>("done"));
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);
        assert_eq!(future.execute().unwrap(), "done");
    }

    /// Off the dispatcher thread, work runs inline
    #[test]
    fn off_main_inline() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let worker = thread::spawn(move || {
            let caller = thread::current().id();
            let executor = CountingExecutor(AtomicUsize::new(0));
            let future = off_main_with(&*dispatcher, &executor, move || {
                assert_eq!(thread::current().id(), caller);
                Ok::<_, Failure>(7)
            });
            assert_eq!(executor.0.load(Ordering::SeqCst), 0);
            future.execute().unwrap()
        });
        assert_eq!(worker.join().unwrap(), 7);
    }

    /// On the dispatcher thread, work goes to the executor
    #[test]
    fn off_main_dispatched() {
        let executor = CountingExecutor(AtomicUsize::new(0));
        let future = off_main_with(&InlineDispatcher::new(), &executor,
                                   || Ok::<_, Failure>(8));
        assert_eq!(executor.0.load(Ordering::SeqCst), 1);
        let mut monitor = future.monitor();
        assert!(monitor.status().is_final());
    }
}
