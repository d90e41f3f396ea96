//! Coalescing of concurrent requests
//!
//! A `BatchingObservableFuture` groups requests for the same outcome, so that
//! only one of them actually executes. This means, for example, that ten
//! screens asking for the same network resource at once cause a single call,
//! whose result is handed to all ten.
//!
//! Unlike `AsyncMemoizer`, nothing is remembered once a batch completes: the
//! next request starts a new batch.

use crate::client::Cancellable;
use crate::completer::Completer;
use crate::error::{Error, Failure};
use crate::future::ObservableFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};


type BatchPeek<T> = Box<dyn Fn(&T) + Send + Sync + 'static>;


/// Group of futures sharing a single in-flight delegate
///
/// Handles are cheap to clone, and all clones share the same batch.
///
pub struct BatchingObservableFuture<T: Clone + Send + 'static> {
    inner: Arc<BatchInner<T>>,
}
//
struct BatchInner<T: Clone + Send + 'static> {
    /// Optional tap into every successful delegate value
    peek: Option<BatchPeek<T>>,

    /// Current batch (mutex-protected)
    state: Mutex<BatchState<T>>,
}
//
struct BatchState<T: Clone + Send + 'static> {
    /// Whether a delegate is currently executing
    in_flight: bool,

    /// Batch counter, used to discard outcomes of cancelled delegates
    generation: u64,

    /// The delegate of the current batch
    delegate: Option<ObservableFuture<T>>,

    /// Futures handed out for the current batch
    listeners: Vec<(Completer<T>, ObservableFuture<T>)>,
}
//
impl<T: Clone + Send + 'static> BatchingObservableFuture<T> {
    /// Create a batching future without peek listener
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a batching future which taps into every delegate value
    ///
    /// The peek listener runs once per successful delegate, before any
    /// listener future is resolved.
    ///
    pub fn with_peek<P>(peek: P) -> Self
        where P: Fn(&T) + Send + Sync + 'static
    {
        Self::build(Some(Box::new(peek)))
    }

    fn build(peek: Option<BatchPeek<T>>) -> Self {
        BatchingObservableFuture {
            inner: Arc::new(BatchInner {
                peek,
                state: Mutex::new(BatchState {
                    in_flight: false,
                    generation: 0,
                    delegate: None,
                    listeners: Vec::new(),
                }),
            }),
        }
    }

    /// Get a new listener future for the current batch
    ///
    /// If no delegate is in flight, `delegate_creator` is called to start
    /// one. Otherwise it is not called at all, and the listener will get the
    /// outcome of the delegate which is already running.
    ///
    pub fn create<C>(&self, delegate_creator: C) -> ObservableFuture<T>
        where C: FnOnce() -> ObservableFuture<T>
    {
        let (listener, generation) = {
            let mut state = self.inner.lock_state();
            let listener = state.add_listener();
            if state.in_flight {
                trace!(listeners = state.listeners.len(), "Joining batch in flight");
                return listener;
            }
            state.in_flight = true;
            state.generation += 1;
            (listener, state.generation)
        };

        debug!(generation, "Starting batched delegate");
        let delegate = delegate_creator();

        // Whoever cancels the delegate, the batch must not wait for it forever
        let weak = Arc::downgrade(&self.inner);
        delegate.on_discard(move || {
            if let Some(inner) = weak.upgrade() {
                inner.notify_failure(generation, Error::Cancelled.into());
            }
        });
        let (s_inner, f_inner) = (self.inner.clone(), self.inner.clone());
        let subscribed = delegate.subscribe(
            move |value| s_inner.notify_success(generation, value),
            move |failure| f_inner.notify_failure(generation, failure),
        );
        if subscribed.is_err() {
            self.inner.notify_failure(generation, Error::AlreadyObserved.into());
        }

        // The delegate may have completed synchronously, in which case the
        // batch is already over, or the batch may have been cancelled while
        // the delegate was being created
        let cancelled = {
            let mut state = self.inner.lock_state();
            if state.in_flight && state.generation == generation {
                state.delegate = Some(delegate.clone());
            }
            state.generation != generation
        };
        if cancelled {
            debug!(generation, "Batch cancelled during delegate creation");
            delegate.cancel();
        }
        listener
    }

    /// Cancel the current batch
    ///
    /// All listener futures are cancelled, as is the delegate. The next call
    /// to `create()` starts a new batch.
    ///
    pub fn cancel(&self) {
        let (delegate, listeners) = {
            let mut state = self.inner.lock_state();
            state.in_flight = false;
            state.generation += 1;
            (state.delegate.take(), std::mem::take(&mut state.listeners))
        };
        debug!(listeners = listeners.len(), "Cancelling batch");
        for (_, listener) in listeners {
            listener.cancel();
        }
        if let Some(delegate) = delegate {
            delegate.cancel();
        }
    }

    /// Check whether a delegate is currently executing
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock_state().in_flight
    }

    /// Number of listener futures waiting for the current batch
    pub fn listener_count(&self) -> usize {
        self.inner.lock_state().listeners.len()
    }
}
//
impl<T: Clone + Send + 'static> BatchInner<T> {
    fn lock_state(&self) -> MutexGuard<BatchState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Close the batch if it is the current one, return its listeners
    fn finish(&self, generation: u64) -> Option<Vec<(Completer<T>, ObservableFuture<T>)>> {
        let mut state = self.lock_state();
        if !state.in_flight || state.generation != generation {
            trace!(generation, "Ignoring outcome of a cancelled batch");
            return None;
        }
        state.in_flight = false;
        state.delegate = None;
        Some(std::mem::take(&mut state.listeners))
    }

    fn notify_success(&self, generation: u64, value: T) {
        let listeners = match self.finish(generation) {
            Some(listeners) => listeners,
            None => return,
        };
        if let Some(peek) = &self.peek {
            peek(&value);
        }
        for (completer, _) in listeners {
            completer.complete(value.clone());
        }
    }

    fn notify_failure(&self, generation: u64, failure: Failure) {
        let listeners = match self.finish(generation) {
            Some(listeners) => listeners,
            None => return,
        };
        for (completer, _) in listeners {
            completer.fail(failure.clone());
        }
    }
}
//
impl<T: Clone + Send + 'static> BatchState<T> {
    fn add_listener(&mut self) -> ObservableFuture<T> {
        let (completer, future) = ObservableFuture::pending();
        self.listeners.push((completer, future.clone()));
        future
    }
}
//
impl<T: Clone + Send + 'static> Clone for BatchingObservableFuture<T> {
    fn clone(&self) -> Self {
        BatchingObservableFuture { inner: self.inner.clone() }
    }
}
//
impl<T: Clone + Send + 'static> Default for BatchingObservableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}
//
impl<T: Clone + Send + 'static> Cancellable for BatchingObservableFuture<T> {
    fn cancel(&self) {
        BatchingObservableFuture::cancel(self);
    }
}
//
impl<T: Clone + Send + 'static> fmt::Debug for BatchingObservableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("BatchingObservableFuture")
         .field("in_flight", &state.in_flight)
         .field("generation", &state.generation)
         .field("listeners", &state.listeners.len())
         .finish()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::FutureStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Shared delegate factory, counting how many delegates were created
    struct Delegates {
        created: Arc<AtomicUsize>,
        completers: Arc<Mutex<Vec<Completer<String>>>>,
    }
    //
    impl Delegates {
        fn new() -> Self {
            Delegates {
                created: Arc::new(AtomicUsize::new(0)),
                completers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn creator(&self) -> impl FnOnce() -> ObservableFuture<String> {
            let created = self.created.clone();
            let completers = self.completers.clone();
            move || {
                created.fetch_add(1, Ordering::SeqCst);
                let (completer, future) = ObservableFuture::pending();
                completers.lock().unwrap().push(completer);
                future
            }
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        fn last(&self) -> Completer<String> {
            self.completers.lock().unwrap().last().unwrap().clone()
        }
    }

    /// Concurrent requests share a single delegate
    #[test]
    fn coalesce() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let listeners: Vec<_> = (0..10).map(|_| batch.create(delegates.creator()))
                                       .collect();
        assert_eq!(delegates.created(), 1);
        assert!(batch.is_in_flight());
        assert_eq!(batch.listener_count(), 10);

        delegates.last().complete("shared".to_owned());
        assert!(!batch.is_in_flight());
        assert_eq!(batch.listener_count(), 0);
        for listener in listeners {
            assert_eq!(listener.execute().unwrap(), "shared");
        }
    }

    /// A new batch starts once the previous one completed
    #[test]
    fn sequential_batches() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let first = batch.create(delegates.creator());
        delegates.last().complete("one".to_owned());
        let second = batch.create(delegates.creator());
        delegates.last().complete("two".to_owned());
        assert_eq!(delegates.created(), 2);
        assert_eq!(first.execute().unwrap(), "one");
        assert_eq!(second.execute().unwrap(), "two");
    }

    /// Synchronously completing delegates do not leave the batch in flight
    #[test]
    fn synchronous_delegate() {
        let batch = BatchingObservableFuture::new();
        let listener = batch.create(|| ObservableFuture::with_data(3u8));
        assert!(!batch.is_in_flight());
        assert_eq!(listener.execute().unwrap(), 3);
    }

    /// Every listener gets the same failure
    #[test]
    fn shared_failure() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let first = batch.create(delegates.creator());
        let second = batch.create(delegates.creator());
        delegates.last().fail(Failure::msg("offline"));
        let first_failure = first.execute().unwrap_err();
        let second_failure = second.execute().unwrap_err();
        assert!(first_failure.ptr_eq(&second_failure));
        assert!(!batch.is_in_flight());
    }

    /// The peek listener runs once per delegate value
    #[test]
    fn peek_once() {
        let peeks = Arc::new(AtomicUsize::new(0));
        let c_peeks = peeks.clone();
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::with_peek(move |value: &String| {
            assert_eq!(value, "peeked");
            c_peeks.fetch_add(1, Ordering::SeqCst);
        });
        let _first = batch.create(delegates.creator());
        let _second = batch.create(delegates.creator());
        delegates.last().complete("peeked".to_owned());
        assert_eq!(peeks.load(Ordering::SeqCst), 1);
    }

    /// Cancelling detaches listeners and cancels the delegate
    #[test]
    fn cancel_batch() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let listener = batch.create(delegates.creator());
        let stale = delegates.last();

        batch.cancel();
        assert!(!batch.is_in_flight());
        assert!(stale.is_cancelled());
        assert_eq!(listener.status(), FutureStatus::Cancelled);

        // The next request starts from scratch
        let fresh = batch.create(delegates.creator());
        assert_eq!(delegates.created(), 2);
        delegates.last().complete("fresh".to_owned());
        assert_eq!(fresh.execute().unwrap(), "fresh");
    }

    /// A delegate cancelled behind the batch's back fails the batch
    #[test]
    fn delegate_cancelled_elsewhere() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let listener = batch.create(|| {
            let delegate = delegates.creator()();
            handle_tx.send(delegate.clone()).unwrap();
            delegate
        });
        let other = batch.create(delegates.creator());

        handle_rx.recv().unwrap().cancel();
        assert!(!batch.is_in_flight());
        for future in [listener, other] {
            assert!(future.execute().unwrap_err().is::<Error>());
        }

        // The batch is usable again
        let fresh = batch.create(delegates.creator());
        assert_eq!(delegates.created(), 2);
        delegates.last().complete("again".to_owned());
        assert_eq!(fresh.execute().unwrap(), "again");
    }

    /// A delegate which comes back already cancelled fails the batch
    #[test]
    fn cancelled_delegate() {
        let batch = BatchingObservableFuture::<u32>::new();
        let listener = batch.create(|| {
            let (_completer, delegate) = ObservableFuture::pending();
            delegate.cancel();
            delegate
        });
        assert!(!batch.is_in_flight());
        let failure = listener.execute().unwrap_err();
        assert!(matches!(failure.downcast_ref::<Error>(), Some(Error::Cancelled)));
    }

    /// Cancelling the batch while its delegate is created cancels the delegate
    #[test]
    fn cancel_during_creation() {
        let delegates = Delegates::new();
        let batch = BatchingObservableFuture::new();
        let c_batch = batch.clone();
        let creator = delegates.creator();
        let listener = batch.create(move || {
            let delegate = creator();
            c_batch.cancel();
            delegate
        });
        assert!(delegates.last().is_cancelled());
        assert!(!batch.is_in_flight());
        assert_eq!(listener.status(), FutureStatus::Cancelled);
    }

    /// Outcomes of a cancelled delegate do not leak into the next batch
    #[test]
    fn stale_outcome_ignored() {
        let batch = BatchingObservableFuture::new();
        let (stale_completer, stale) = ObservableFuture::<u32>::pending();
        let _old = batch.create(move || stale);
        batch.cancel();

        let (fresh_completer, fresh) = ObservableFuture::pending();
        let listener = batch.create(move || fresh);
        // The cancelled delegate refuses the late outcome anyway, but even
        // resolving the generation check must keep the fresh batch intact
        assert!(!stale_completer.resolve(Ok(1)));
        assert!(batch.is_in_flight());
        fresh_completer.complete(2);
        assert_eq!(listener.execute().unwrap(), 2);
    }
}
