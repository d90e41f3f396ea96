//! Single-subscriber observable futures
//!
//! An observable future represents an outcome which will be produced later on,
//! by another thread, an IO callback, a network call... It is resolved exactly
//! once through its `Completer`, and delivers the outcome to at most one pair
//! of success/failure listeners.
//!
//! Delivery only starts once the future is observed, which also selects the
//! thread on which listeners run:
//!
//! - Observing on caller runs listeners on whichever thread resolves the
//!   future, or on the observing thread if the outcome is already there.
//! - Observing through a lifecycle runs listeners on the lifecycle's
//!   dispatcher, and cancels the future when the lifecycle stops.
//!
//! On top of this callback interface, futures can be waited for (see the
//! `blocking` module), polled for status (see `polling`), and composed (see
//! `combinators`).

pub mod blocking;
pub mod combinators;
pub mod polling;

use crate::client::Cancellable;
use crate::completer::Completer;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Failure};
use crate::lifecycle::{Lifecycle, ObserverId};
use crate::status::FutureStatus;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};
use triple_buffer::Input;


type SuccessListener<T> = Box<dyn FnOnce(T) + Send + 'static>;
type FailureListener = Box<dyn FnOnce(Failure) + Send + 'static>;
type Peek<T> = Box<dyn FnMut(&T) + Send + 'static>;
type Starter<T> = Box<dyn FnOnce(Completer<T>) + Send + 'static>;
type Hook = Box<dyn FnOnce() + Send + 'static>;


/// Consumer handle of an asynchronously produced value
///
/// Handles are cheap to clone, and all clones refer to the same future.
///
pub struct ObservableFuture<T: Send + 'static> {
    pub(crate) shared: Arc<Shared<T>>,
}
//
impl<T: Send + 'static> ObservableFuture<T> {
    /// Create an unresolved future, along with the handle used to resolve it
    pub fn pending() -> (Completer<T>, Self) {
        let shared = Arc::new(Shared::new(None));
        (Completer::new(shared.clone()), ObservableFuture { shared })
    }

    /// Create a future which already holds a value
    pub fn with_data(value: T) -> Self {
        let (completer, future) = Self::pending();
        completer.complete(value);
        future
    }

    /// Create a future which already holds a failure
    pub fn with_error<F: Into<Failure>>(failure: F) -> Self {
        let (completer, future) = Self::pending();
        completer.fail(failure);
        future
    }

    /// Create a future whose producer only starts once it is observed
    ///
    /// The start closure is run at most once, on the observing thread. If the
    /// future is cancelled before being observed, it never runs.
    ///
    pub fn lazy<S>(start: S) -> Self
        where S: FnOnce(Completer<T>) + Send + 'static
    {
        ObservableFuture {
            shared: Arc::new(Shared::new(Some(Box::new(start)))),
        }
    }

    /// Set the listener which will receive the value
    pub fn on_success<S>(&self, listener: S) -> Result<&Self, Error>
        where S: FnOnce(T) + Send + 'static
    {
        self.shared.set_success(Box::new(listener))?;
        Ok(self)
    }

    /// Set the listener which will receive the failure
    pub fn on_failure<F>(&self, listener: F) -> Result<&Self, Error>
        where F: FnOnce(Failure) + Send + 'static
    {
        self.shared.set_failure(Box::new(listener))?;
        Ok(self)
    }

    /// Tap into the value as soon as it is produced
    ///
    /// The peek listener runs on the producing thread when the value arrives,
    /// whether or not the future is being observed yet. If a value is already
    /// held and has not been delivered, it runs immediately.
    ///
    pub fn peek<P>(&self, listener: P) -> &Self
        where P: FnMut(&T) + Send + 'static
    {
        Shared::set_peek(&self.shared, Box::new(listener));
        self
    }

    /// Start delivering the outcome on whichever thread produces it
    pub fn observe_on_caller(&self) -> Result<(), Error> {
        Shared::observe(&self.shared, Delivery::OnCaller, None)
    }

    /// Start delivering the outcome on a lifecycle's dispatcher, until the
    /// lifecycle stops
    pub fn observe(&self, lifecycle: Arc<dyn Lifecycle>) -> Result<(), Error> {
        // Stopping the lifecycle cancels the future. A weak reference is
        // enough here, producers keep the future alive while it matters.
        let weak = Arc::downgrade(&self.shared);
        let id = lifecycle.add_stop_observer(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                trace!("Lifecycle stopped, cancelling future");
                shared.cancel();
            }
        }));

        let delivery = Delivery::Dispatcher(lifecycle.dispatcher());
        let result = Shared::observe(&self.shared,
                                     delivery,
                                     Some((lifecycle.clone(), id)));
        if result.is_err() {
            lifecycle.remove_stop_observer(id);
        }
        result
    }

    /// Give up on the outcome
    ///
    /// Listeners are dropped and won't be called, any undelivered outcome is
    /// discarded, and the cancellation hooks are run. Cancelling more than
    /// once has no effect.
    ///
    pub fn cancel(&self) {
        self.shared.cancel();
    }

    /// Register a hook to be run when the future gets cancelled
    ///
    /// This is how producers that can be aborted, like network calls, hear
    /// about cancellation. If the future is already cancelled, the hook runs
    /// immediately.
    ///
    pub fn on_cancel<H>(&self, hook: H) -> &Self
        where H: FnOnce() + Send + 'static
    {
        self.shared.add_cancel_hook(Box::new(hook));
        self
    }

    /// Register a hook to be run if cancellation discards the outcome
    ///
    /// Unlike `on_cancel()` hooks, this one does not run when the future is
    /// cancelled after its outcome reached the listeners.
    ///
    pub(crate) fn on_discard<H>(&self, hook: H) -> &Self
        where H: FnOnce() + Send + 'static
    {
        let shared = Arc::downgrade(&self.shared);
        self.on_cancel(move || {
            let discarded = shared.upgrade().map_or(true, |shared| {
                shared.status() == FutureStatus::Cancelled
            });
            if discarded {
                hook();
            }
        })
    }

    /// Current status of the future
    pub fn status(&self) -> FutureStatus {
        self.shared.status()
    }

    /// Check whether the future was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Subscribe both listeners and start observing on caller, atomically
    ///
    /// Used by combinators and blocking waits, which need exclusive access to
    /// the outcome of the future.
    ///
    pub(crate) fn subscribe<S, F>(&self,
                                  on_success: S,
                                  on_failure: F) -> Result<(), Error>
        where S: FnOnce(T) + Send + 'static,
              F: FnOnce(Failure) + Send + 'static
    {
        let this = &self.shared;
        let (starter, dispatch) = {
            let mut state = this.lock_state();
            if state.on_success.is_some() || state.on_failure.is_some()
                || state.delivery.is_some()
            {
                return Err(Error::AlreadyObserved);
            }
            if this.is_cancelled() {
                return Ok(());
            }
            state.on_success = Some(Box::new(on_success));
            state.on_failure = Some(Box::new(on_failure));
            state.delivery = Some(Delivery::OnCaller);
            (state.starter.take(), state.take_dispatch())
        };
        Shared::launch(this, starter, dispatch);
        Ok(())
    }
}
//
impl<T: Send + 'static> Clone for ObservableFuture<T> {
    fn clone(&self) -> Self {
        ObservableFuture { shared: self.shared.clone() }
    }
}
//
impl<T: Send + 'static> Cancellable for ObservableFuture<T> {
    fn cancel(&self) {
        ObservableFuture::cancel(self);
    }
}
//
impl<T: Send + 'static> fmt::Debug for ObservableFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ObservableFuture")
         .field("status", &self.status())
         .finish()
    }
}


/// How the outcome of an observed future reaches its listeners
#[derive(Clone)]
pub(crate) enum Delivery {
    /// Listeners run on the resolving or observing thread
    OnCaller,

    /// Listeners run on a dispatcher's thread
    Dispatcher(Arc<dyn Dispatcher>),
}


/// State shared between a future's consumer and producer handles
pub(crate) struct Shared<T: Send + 'static> {
    /// Mutable state of the future (mutex-protected)
    state: Mutex<State<T>>,

    /// Atomic boolean set when the consumer has cancelled the future
    ///
    /// Readable without the lock, so that posted deliveries and producers can
    /// cheaply check whether they are still wanted.
    ///
    cancelled: AtomicBool,
}
//
struct State<T: Send + 'static> {
    status: FutureStatus,
    outcome: Option<Result<T, Failure>>,
    delivered: bool,
    in_transit: bool,
    delivery: Option<Delivery>,
    on_success: Option<SuccessListener<T>>,
    on_failure: Option<FailureListener>,
    peek: Option<Peek<T>>,
    starter: Option<Starter<T>>,
    cancel_hooks: Vec<Hook>,
    lifecycle: Option<(Arc<dyn Lifecycle>, ObserverId)>,
    monitors: Vec<Input<FutureStatus>>,
}
//
impl<T: Send + 'static> State<T> {
    /// Switch to a new status and let the status monitors know
    fn set_status(&mut self, status: FutureStatus) {
        self.status = status;
        for monitor in &mut self.monitors {
            monitor.write(status);
        }
    }

    /// Extract what is needed to deliver the outcome, if it is time to do so
    fn take_dispatch(&mut self) -> Option<Dispatch<T>> {
        if self.delivered || self.status == FutureStatus::Cancelled {
            return None;
        }
        let delivery = self.delivery.clone()?;
        let outcome = self.outcome.take()?;

        // From now on, this future is done for good
        self.delivered = true;
        self.peek = None;
        self.starter = None;
        Some(Dispatch {
            delivery,
            outcome,
            on_success: self.on_success.take(),
            on_failure: self.on_failure.take(),
        })
    }
}
//
impl<T: Send + 'static> Shared<T> {
    fn new(starter: Option<Starter<T>>) -> Self {
        Shared {
            state: Mutex::new(State {
                status: FutureStatus::Pending,
                outcome: None,
                delivered: false,
                in_transit: false,
                delivery: None,
                on_success: None,
                on_failure: None,
                peek: None,
                starter,
                cancel_hooks: Vec::new(),
                lifecycle: None,
                monitors: Vec::new(),
            }),
            cancelled: AtomicBool::new(false),
        }
    }

    fn lock_state(&self) -> MutexGuard<State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn status(&self) -> FutureStatus {
        self.lock_state().status
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Accept the outcome of the future, if it is the first one
    pub(crate) fn resolve(this: &Arc<Self>,
                          outcome: Result<T, Failure>) -> bool {
        let mut state = this.lock_state();
        if state.status.is_final() {
            return false;
        }
        match outcome {
            Ok(value) => {
                state.set_status(FutureStatus::Succeeded);
                trace!("Future succeeded");
                match state.peek.take() {
                    Some(peek) => {
                        drop(state);
                        Self::peek_then_store(this, value, peek);
                    }
                    None => {
                        state.outcome = Some(Ok(value));
                        let dispatch = state.take_dispatch();
                        drop(state);
                        Self::deliver(this, dispatch);
                    }
                }
            }
            Err(failure) => {
                state.set_status(FutureStatus::Failed);
                debug!(%failure, "Future failed");
                state.outcome = Some(Err(failure));
                let dispatch = state.take_dispatch();
                drop(state);
                Self::deliver(this, dispatch);
            }
        }
        true
    }

    /// Run a peek listener on a fresh value, then make it deliverable
    ///
    /// The value is kept out of the shared state while the peek listener
    /// runs, so that the listener is free to use the future.
    ///
    fn peek_then_store(this: &Arc<Self>, value: T, mut peek: Peek<T>) {
        peek(&value);
        drop(peek);
        let mut state = this.lock_state();
        if state.status == FutureStatus::Cancelled || state.delivered {
            return;
        }
        state.outcome = Some(Ok(value));
        let dispatch = state.take_dispatch();
        drop(state);
        Self::deliver(this, dispatch);
    }

    fn set_success(&self, listener: SuccessListener<T>) -> Result<(), Error> {
        let mut state = self.lock_state();
        if state.on_success.is_some() {
            return Err(Error::ListenerAlreadySet);
        }
        if !self.is_cancelled() && !state.delivered {
            state.on_success = Some(listener);
        }
        Ok(())
    }

    fn set_failure(&self, listener: FailureListener) -> Result<(), Error> {
        let mut state = self.lock_state();
        if state.on_failure.is_some() {
            return Err(Error::ListenerAlreadySet);
        }
        if !self.is_cancelled() && !state.delivered {
            state.on_failure = Some(listener);
        }
        Ok(())
    }

    fn set_peek(this: &Arc<Self>, peek: Peek<T>) {
        let mut state = this.lock_state();
        if this.is_cancelled() || state.delivered {
            return;
        }
        match state.outcome.take() {
            // A value is waiting for delivery, show it right away
            Some(Ok(value)) => {
                drop(state);
                Self::peek_then_store(this, value, peek);
            }
            outcome => {
                state.outcome = outcome;
                if state.status == FutureStatus::Pending {
                    state.peek = Some(peek);
                }
            }
        }
    }

    fn observe(this: &Arc<Self>,
               delivery: Delivery,
               lifecycle: Option<(Arc<dyn Lifecycle>, ObserverId)>)
        -> Result<(), Error>
    {
        let (starter, dispatch) = {
            let mut state = this.lock_state();
            if this.is_cancelled() {
                drop(state);
                if let Some((lifecycle, id)) = lifecycle {
                    lifecycle.remove_stop_observer(id);
                }
                return Ok(());
            }
            if state.delivery.is_some() {
                return Err(Error::AlreadyObserving);
            }
            state.delivery = Some(delivery);
            state.lifecycle = lifecycle;
            (state.starter.take(), state.take_dispatch())
        };

        Self::launch(this, starter, dispatch);
        Ok(())
    }

    /// Start a lazy producer if needed, then deliver any outcome at hand
    fn launch(this: &Arc<Self>,
              starter: Option<Starter<T>>,
              dispatch: Option<Dispatch<T>>) {
        // Lazy producers only start now that somebody is interested
        if let Some(starter) = starter {
            trace!("Starting lazy future");
            starter(Completer::new(this.clone()));
        }
        Self::deliver(this, dispatch);
    }

    /// Hand an outcome over to the listeners, respecting the dispatch mode
    fn deliver(this: &Arc<Self>, dispatch: Option<Dispatch<T>>) {
        let Dispatch { delivery, outcome, on_success, on_failure } =
            match dispatch {
                Some(dispatch) => dispatch,
                None => return,
            };
        match outcome {
            Ok(value) => {
                drop(on_failure);
                if let Some(listener) = on_success {
                    Self::route(this, delivery, Box::new(move || listener(value)));
                }
            }
            Err(failure) => {
                drop(on_success);
                if let Some(listener) = on_failure {
                    Self::route(this, delivery, Box::new(move || listener(failure)));
                }
            }
        }
    }

    fn route(this: &Arc<Self>, delivery: Delivery, job: Hook) {
        match delivery {
            Delivery::OnCaller => job(),
            Delivery::Dispatcher(dispatcher) => {
                if dispatcher.is_current() {
                    job();
                } else {
                    // The consumer may lose interest before the dispatcher
                    // gets around to running the listener
                    this.lock_state().in_transit = true;
                    let shared = this.clone();
                    dispatcher.post(Box::new(move || {
                        let wanted = {
                            let mut state = shared.lock_state();
                            state.in_transit = false;
                            !shared.is_cancelled()
                        };
                        if wanted {
                            job();
                        } else {
                            trace!("Dropping delivery of a cancelled future");
                        }
                    }));
                }
            }
        }
    }

    pub(crate) fn cancel(&self) {
        let (hooks, lifecycle, leftovers) = {
            let mut state = self.lock_state();
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return;
            }
            // An outcome still waiting in a dispatcher queue is never seen
            if !state.delivered || state.in_transit {
                state.set_status(FutureStatus::Cancelled);
            }
            let leftovers = Leftovers {
                _outcome: state.outcome.take(),
                _on_success: state.on_success.take(),
                _on_failure: state.on_failure.take(),
                _peek: state.peek.take(),
                _starter: state.starter.take(),
            };
            (std::mem::take(&mut state.cancel_hooks),
             state.lifecycle.take(),
             leftovers)
        };
        debug!(hooks = hooks.len(), "Future cancelled");

        // Whatever the listeners owned goes away outside of the lock, as
        // dropping it can resolve other futures
        drop(leftovers);
        if let Some((lifecycle, id)) = lifecycle {
            lifecycle.remove_stop_observer(id);
        }
        for hook in hooks {
            hook();
        }
    }

    fn add_cancel_hook(&self, hook: Hook) {
        {
            let mut state = self.lock_state();
            if !self.is_cancelled() {
                state.cancel_hooks.push(hook);
                return;
            }
        }
        hook();
    }
}


/// Everything needed to deliver an outcome outside of the lock
struct Dispatch<T> {
    delivery: Delivery,
    outcome: Result<T, Failure>,
    on_success: Option<SuccessListener<T>>,
    on_failure: Option<FailureListener>,
}


/// State dropped on cancellation, kept alive until the lock is released
struct Leftovers<T: Send + 'static> {
    _outcome: Option<Result<T, Failure>>,
    _on_success: Option<SuccessListener<T>>,
    _on_failure: Option<FailureListener>,
    _peek: Option<Peek<T>>,
    _starter: Option<Starter<T>>,
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::queue::QueueDispatcher;
    use crate::lifecycle::LifecycleRegistry;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    /// Shared slot recording what listeners received
    fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<Result<T, String>>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn listen<T: Send + 'static>(future: &ObservableFuture<T>,
                                 record: &Arc<Mutex<Vec<Result<T, String>>>>) {
        let s_record = record.clone();
        let f_record = record.clone();
        future.on_success(move |v| s_record.lock().unwrap().push(Ok(v)))
              .unwrap()
              .on_failure(move |e| f_record.lock().unwrap().push(Err(e.to_string())))
              .unwrap();
    }

    /// Check the initial future state
    #[test]
    fn initial_state() {
        let (_completer, future) = ObservableFuture::<u32>::pending();
        assert_eq!(future.status(), FutureStatus::Pending);
        assert!(!future.is_cancelled());
    }

    /// Nothing is delivered until the future is observed
    #[test]
    fn delivery_waits_for_observe() {
        let record = recorder();
        let (completer, future) = ObservableFuture::pending();
        listen(&future, &record);
        completer.complete(42u32);
        assert_eq!(future.status(), FutureStatus::Succeeded);
        assert!(record.lock().unwrap().is_empty());

        future.observe_on_caller().unwrap();
        assert_eq!(*record.lock().unwrap(), vec![Ok(42)]);
    }

    /// Observed futures deliver as soon as the outcome arrives
    #[test]
    fn delivery_on_resolve() {
        let record = recorder();
        let (completer, future) = ObservableFuture::<u32>::pending();
        listen(&future, &record);
        future.observe_on_caller().unwrap();
        assert!(record.lock().unwrap().is_empty());

        completer.fail(Failure::msg("nope"));
        assert_eq!(*record.lock().unwrap(), vec![Err::<u32, _>("nope".to_owned())]);

        // Later outcomes go nowhere
        completer.complete(1);
        assert_eq!(record.lock().unwrap().len(), 1);
    }

    /// Each listener and observation can only be set up once
    #[test]
    fn single_subscriber() {
        let future = ObservableFuture::with_data(1u32);
        future.on_success(|_| {}).unwrap();
        assert_eq!(future.on_success(|_| {}).unwrap_err(),
                   Error::ListenerAlreadySet);
        future.on_failure(|_| {}).unwrap();
        assert_eq!(future.on_failure(|_| {}).unwrap_err(),
                   Error::ListenerAlreadySet);
        future.observe_on_caller().unwrap();
        assert_eq!(future.observe_on_caller().unwrap_err(),
                   Error::AlreadyObserving);
    }

    /// Missing listeners silently discard the outcome
    #[test]
    fn missing_listener() {
        let record = recorder::<u32>();
        let f_record = record.clone();
        let future = ObservableFuture::with_data(5u32);
        future.on_failure(move |e| f_record.lock().unwrap().push(Err(e.to_string())))
              .unwrap()
              .observe_on_caller()
              .unwrap();
        assert!(record.lock().unwrap().is_empty());
    }

    /// Cancellation drops the listeners and runs the hooks once
    #[test]
    fn cancellation() {
        let record = recorder();
        let hooks = Arc::new(AtomicUsize::new(0));
        let c_hooks = hooks.clone();
        let (completer, future) = ObservableFuture::pending();
        listen(&future, &record);
        future.on_cancel(move || {
            c_hooks.fetch_add(1, Ordering::SeqCst);
        });
        future.observe_on_caller().unwrap();

        future.cancel();
        future.cancel();
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert_eq!(future.status(), FutureStatus::Cancelled);
        assert!(!completer.resolve(Ok(3u32)));
        assert!(record.lock().unwrap().is_empty());

        // Late hooks run right away
        let l_hooks = hooks.clone();
        future.on_cancel(move || {
            l_hooks.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hooks.load(Ordering::SeqCst), 2);
    }

    /// Cancelling a resolved but undelivered future discards the outcome
    #[test]
    fn cancel_undelivered() {
        let record = recorder();
        let future = ObservableFuture::with_data(1u32);
        listen(&future, &record);
        future.cancel();
        assert_eq!(future.status(), FutureStatus::Cancelled);
        future.observe_on_caller().unwrap();
        assert!(record.lock().unwrap().is_empty());
    }

    /// Cancelling after delivery keeps the final status
    #[test]
    fn cancel_after_delivery() {
        let record = recorder();
        let future = ObservableFuture::with_data(1u32);
        listen(&future, &record);
        future.observe_on_caller().unwrap();
        future.cancel();
        assert_eq!(future.status(), FutureStatus::Succeeded);
        assert!(future.is_cancelled());
        assert_eq!(*record.lock().unwrap(), vec![Ok(1)]);
    }

    /// Peek sees the value before anybody observes it
    #[test]
    fn peek_before_observe() {
        let peeked = Arc::new(Mutex::new(None));
        let p_peeked = peeked.clone();
        let record = recorder();
        let (completer, future) = ObservableFuture::pending();
        future.peek(move |v: &u32| *p_peeked.lock().unwrap() = Some(*v));
        listen(&future, &record);

        completer.complete(7);
        assert_eq!(*peeked.lock().unwrap(), Some(7));
        assert!(record.lock().unwrap().is_empty());

        future.observe_on_caller().unwrap();
        assert_eq!(*record.lock().unwrap(), vec![Ok(7)]);
    }

    /// Late peek listeners run immediately on an undelivered value
    #[test]
    fn late_peek() {
        let peeked = Arc::new(AtomicUsize::new(0));
        let p_peeked = peeked.clone();
        let future = ObservableFuture::with_data(9usize);
        future.peek(move |v| p_peeked.store(*v, Ordering::SeqCst));
        assert_eq!(peeked.load(Ordering::SeqCst), 9);
        assert_eq!(future.execute().unwrap(), 9);
    }

    /// Peek is not called for failures
    #[test]
    fn peek_ignores_failure() {
        let peeked = Arc::new(AtomicUsize::new(0));
        let p_peeked = peeked.clone();
        let (completer, future) = ObservableFuture::<usize>::pending();
        future.peek(move |_| {
            p_peeked.fetch_add(1, Ordering::SeqCst);
        });
        completer.fail(Failure::msg("no value"));
        assert_eq!(peeked.load(Ordering::SeqCst), 0);
    }

    /// Lazy producers only start when observed
    #[test]
    fn lazy_start() {
        let started = Arc::new(AtomicUsize::new(0));
        let c_started = started.clone();
        let future = ObservableFuture::lazy(move |completer| {
            c_started.fetch_add(1, Ordering::SeqCst);
            completer.complete("lazy");
        });
        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(future.status(), FutureStatus::Pending);
        assert_eq!(future.execute().unwrap(), "lazy");
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    /// Cancelled lazy futures never start
    #[test]
    fn lazy_cancelled() {
        let started = Arc::new(AtomicUsize::new(0));
        let c_started = started.clone();
        let future = ObservableFuture::<u32>::lazy(move |_| {
            c_started.fetch_add(1, Ordering::SeqCst);
        });
        future.cancel();
        future.observe_on_caller().unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    /// Lifecycle-bound futures deliver on the dispatcher thread
    #[test]
    fn lifecycle_dispatch() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let lifecycle = Arc::new(LifecycleRegistry::new(dispatcher.clone()));
        let record = recorder();
        let (completer, future) = ObservableFuture::pending();
        listen(&future, &record);
        future.observe(lifecycle.clone()).unwrap();
        assert_eq!(lifecycle.observer_count(), 1);

        // Resolving from another thread posts the delivery
        let worker = thread::spawn(move || completer.complete(11u32));
        worker.join().unwrap();
        assert!(record.lock().unwrap().is_empty());
        assert_eq!(dispatcher.pending(), 1);

        dispatcher.run_pending();
        assert_eq!(*record.lock().unwrap(), vec![Ok(11)]);
    }

    /// Resolving on the dispatcher thread delivers inline
    #[test]
    fn lifecycle_inline_on_dispatcher() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let lifecycle = Arc::new(LifecycleRegistry::new(dispatcher.clone()));
        let record = recorder();
        let future = ObservableFuture::with_data(2u32);
        listen(&future, &record);
        future.observe(lifecycle).unwrap();
        assert_eq!(*record.lock().unwrap(), vec![Ok(2)]);
        assert_eq!(dispatcher.pending(), 0);
    }

    /// Stopping the lifecycle cancels the future and skips posted deliveries
    #[test]
    fn lifecycle_stop_cancels() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let lifecycle = Arc::new(LifecycleRegistry::new(dispatcher.clone()));
        let record = recorder();
        let (completer, future) = ObservableFuture::pending();
        listen(&future, &record);
        future.observe(lifecycle.clone()).unwrap();

        let worker = thread::spawn(move || completer.complete(5u32));
        worker.join().unwrap();
        lifecycle.stop();
        assert!(future.is_cancelled());

        dispatcher.run_pending();
        assert!(record.lock().unwrap().is_empty());
    }

    /// A value stuck in the dispatcher queue is lost to cancellation
    #[test]
    fn cancel_in_transit() {
        let dispatcher = Arc::new(QueueDispatcher::new());
        let lifecycle = Arc::new(LifecycleRegistry::new(dispatcher.clone()));
        let record = recorder();
        let (completer, future) = ObservableFuture::pending();
        listen(&future, &record);
        future.observe(lifecycle).unwrap();

        let worker = thread::spawn(move || completer.complete(6u32));
        worker.join().unwrap();
        assert_eq!(future.status(), FutureStatus::Succeeded);
        assert_eq!(dispatcher.pending(), 1);

        future.cancel();
        assert_eq!(future.status(), FutureStatus::Cancelled);
        dispatcher.run_pending();
        assert!(record.lock().unwrap().is_empty());
        assert_eq!(future.status(), FutureStatus::Cancelled);
    }

    /// Discard hooks only run when the outcome is lost
    #[test]
    fn discard_hooks() {
        let discards = Arc::new(AtomicUsize::new(0));

        let (_completer, pending) = ObservableFuture::<u32>::pending();
        let c_discards = discards.clone();
        pending.on_discard(move || { c_discards.fetch_add(1, Ordering::SeqCst); });
        pending.cancel();
        assert_eq!(discards.load(Ordering::SeqCst), 1);

        let delivered = ObservableFuture::with_data(3u32);
        let c_discards = discards.clone();
        delivered.on_discard(move || { c_discards.fetch_add(1, Ordering::SeqCst); });
        delivered.subscribe(|_| {}, |_| {}).unwrap();
        delivered.cancel();
        assert_eq!(discards.load(Ordering::SeqCst), 1);
    }

    /// Observing a stopped lifecycle cancels right away
    #[test]
    fn observe_stopped_lifecycle() {
        let lifecycle = Arc::new(LifecycleRegistry::inline());
        lifecycle.stop();
        let record = recorder();
        let future = ObservableFuture::with_data(1u32);
        listen(&future, &record);
        future.observe(lifecycle.clone()).unwrap();
        assert_eq!(future.status(), FutureStatus::Cancelled);
        assert!(record.lock().unwrap().is_empty());
    }

    /// Cancelling unregisters from the lifecycle
    #[test]
    fn cancel_unregisters() {
        let lifecycle = Arc::new(LifecycleRegistry::inline());
        let (_completer, future) = ObservableFuture::<u32>::pending();
        future.observe(lifecycle.clone()).unwrap();
        assert_eq!(lifecycle.observer_count(), 1);
        future.cancel();
        assert_eq!(lifecycle.observer_count(), 0);
    }

    /// Double observation through a lifecycle leaves no stray observer
    #[test]
    fn observe_twice_lifecycle() {
        let lifecycle = Arc::new(LifecycleRegistry::inline());
        let (_completer, future) = ObservableFuture::<u32>::pending();
        future.observe_on_caller().unwrap();
        assert_eq!(future.observe(lifecycle.clone()).unwrap_err(),
                   Error::AlreadyObserving);
        assert_eq!(lifecycle.observer_count(), 0);
    }

    /// Listeners may use the future they are attached to
    #[test]
    fn reentrant_listener() {
        let (completer, future) = ObservableFuture::<u32>::pending();
        let handle = future.clone();
        let seen = Arc::new(Mutex::new(None));
        let c_seen = seen.clone();
        future.on_success(move |v| {
            handle.cancel();
            *c_seen.lock().unwrap() = Some((v, handle.status()));
        }).unwrap();
        future.observe_on_caller().unwrap();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(8);
        });
        worker.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), Some((8, FutureStatus::Succeeded)));
    }
}
