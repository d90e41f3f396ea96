//! Run-once asynchronous computations
//!
//! An `AsyncMemoizer` makes sure that some asynchronous computation runs at
//! most once, and hands its outcome to everyone who asks for it, before or
//! after it is available.

use crate::completer::Completer;
use crate::error::{Error, Failure};
use crate::future::ObservableFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;


/// Memoizer of a single asynchronous outcome
///
/// Handles are cheap to clone, and all clones share the same outcome.
///
pub struct AsyncMemoizer<T: Clone + Send + 'static> {
    state: Arc<Mutex<MemoState<T>>>,
}
//
struct MemoState<T: Clone + Send + 'static> {
    /// Whether the computation was started
    did_run: bool,

    /// Outcome of the computation, once known
    outcome: Option<Result<T, Failure>>,

    /// Futures handed out before the outcome was known
    waiting: Vec<Completer<T>>,
}
//
impl<T: Clone + Send + 'static> AsyncMemoizer<T> {
    /// Create a memoizer whose computation has not run yet
    pub fn new() -> Self {
        AsyncMemoizer {
            state: Arc::new(Mutex::new(MemoState {
                did_run: false,
                outcome: None,
                waiting: Vec::new(),
            })),
        }
    }

    /// Get a future of the memoized outcome
    ///
    /// If the outcome is known, the future is already resolved. Otherwise it
    /// resolves when the outcome arrives.
    ///
    pub fn future(&self) -> ObservableFuture<T> {
        let mut state = self.lock_state();
        if let Some(outcome) = &state.outcome {
            return match outcome {
                Ok(value) => ObservableFuture::with_data(value.clone()),
                Err(failure) => ObservableFuture::with_error(failure.clone()),
            };
        }
        let (completer, future) = ObservableFuture::pending();
        state.waiting.push(completer);
        future
    }

    /// Run the computation if it never ran, and get a future of its outcome
    ///
    /// The builder is called at most once over the lifetime of the memoizer,
    /// on the thread which gets there first. Every call, including the first,
    /// returns a fresh future of the shared outcome.
    ///
    pub fn run_once<B>(&self, builder: B) -> ObservableFuture<T>
        where B: FnOnce() -> ObservableFuture<T>
    {
        {
            let mut state = self.lock_state();
            if state.did_run {
                drop(state);
                return self.future();
            }
            state.did_run = true;
        }

        debug!("Running memoized computation");
        let delegate = builder();
        let weak = Arc::downgrade(&self.state);
        delegate.on_discard(move || {
            if let Some(state) = weak.upgrade() {
                debug!("Memoized computation was cancelled");
                settle(&state, Err(Error::Cancelled.into()));
            }
        });
        let (s_state, f_state) = (self.state.clone(), self.state.clone());
        let subscribed = delegate.subscribe(
            move |value| settle(&s_state, Ok(value)),
            move |failure| settle(&f_state, Err(failure)),
        );
        if subscribed.is_err() {
            settle(&self.state, Err(Error::AlreadyObserved.into()));
        }
        self.future()
    }

    /// Check whether the computation was started
    pub fn has_run(&self) -> bool {
        self.lock_state().did_run
    }

    /// Check whether the outcome is known
    pub fn is_resolved(&self) -> bool {
        self.lock_state().outcome.is_some()
    }

    fn lock_state(&self) -> MutexGuard<MemoState<T>> {
        lock(&self.state)
    }
}
//
impl<T: Clone + Send + 'static> Clone for AsyncMemoizer<T> {
    fn clone(&self) -> Self {
        AsyncMemoizer { state: self.state.clone() }
    }
}
//
impl<T: Clone + Send + 'static> Default for AsyncMemoizer<T> {
    fn default() -> Self {
        Self::new()
    }
}
//
impl<T: Clone + Send + 'static> fmt::Debug for AsyncMemoizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("AsyncMemoizer")
         .field("did_run", &state.did_run)
         .field("resolved", &state.outcome.is_some())
         .field("waiting", &state.waiting.len())
         .finish()
    }
}


/// Record the outcome, then resolve every waiting future in order
fn settle<T: Clone + Send + 'static>(state: &Mutex<MemoState<T>>,
                                     outcome: Result<T, Failure>) {
    let waiting = {
        let mut state = lock(state);
        if state.outcome.is_some() {
            return;
        }
        state.outcome = Some(outcome.clone());
        std::mem::take(&mut state.waiting)
    };
    for completer in waiting {
        completer.resolve(outcome.clone());
    }
}


fn lock<T: Clone + Send + 'static>(state: &Mutex<MemoState<T>>)
    -> MutexGuard<MemoState<T>>
{
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
