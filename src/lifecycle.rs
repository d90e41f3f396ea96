//! Lifecycle signal sources
//!
//! A lifecycle is whatever owns the consumers of a future: a screen, a view, a
//! session... What matters to us is that it eventually stops, after which
//! nobody is interested in results anymore. Futures observed through a
//! lifecycle get cancelled on stop, and deliver their outcome through the
//! lifecycle's dispatcher until then.

use crate::dispatch::inline::InlineDispatcher;
use crate::dispatch::Dispatcher;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;


/// Callback invoked once when a lifecycle stops
pub type StopObserver = Box<dyn FnOnce() + Send + 'static>;


/// Handle used to unregister a stop observer
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ObserverId(u64);


/// Source of the terminal "stop" signal
pub trait Lifecycle: Send + Sync {
    /// Register a callback to be run when the lifecycle stops
    ///
    /// If the lifecycle is already stopped, the callback runs immediately.
    ///
    fn add_stop_observer(&self, observer: StopObserver) -> ObserverId;

    /// Unregister a callback, if it has not run yet
    fn remove_stop_observer(&self, id: ObserverId);

    /// Dispatcher on which observers of this lifecycle expect listeners to run
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;
}


/// Straightforward lifecycle implementation, stopped by hand
pub struct LifecycleRegistry {
    /// Where listeners of lifecycle-bound futures should run
    dispatcher: Arc<dyn Dispatcher>,

    /// Registered observers and stop flag (mutex-protected)
    state: Mutex<RegistryState>,
}
//
struct RegistryState {
    next_id: u64,
    stopped: bool,
    observers: Vec<(ObserverId, StopObserver)>,
}
//
impl LifecycleRegistry {
    /// Create a running lifecycle whose listeners run on some dispatcher
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        LifecycleRegistry {
            dispatcher,
            state: Mutex::new(RegistryState {
                next_id: 0,
                stopped: false,
                observers: Vec::new(),
            }),
        }
    }

    /// Create a running lifecycle which runs listeners inline
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineDispatcher::new()))
    }

    /// Tell whether stop() was called
    pub fn is_stopped(&self) -> bool {
        self.lock_state().stopped
    }

    /// Number of observers still waiting for the stop signal
    pub fn observer_count(&self) -> usize {
        self.lock_state().observers.len()
    }

    /// Stop the lifecycle, notifying every observer in registration order
    ///
    /// Stopping is terminal: calling this again has no effect.
    ///
    pub fn stop(&self) {
        let observers = {
            let mut state = self.lock_state();
            if state.stopped {
                return;
            }
            state.stopped = true;
            std::mem::take(&mut state.observers)
        };
        debug!(observers = observers.len(), "Lifecycle stopped");
        for (_, observer) in observers {
            observer();
        }
    }

    fn lock_state(&self) -> MutexGuard<RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
//
impl Lifecycle for LifecycleRegistry {
    fn add_stop_observer(&self, observer: StopObserver) -> ObserverId {
        let mut state = self.lock_state();
        let id = ObserverId(state.next_id);
        state.next_id += 1;
        if state.stopped {
            drop(state);
            observer();
        } else {
            state.observers.push((id, observer));
        }
        id
    }

    fn remove_stop_observer(&self, id: ObserverId) {
        // Drop the observer outside of the lock, it may own arbitrary state
        let removed = {
            let mut state = self.lock_state();
            state.observers
                 .iter()
                 .position(|(observer_id, _)| *observer_id == id)
                 .map(|index| state.observers.remove(index))
        };
        drop(removed);
    }

    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.dispatcher.clone()
    }
}
//
impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("LifecycleRegistry")
         .field("stopped", &state.stopped)
         .field("observers", &state.observers.len())
         .finish()
    }
}
