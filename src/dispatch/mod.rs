//! Listener dispatchers
//!
//! Whenever a future is observed through a lifecycle, the question arises of
//! which thread should run its listeners. UI toolkits typically insist on all
//! UI-touching code running on a single "main" thread, driven by an event loop.
//! A dispatcher is the client-side component which owns such a thread: it can
//! tell whether the calling code already runs there, and accepts tasks to be
//! run there later on.
//!
//! Two dispatchers are provided. The inline dispatcher considers every thread
//! to be its own and runs tasks immediately, which is fine for tests and for
//! hosts without a main thread. The queue dispatcher emulates an event loop,
//! and is drained explicitly by its owner thread.

pub mod inline;
pub mod queue;

use std::cell::Cell;


/// Unit of work posted to a dispatcher
pub type Task = Box<dyn FnOnce() + Send + 'static>;


/// Entry point to thread-affine listener scheduling
pub trait Dispatcher: Send + Sync {
    /// Tell whether the calling thread is the one this dispatcher runs tasks on
    fn is_current(&self) -> bool;

    /// Schedule a task to be run on the dispatcher's thread
    fn post(&self, task: Task);

    /// Run a task on the dispatcher's thread, immediately if possible
    fn dispatch(&self, task: Task) {
        if self.is_current() {
            task();
        } else {
            self.post(task);
        }
    }
}


thread_local! {
    /// Number of event-loop style dispatchers owned by the current thread
    static DISPATCHER_THREAD: Cell<usize> = Cell::new(0);
}


/// Check whether the calling thread drives a dispatcher
///
/// Blocking such a thread on a future is a recipe for deadlock, since the
/// future's listeners may need that very thread in order to run.
///
pub fn is_dispatcher_thread() -> bool {
    DISPATCHER_THREAD.with(Cell::get) > 0
}


/// Flag the calling thread as a dispatcher thread
pub(crate) fn mark_dispatcher_thread() {
    DISPATCHER_THREAD.with(|count| count.set(count.get() + 1));
}


/// Withdraw one dispatcher flag from the calling thread
pub(crate) fn unmark_dispatcher_thread() {
    DISPATCHER_THREAD.with(|count| count.set(count.get().saturating_sub(1)));
}
