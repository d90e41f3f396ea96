//! Errors and failures of observable futures
//!
//! Two notions coexist here. `Error` enumerates the ways in which this crate
//! itself can refuse an operation or end a future early. `Failure` is what a
//! future actually carries when it does not succeed: any error type at all,
//! type-erased and reference-counted so that a single failure can be handed to
//! every listener of a batch.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;


/// Errors raised by the future machinery itself
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// The future was cancelled before its outcome could be observed
    #[error("future was cancelled")]
    Cancelled,

    /// Every producer handle was dropped without resolving the future
    #[error("future producer was dropped before resolving the future")]
    Abandoned,

    /// A blocking wait did not see an outcome in time
    #[error("timed out after {0:?} waiting for the future")]
    Timeout(Duration),

    /// The future finished without delivering either a value or a failure
    #[error("future finished without result or failure")]
    NoResult,

    /// A success or failure listener was registered twice
    #[error("listener already set")]
    ListenerAlreadySet,

    /// The future was observed twice
    #[error("already observing")]
    AlreadyObserving,

    /// A combinator was handed a future which already had a subscriber
    #[error("source future already has a subscriber")]
    AlreadyObserved,

    /// Blocking on a future from a dispatcher thread would deadlock it
    #[error("cannot block on a future from a dispatcher thread")]
    BlockingOnDispatcher,

    /// A background closure panicked instead of returning
    #[error("background task panicked: {0}")]
    Panicked(String),
}


/// Type-erased, cheaply cloneable failure carried by a future
///
/// Any `std::error::Error` converts into a `Failure`, so `?` can be used in
/// closures returning `Result<T, Failure>`. The original error can be
/// recovered with `downcast_ref()`.
///
/// `Failure` does not implement `std::error::Error` itself, as that would
/// conflict with the blanket conversion above.
///
#[derive(Clone)]
pub struct Failure(Arc<dyn StdError + Send + Sync + 'static>);
//
impl Failure {
    /// Wrap an error into a failure
    pub fn new<E: StdError + Send + Sync + 'static>(error: E) -> Self {
        Failure(Arc::new(error))
    }

    /// Build a failure from a plain message
    pub fn msg<M: fmt::Display>(message: M) -> Self {
        Failure::new(MessageError(message.to_string()))
    }

    /// Access the underlying error
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }

    /// Check whether the underlying error is of type E
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// Attempt to access the underlying error as a concrete type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Walk the chain of error sources, starting with the failure itself
    pub fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        let first: &(dyn StdError + 'static) = &*self.0;
        std::iter::successors(Some(first), |&e| e.source())
    }

    /// Check whether two failures share the same underlying error object
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
//
impl<E: StdError + Send + Sync + 'static> From<E> for Failure {
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}
//
impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}
//
impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}


/// Error type behind `Failure::msg()`
#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);
