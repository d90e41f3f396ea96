//! Producer side of an observable future
//!
//! The completer is the handle through which a worker hands its outcome over.
//! It may be cloned and sent around freely; all clones share the same single
//! assignment, so the first outcome wins and later ones are ignored.
//!
//! If every clone of a completer is dropped before an outcome was supplied,
//! the future fails with `Error::Abandoned` instead of leaving its consumer
//! hanging forever.

use crate::error::{Error, Failure};
use crate::future::Shared;
use crate::status::FutureStatus;
use std::fmt;
use std::sync::Arc;
use tracing::debug;


/// Producer interface, used to resolve an observable future
pub struct Completer<T: Send + 'static> {
    inner: Arc<CompleterInner<T>>,
}
//
impl<T: Send + 'static> Completer<T> {
    /// Create a producer handle for some future state
    pub(crate) fn new(shared: Arc<Shared<T>>) -> Self {
        Completer {
            inner: Arc::new(CompleterInner { shared }),
        }
    }

    /// Resolve the future with a value
    pub fn complete(&self, value: T) {
        self.resolve(Ok(value));
    }

    /// Resolve the future with a failure
    pub fn fail<F: Into<Failure>>(&self, failure: F) {
        self.resolve(Err(failure.into()));
    }

    /// Resolve the future with either a value or a failure
    ///
    /// Returns whether the outcome was accepted. It is not when the future was
    /// already resolved or has been cancelled.
    ///
    pub fn resolve(&self, outcome: Result<T, Failure>) -> bool {
        Shared::resolve(&self.inner.shared, outcome)
    }

    /// Check whether the consumer has cancelled the future
    ///
    /// Long-running producers should check this periodically, and stop
    /// working early when the result is not wanted anymore.
    ///
    pub fn is_cancelled(&self) -> bool {
        self.inner.shared.is_cancelled()
    }

    /// Current status of the future being produced
    pub fn status(&self) -> FutureStatus {
        self.inner.shared.status()
    }
}
//
impl<T: Send + 'static> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Completer { inner: self.inner.clone() }
    }
}
//
impl<T: Send + 'static> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completer")
         .field("status", &self.status())
         .finish()
    }
}


/// State shared by all clones of a completer
struct CompleterInner<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}
//
impl<T: Send + 'static> Drop for CompleterInner<T> {
    /// If every producer handle is dropped before the future was resolved,
    /// notify the consumer in order to prevent it from hanging
    fn drop(&mut self) {
        if Shared::resolve(&self.shared, Err(Error::Abandoned.into())) {
            debug!("Future abandoned by its producer");
        }
    }
}
