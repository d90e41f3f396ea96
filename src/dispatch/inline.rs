//! Inline dispatcher, implementing synchronous listener execution
//!
//! This dispatcher directly runs tasks on whichever thread hands them over. It
//! is the right choice for hosts which have no UI thread to protect, and for
//! tests that do not care about thread affinity.

use crate::dispatch::{Dispatcher, Task};


/// Dispatcher implementation suitable for inline task execution
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineDispatcher {}
//
impl InlineDispatcher {
    /// Create a new inline dispatcher
    pub fn new() -> Self {
        InlineDispatcher {}
    }
}
//
impl Dispatcher for InlineDispatcher {
    fn is_current(&self) -> bool {
        true
    }

    fn post(&self, task: Task) {
        task();
    }
}
