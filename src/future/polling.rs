//! Polling-based future monitoring
//!
//! This module provides a way to monitor observable futures through polling.
//! It provides maximal performance in scenarios where a client does not need
//! to synchronize with a future, but only to periodically check its status,
//! as is the case for example when refreshing a loading indicator.

use crate::future::ObservableFuture;
use crate::status::FutureStatus;
use triple_buffer::{Output, TripleBuffer};


impl<T: Send + 'static> ObservableFuture<T> {
    /// Create a lock-free status monitor for this future
    ///
    /// Every monitor sees every status change from the moment it is created.
    /// Monitoring does not count as observing, and can be combined with any
    /// other synchronization mechanism.
    ///
    pub fn monitor(&self) -> StatusMonitor {
        let mut state = self.shared.lock_state();

        // Setup triple buffer-based status propagation...
        let buffer = TripleBuffer::new(&state.status);
        let (buf_input, buf_output) = buffer.split();

        // ...then let the future feed it
        state.monitors.push(buf_input);
        StatusMonitor { buf_output }
    }
}


/// Client interface, used to poll the status of a future
pub struct StatusMonitor {
    /// Current status will be read through this triple buffer
    buf_output: Output<FutureStatus>,
}
//
impl StatusMonitor {
    /// Access the latest status of the future
    pub fn status(&mut self) -> FutureStatus {
        *self.buf_output.read()
    }

    /// Check whether the status changed since it was last read
    pub fn updated(&self) -> bool {
        self.buf_output.updated()
    }
}
