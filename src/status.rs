//! Facilities to represent the status of observable futures
//!
//! The model is the following: every future starts in a pending state, and
//! ends up in exactly one of three final states. It either gets a value, gets a
//! failure, or is cancelled by its consumer before anything was delivered.


/// Representation of an observable future's status
///
/// Here are the possible state transitions:
///
/// - Pending -> Succeeded / Failed / Cancelled
/// - Succeeded / Failed -> Cancelled, as long as the outcome was not delivered
///
/// Once the outcome has been handed to a listener, the status won't change
/// anymore.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FutureStatus {
    /// No outcome has been produced yet
    Pending,

    /// The producer has supplied a value
    Succeeded,

    /// The producer has supplied a failure
    Failed,

    /// The consumer has cancelled the future
    Cancelled,
}
//
impl FutureStatus {
    /// Check if a future status is final (i.e. no new outcome can arrive)
    pub fn is_final(self) -> bool {
        use self::FutureStatus::*;
        match self {
            Pending => false,
            Succeeded | Failed | Cancelled => true,
        }
    }

    /// Check if the status holds an outcome that can still be delivered
    pub fn is_resolved(self) -> bool {
        matches!(self, FutureStatus::Succeeded | FutureStatus::Failed)
    }
}
//
impl Default for FutureStatus {
    fn default() -> Self {
        FutureStatus::Pending
    }
}
