//! Minimal future consumer interface
//!
//! Generally speaking, what a consumer can do with an asynchronous result
//! depends on how it chose to synchronize with it. However, one service which
//! is common to all consumers is the ability to say that they are not
//! interested anymore.
//!
//! Note that the precise semantics of cancellation are implementation-specific.
//! Some producers, like an HTTP call, can actually be aborted. Others can only
//! check whether their result is still wanted, via `Completer::is_cancelled()`,
//! and skip the remaining work when it is not.


/// Features which all future consumers are expected to share
pub trait Cancellable {
    /// Tell the producer that the result is not wanted anymore
    fn cancel(&self);
}
