//! Observable futures
//!
//! Picture yourself writing an application with a user interface: a screen
//! asks for some data, which has to come from the network, or a database, or
//! some lengthy computation. The work must not run on the UI thread, but its
//! result must be delivered there. And if the user leaves the screen before
//! the data arrives, nobody should be notified anymore, and ideally the work
//! should stop.
//!
//! This crate revolves around `ObservableFuture`, a single-assignment future
//! with a single subscriber. A producer resolves it through a `Completer`,
//! and a consumer observes it either on whichever thread produces the outcome,
//! or through a `Lifecycle` whose dispatcher decides where listeners run and
//! whose end cancels the future. Futures can be chained and merged, and two
//! wrappers, `AsyncMemoizer` and `BatchingObservableFuture`, make sure that
//! concurrent requests for the same value only trigger the work once.
//!
//! Around this core, the crate provides helpers to run work in the background,
//! an elastic thread pool, a time-limited cache, and an adapter which turns
//! pending network calls into futures.

pub mod background;
pub mod batching;
pub mod caching;
pub mod client;
pub mod completer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod future;
pub mod lifecycle;
pub mod memoizer;
pub mod net;
pub mod pool;
pub mod status;

pub use crate::batching::BatchingObservableFuture;
pub use crate::client::Cancellable;
pub use crate::completer::Completer;
pub use crate::config::Config;
pub use crate::error::{Error, Failure};
pub use crate::future::ObservableFuture;
pub use crate::future::combinators::{of2, of3, of_all};
pub use crate::lifecycle::{Lifecycle, LifecycleRegistry};
pub use crate::memoizer::AsyncMemoizer;
pub use crate::status::FutureStatus;
