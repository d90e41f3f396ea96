//! Composition of observable futures
//!
//! Every combinator takes exclusive ownership of the outcome of its inputs: it
//! subscribes to them and observes them on caller right away. An input which
//! already had a listener or was already observed cannot be composed, and
//! yields a future failed with `Error::AlreadyObserved`.
//!
//! Cancelling a composed future cancels its inputs.

use crate::completer::Completer;
use crate::error::{Error, Failure};
use crate::future::ObservableFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;


impl<T: Send + 'static> ObservableFuture<T> {
    /// Chain a second asynchronous step onto this one
    ///
    /// Once this future succeeds, `chain` builds the next future from its
    /// value, and the outcome of that one becomes the result. A failure of
    /// either step is propagated.
    ///
    pub fn and_then<V, F>(self, chain: F) -> ObservableFuture<V>
        where V: Send + 'static,
              F: FnOnce(T) -> ObservableFuture<V> + Send + 'static
    {
        let stage = NextStage::new();
        self.derive(stage.tracker(), move |value, completer| {
            let next = chain(value);
            stage.forward(next, completer);
        })
    }

    /// Chain a second asynchronous step, keeping both results
    pub fn and_then_also<V, F>(self, chain: F) -> ObservableFuture<(T, V)>
        where V: Send + 'static,
              F: FnOnce(&T) -> ObservableFuture<V> + Send + 'static
    {
        let stage = NextStage::new();
        self.derive(stage.tracker(), move |first, completer| {
            let next = chain(&first).map(move |second| (first, second));
            stage.forward(next, completer);
        })
    }

    /// Transform the value of this future
    pub fn map<V, F>(self, transform: F) -> ObservableFuture<V>
        where V: Send + 'static,
              F: FnOnce(T) -> V + Send + 'static
    {
        self.derive(None, move |value, completer| {
            completer.complete(transform(value))
        })
    }

    /// Transform the failure of this future
    pub fn map_failure<F>(self, transform: F) -> ObservableFuture<T>
        where F: FnOnce(Failure) -> Failure + Send + 'static
    {
        let (completer, derived) = ObservableFuture::pending();
        derived.cancel_upstream(&self);
        let on_success = completer.clone();
        let on_failure = completer.clone();
        let subscribed = self.subscribe(
            move |value| on_success.complete(value),
            move |failure| on_failure.fail(transform(failure)),
        );
        if subscribed.is_err() {
            completer.fail(Error::AlreadyObserved);
        }
        derived
    }

    /// Turn failures into an absent value
    pub fn optional(self) -> ObservableFuture<Option<T>> {
        let (completer, derived) = ObservableFuture::pending();
        derived.cancel_upstream(&self);
        let on_success = completer.clone();
        let on_failure = completer.clone();
        let subscribed = self.subscribe(
            move |value| on_success.complete(Some(value)),
            move |failure| {
                trace!(%failure, "Optional future failed, yielding nothing");
                on_failure.complete(None)
            },
        );
        if subscribed.is_err() {
            completer.fail(Error::AlreadyObserved);
        }
        derived
    }

    /// Build a future from the value of this one, propagating failures
    fn derive<V, S>(self,
                    stage: Option<StageTracker<V>>,
                    on_value: S) -> ObservableFuture<V>
        where V: Send + 'static,
              S: FnOnce(T, Completer<V>) + Send + 'static
    {
        let (completer, derived) = ObservableFuture::pending();
        derived.cancel_upstream(&self);
        if let Some(stage) = stage {
            derived.on_cancel(move || stage.cancel());
        }

        let on_success = completer.clone();
        let on_failure = completer.clone();
        let subscribed = self.subscribe(
            move |value| on_value(value, on_success),
            move |failure| on_failure.fail(failure),
        );
        if subscribed.is_err() {
            completer.fail(Error::AlreadyObserved);
        }
        derived
    }

    /// Make cancellation of this future cancel another one
    fn cancel_upstream<U: Send + 'static>(&self, upstream: &ObservableFuture<U>) {
        let upstream = Arc::downgrade(&upstream.shared);
        self.on_cancel(move || {
            if let Some(upstream) = upstream.upgrade() {
                upstream.cancel();
            }
        });
    }
}


/// Second step of a chain, tracked so that it can be cancelled
struct NextStage<V: Send + 'static> {
    current: Arc<Mutex<Option<ObservableFuture<V>>>>,
}
//
impl<V: Send + 'static> NextStage<V> {
    fn new() -> Self {
        NextStage { current: Arc::new(Mutex::new(None)) }
    }

    fn tracker(&self) -> Option<StageTracker<V>> {
        Some(StageTracker { current: self.current.clone() })
    }

    /// Make the outcome of the next step the outcome of the chain
    fn forward(self, next: ObservableFuture<V>, completer: Completer<V>) {
        *lock(&self.current) = Some(next.clone());

        // The chain may have been cancelled while the next step was built
        if completer.is_cancelled() {
            next.cancel();
            return;
        }
        let on_success = completer.clone();
        let on_failure = completer.clone();
        let subscribed = next.subscribe(
            move |value| on_success.complete(value),
            move |failure| on_failure.fail(failure),
        );
        if subscribed.is_err() {
            completer.fail(Error::AlreadyObserved);
        }
    }
}


/// Handle used by a chain's cancellation hook to reach the next step
struct StageTracker<V: Send + 'static> {
    current: Arc<Mutex<Option<ObservableFuture<V>>>>,
}
//
impl<V: Send + 'static> StageTracker<V> {
    fn cancel(self) {
        let current = lock(&self.current).take();
        if let Some(next) = current {
            next.cancel();
        }
    }
}


/// Combine two futures into a future of both values
///
/// The first failure wins. Cancelling the result cancels both inputs.
///
pub fn of2<A, B>(first: ObservableFuture<A>,
                 second: ObservableFuture<B>) -> ObservableFuture<(A, B)>
    where A: Send + 'static,
          B: Send + 'static
{
    let (completer, merged) = ObservableFuture::pending();
    merged.cancel_upstream(&first);
    merged.cancel_upstream(&second);
    let join = Arc::new(Mutex::new(Join2 { first: None, second: None, done: false }));

    let (s_join, f_join) = (join.clone(), join.clone());
    let (s_completer, f_completer) = (completer.clone(), completer.clone());
    let first_subscribed = first.subscribe(
        move |a| {
            let values = {
                let mut join = lock(&s_join);
                join.first = Some(a);
                join.try_finish()
            };
            if let Some(values) = values {
                s_completer.complete(values);
            }
        },
        move |failure| fail_once(&f_join, &f_completer, failure),
    );

    let (s_join, f_join) = (join.clone(), join.clone());
    let (s_completer, f_completer) = (completer.clone(), completer.clone());
    let second_subscribed = second.subscribe(
        move |b| {
            let values = {
                let mut join = lock(&s_join);
                join.second = Some(b);
                join.try_finish()
            };
            if let Some(values) = values {
                s_completer.complete(values);
            }
        },
        move |failure| fail_once(&f_join, &f_completer, failure),
    );

    if first_subscribed.is_err() || second_subscribed.is_err() {
        fail_once(&join, &completer, Error::AlreadyObserved.into());
    }
    merged
}


/// Combine three futures into a future of all three values
pub fn of3<A, B, C>(first: ObservableFuture<A>,
                    second: ObservableFuture<B>,
                    third: ObservableFuture<C>) -> ObservableFuture<(A, B, C)>
    where A: Send + 'static,
          B: Send + 'static,
          C: Send + 'static
{
    of2(of2(first, second), third).map(|((a, b), c)| (a, b, c))
}


/// Combine any number of futures into a future of all their values
///
/// Values are reported in input order. The first failure wins, and later
/// outcomes are ignored. An empty input resolves to an empty vector.
///
pub fn of_all<T: Send + 'static>(futures: Vec<ObservableFuture<T>>)
    -> ObservableFuture<Vec<T>>
{
    let (completer, merged) = ObservableFuture::pending();
    if futures.is_empty() {
        completer.complete(Vec::new());
        return merged;
    }
    for future in &futures {
        merged.cancel_upstream(future);
    }

    let join = Arc::new(Mutex::new(JoinAll {
        results: futures.iter().map(|_| None).collect(),
        remaining: futures.len(),
        done: false,
    }));
    let mut all_subscribed = true;
    for (index, future) in futures.into_iter().enumerate() {
        let (s_join, f_join) = (join.clone(), join.clone());
        let (s_completer, f_completer) = (completer.clone(), completer.clone());
        let subscribed = future.subscribe(
            move |value| {
                let values = lock(&s_join).store(index, value);
                if let Some(values) = values {
                    s_completer.complete(values);
                }
            },
            move |failure| fail_once(&f_join, &f_completer, failure),
        );
        all_subscribed &= subscribed.is_ok();
    }
    if !all_subscribed {
        fail_once(&join, &completer, Error::AlreadyObserved.into());
    }
    merged
}


/// Common behaviour of join states
trait Join {
    /// Mark the join as finished, tell whether it already was
    fn finish(&mut self) -> bool;
}


/// Fail a merged future, unless it is already finished
fn fail_once<J: Join, V: Send + 'static>(join: &Mutex<J>,
                                          completer: &Completer<V>,
                                          failure: Failure) {
    let already_done = lock(join).finish();
    if !already_done {
        completer.fail(failure);
    }
}


/// Partial results of of2()
struct Join2<A, B> {
    first: Option<A>,
    second: Option<B>,
    done: bool,
}
//
impl<A, B> Join2<A, B> {
    fn try_finish(&mut self) -> Option<(A, B)> {
        if self.done || self.first.is_none() || self.second.is_none() {
            return None;
        }
        self.done = true;
        self.first.take().zip(self.second.take())
    }
}
//
impl<A, B> Join for Join2<A, B> {
    fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.done, true)
    }
}


/// Partial results of of_all()
struct JoinAll<T> {
    results: Vec<Option<T>>,
    remaining: usize,
    done: bool,
}
//
impl<T> JoinAll<T> {
    /// Record one value, return every value once they are all there
    fn store(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        if self.done {
            return None;
        }
        self.results[index] = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        self.done = true;
        Some(self.results.drain(..).flatten().collect())
    }
}
//
impl<T> Join for JoinAll<T> {
    fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.done, true)
    }
}


fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
