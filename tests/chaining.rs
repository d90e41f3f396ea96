//! Cross-thread composition and lifecycle-bound delivery

use observable_futures::background::on_background;
use observable_futures::dispatch::queue::QueueDispatcher;
use observable_futures::{of2, of_all, Error, Failure, FutureStatus, LifecycleRegistry};
use observable_futures::ObservableFuture;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;


/// Background steps chained together, delivered on the dispatcher thread
#[test]
fn chain_delivered_on_dispatcher() {
    let ui = Arc::new(QueueDispatcher::new());
    let lifecycle = Arc::new(LifecycleRegistry::new(ui.clone()));
    let ui_thread = thread::current().id();

    let chained = on_background(|| Ok::<_, Failure>(20u32))
        .and_then(|value| on_background(move || Ok::<_, Failure>(value + 1)))
        .and_then_also(|value| {
            let value = *value;
            on_background(move || Ok::<_, Failure>(value * 2))
        });

    let received = Arc::new(Mutex::new(None));
    let c_received = received.clone();
    chained.on_success(move |pair| {
        assert_eq!(thread::current().id(), ui_thread);
        *c_received.lock().unwrap() = Some(pair);
    }).unwrap();
    chained.observe(lifecycle).unwrap();

    assert!(ui.run_until(|| received.lock().unwrap().is_some(), Duration::from_secs(5)));
    assert_eq!(*received.lock().unwrap(), Some((21, 42)));
}


/// Stopping the lifecycle cancels the whole chain
#[test]
fn lifecycle_stop_cancels_chain() {
    let ui = Arc::new(QueueDispatcher::new());
    let lifecycle = Arc::new(LifecycleRegistry::new(ui.clone()));

    let (completer, source) = ObservableFuture::<u32>::pending();
    let chained = source.map(|value| value + 1);
    chained.on_success(|_| panic!("listener of a cancelled future ran")).unwrap();
    chained.observe(lifecycle.clone()).unwrap();

    lifecycle.stop();
    assert_eq!(chained.status(), FutureStatus::Cancelled);
    assert!(completer.is_cancelled());

    let worker = thread::spawn(move || completer.resolve(Ok(1)));
    assert!(!worker.join().unwrap());
    assert_eq!(ui.run_pending(), 0);
}


/// Merged futures resolved from several threads
#[test]
fn merge_from_threads() {
    let inputs: Vec<_> = (0..10u64).map(|index| {
        on_background(move || {
            thread::sleep(Duration::from_millis(10 * (10 - index)));
            Ok::<_, Failure>(index)
        })
    }).collect();
    let merged = of_all(inputs);
    let values = merged.execute_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(values, (0..10).collect::<Vec<_>>());

    let pair = of2(on_background(|| Ok::<_, Failure>("left")),
                   on_background(|| Ok::<_, Failure>(7i64)));
    assert_eq!(pair.execute_timeout(Duration::from_secs(5)).unwrap(), ("left", 7));
}


/// The first failure of a merge wins, and is the one reported
#[test]
fn merge_failure() {
    let (_slow, pending) = ObservableFuture::<u32>::pending();
    let failing = on_background(|| -> Result<u32, Failure> { Err(Failure::msg("broken")) });
    let merged = of_all(vec![pending.clone(), failing]);
    let failure = merged.execute_timeout(Duration::from_secs(5)).unwrap_err();
    assert_eq!(failure.to_string(), "broken");

    // Blocking on a dispatcher thread is refused outright
    let _ui = QueueDispatcher::new();
    let refused = ObservableFuture::with_data(1u8).execute().unwrap_err();
    assert_eq!(refused.downcast_ref::<Error>(), Some(&Error::BlockingOnDispatcher));
}
