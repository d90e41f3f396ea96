//! Observable futures demonstration
//!
//! This program plays the part of an application whose screens all want the
//! same slow resource at once. Requests are coalesced by a batching future,
//! the work runs on an elastic thread pool, and results are delivered on a
//! simulated UI thread through a lifecycle.
//!
//! An optional TOML configuration file may be passed as the first argument.
//! Log verbosity is controlled through the `RUST_LOG` environment variable.

use observable_futures::background::on_background_with;
use observable_futures::dispatch::queue::QueueDispatcher;
use observable_futures::pool::ScalingThreadPool;
use observable_futures::{BatchingObservableFuture, Config, Failure, LifecycleRegistry};
use observable_futures::{AsyncMemoizer, Lifecycle};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;


fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
                             .unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match env::args().nth(1) {
        Some(path) => Config::load_or_default(path),
        None => Ok(Config::default()),
    };
    match config {
        Ok(config) => {
            run(config);
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!(%error, "Invalid configuration");
            ExitCode::FAILURE
        }
    }
}


fn run(config: Config) {
    let pool = Arc::new(ScalingThreadPool::new(config.pool.clone()));
    let fetches = Arc::new(AtomicUsize::new(0));

    // The "UI thread" is this one, and its screen lives as long as the demo
    let ui = Arc::new(QueueDispatcher::new());
    let screen: Arc<dyn Lifecycle> = Arc::new(LifecycleRegistry::new(ui.clone()));

    // Every screen widget asks for the resource, but only one fetch happens
    let batch = BatchingObservableFuture::with_peek(|value: &String| {
        info!(%value, "Resource fetched");
    });
    let delivered = Arc::new(AtomicUsize::new(0));
    for widget in 0..5 {
        let (pool, fetches) = (pool.clone(), fetches.clone());
        let future = batch.create(move || {
            on_background_with(&*pool, move || {
                fetches.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                Ok::<_, Failure>("resource contents".to_owned())
            })
        });
        let delivered = delivered.clone();
        let listen = future.on_success(move |value| {
            info!(widget, %value, "Widget got the resource");
            delivered.fetch_add(1, Ordering::SeqCst);
        }).and_then(|future| future.on_failure(move |failure| {
            error!(widget, %failure, "Widget failed to get the resource");
        })).and_then(|future| future.observe(screen.clone()));
        if let Err(error) = listen {
            error!(widget, %error, "Failed to observe the resource");
        }
    }

    let timeout = config.execute_timeout().unwrap_or(Duration::from_secs(5));
    if !ui.run_until(|| delivered.load(Ordering::SeqCst) == 5, timeout) {
        error!("Timed out waiting for the resource");
    }
    info!(fetches = fetches.load(Ordering::SeqCst), "Batching done");

    // Settings only need to be computed once, however often they are asked for
    let settings = AsyncMemoizer::new();
    let worker_settings = settings.clone();
    let worker_pool = pool.clone();
    let worker = thread::spawn(move || {
        worker_settings.run_once(|| {
            on_background_with(&*worker_pool, || Ok::<_, Failure>(42u32))
        }).execute_timeout(timeout)
    });
    match worker.join() {
        Ok(Ok(value)) => info!(value, "Settings computed"),
        Ok(Err(failure)) => error!(%failure, "Settings computation failed"),
        Err(_) => error!("Settings worker panicked"),
    }
    let again = settings.future();
    info!(status = ?again.status(), "Settings requested again");

    pool.shutdown();
}
