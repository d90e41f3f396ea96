//! Elastic thread pool for background work
//!
//! This pool keeps a fixed number of core threads around, and grows up to a
//! maximal size when work arrives faster than it is processed. Extra threads
//! retire after staying idle for a while. When every thread is busy and the
//! pool cannot grow anymore, work is queued rather than rejected.

use crate::background::Executor;
use crate::config::PoolConfig;
use crate::dispatch::Task;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};


/// Thread pool which scales between a core size and a maximal size
pub struct ScalingThreadPool {
    shared: Arc<PoolShared>,
}
//
struct PoolShared {
    /// Pool sizing parameters
    config: PoolConfig,

    /// Work queue and thread accounting (mutex-protected)
    state: Mutex<PoolState>,

    /// Condition variable used to wake idle workers
    work_cv: Condvar,
}
//
struct PoolState {
    /// Tasks which no worker has picked up yet
    queue: VecDeque<Task>,

    /// Number of live worker threads
    threads: usize,

    /// Number of workers waiting for work
    idle: usize,

    /// Number of workers running a task
    active: usize,

    /// Set once the pool stops accepting work
    shut_down: bool,

    /// Join handles of the workers spawned so far
    handles: Vec<JoinHandle<()>>,

    /// Counter used to name worker threads
    spawned: usize,
}
//
impl ScalingThreadPool {
    /// Create a pool with the given sizing
    ///
    /// No thread is started until work is submitted. A maximal size smaller
    /// than the core size is raised to the core size, and both are at least 1.
    ///
    pub fn new(config: PoolConfig) -> Self {
        let core_size = config.core_size.max(1);
        let config = PoolConfig {
            core_size,
            max_size: config.max_size.max(core_size),
            ..config
        };
        ScalingThreadPool {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    threads: 0,
                    idle: 0,
                    active: 0,
                    shut_down: false,
                    handles: Vec::new(),
                    spawned: 0,
                }),
                work_cv: Condvar::new(),
            }),
        }
    }

    /// Submit a task to the pool
    ///
    /// Tasks submitted after shutdown are dropped with a warning.
    ///
    pub fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        let mut state = self.shared.lock_state();
        if state.shut_down {
            warn!("Dropping task submitted to a shut down thread pool");
            return;
        }
        state.queue.push_back(Box::new(task));

        let config = &self.shared.config;
        let must_grow = state.threads < config.core_size
                        || (state.idle < state.queue.len()
                            && state.threads < config.max_size);
        if must_grow {
            self.spawn_worker(&mut state);
        } else {
            self.shared.work_cv.notify_one();
        }
    }

    /// Number of threads currently running a task
    pub fn active_count(&self) -> usize {
        self.shared.lock_state().active
    }

    /// Number of live worker threads
    pub fn pool_size(&self) -> usize {
        self.shared.lock_state().threads
    }

    /// Number of tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.lock_state().queue.len()
    }

    /// Sizing parameters of this pool
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Stop accepting work, let the queue drain, and wait for every worker
    pub fn shutdown(&self) {
        let handles = {
            let mut state = self.shared.lock_state();
            state.shut_down = true;
            std::mem::take(&mut state.handles)
        };
        self.shared.work_cv.notify_all();
        debug!(workers = handles.len(), "Shutting down thread pool");
        for handle in handles {
            if handle.join().is_err() {
                warn!("Thread pool worker panicked");
            }
        }
    }

    fn spawn_worker(&self, state: &mut PoolState) {
        state.handles.retain(|handle| !handle.is_finished());
        state.spawned += 1;
        let name = format!("pool-worker-{}", state.spawned);
        let shared = self.shared.clone();
        match thread::Builder::new().name(name.clone())
                                    .spawn(move || shared.work()) {
            Ok(handle) => {
                state.threads += 1;
                state.handles.push(handle);
                debug!(%name, threads = state.threads, "Spawned pool worker");
            }
            Err(error) => {
                // Queued work will still be picked up by the existing workers
                warn!(%error, "Failed to spawn pool worker");
                self.shared.work_cv.notify_one();
            }
        }
    }
}
//
impl PoolShared {
    fn lock_state(&self) -> MutexGuard<PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Worker thread main loop
    fn work(&self) {
        let mut state = self.lock_state();
        loop {
            if let Some(task) = state.queue.pop_front() {
                state.active += 1;
                drop(state);
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    warn!("Pool task panicked");
                }
                state = self.lock_state();
                state.active -= 1;
                continue;
            }

            if state.shut_down {
                state.threads -= 1;
                trace!(threads = state.threads, "Pool worker exiting");
                return;
            }

            state.idle += 1;
            if state.threads > self.config.core_size {
                let (new_state, wait) = self.work_cv
                    .wait_timeout(state, self.config.keep_alive())
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                state = new_state;
                state.idle -= 1;
                if wait.timed_out() && state.queue.is_empty()
                   && state.threads > self.config.core_size
                {
                    state.threads -= 1;
                    debug!(threads = state.threads, "Retiring idle pool worker");
                    return;
                }
            } else {
                state = self.work_cv
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                state.idle -= 1;
            }
        }
    }
}
//
impl Executor for ScalingThreadPool {
    fn execute(&self, task: Task) {
        self.submit(task);
    }
}
//
impl Default for ScalingThreadPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
//
impl Drop for ScalingThreadPool {
    fn drop(&mut self) {
        // Workers finish the queue and exit on their own
        self.shared.lock_state().shut_down = true;
        self.shared.work_cv.notify_all();
    }
}
