//! Bounded concurrent scheduling of asynchronous calls.
//!
//! Async calls wait in `ready` until both the global and the per-host
//! limit admit them, run in `running`, and synchronous calls are tracked
//! in a third registry so cancel-all and the idle callback see them too.
//! All three collections are guarded by one lock; execution happens
//! outside it.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::call::{AsyncTask, Call};

/// Runs dispatcher jobs. The default spawns a named thread per job, which
/// at this engine's scale behaves like the unbounded cached pool the
/// design calls for; swap in something else for tighter control.
pub trait Executor: Send + Sync {
    fn execute(&self, name: String, job: Box<dyn FnOnce() + Send>);
}

struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, name: String, job: Box<dyn FnOnce() + Send>) {
        if let Err(e) = thread::Builder::new().name(name).spawn(job) {
            warn!("failed to spawn dispatcher thread: {}", e);
        }
    }
}

struct Running {
    host: String,
    call: Call,
}

struct Inner {
    max_requests: usize,
    max_requests_per_host: usize,
    ready: VecDeque<AsyncTask>,
    running: Vec<Running>,
    running_sync: Vec<Call>,
    idle_callback: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Inner {
    fn host_count(&self, host: &str) -> usize {
        self.running.iter().filter(|r| r.host == host).count()
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty() && self.running_sync.is_empty()
    }
}

/// Schedules async calls and registers every in-flight call.
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
    inner: Mutex<Inner>,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher::with_executor(Arc::new(ThreadExecutor))
    }

    pub fn with_executor(executor: Arc<dyn Executor>) -> Dispatcher {
        Dispatcher {
            executor,
            inner: Mutex::new(Inner {
                max_requests: 64,
                max_requests_per_host: 5,
                ready: VecDeque::new(),
                running: Vec::new(),
                running_sync: Vec::new(),
                idle_callback: None,
            }),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.lock().max_requests
    }

    /// Cap on concurrently running async calls. Takes effect immediately;
    /// raising it promotes waiting calls.
    pub fn set_max_requests(&self, max: usize) {
        assert!(max >= 1, "max_requests must be at least 1");
        self.lock().max_requests = max;
        self.promote_and_execute();
    }

    pub fn max_requests_per_host(&self) -> usize {
        self.lock().max_requests_per_host
    }

    /// Cap on concurrently running async calls sharing a host.
    pub fn set_max_requests_per_host(&self, max: usize) {
        assert!(max >= 1, "max_requests_per_host must be at least 1");
        self.lock().max_requests_per_host = max;
        self.promote_and_execute();
    }

    /// Invoked whenever the dispatcher becomes idle: no calls ready,
    /// running, or executing synchronously.
    pub fn set_idle_callback(&self, callback: Option<Arc<dyn Fn() + Send + Sync>>) {
        self.lock().idle_callback = callback;
    }

    /// Calls waiting for capacity.
    pub fn queued_calls(&self) -> Vec<Call> {
        self.lock().ready.iter().map(|t| t.call().clone()).collect()
    }

    /// Calls currently executing, async and sync.
    pub fn running_calls(&self) -> Vec<Call> {
        let inner = self.lock();
        inner
            .running
            .iter()
            .map(|r| r.call.clone())
            .chain(inner.running_sync.iter().cloned())
            .collect()
    }

    pub fn queued_count(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn running_count(&self) -> usize {
        let inner = self.lock();
        inner.running.len() + inner.running_sync.len()
    }

    /// Cancel every queued and running call.
    pub fn cancel_all(&self) {
        let calls: Vec<Call> = {
            let inner = self.lock();
            inner
                .ready
                .iter()
                .map(|t| t.call().clone())
                .chain(inner.running.iter().map(|r| r.call.clone()))
                .chain(inner.running_sync.iter().cloned())
                .collect()
        };
        for call in calls {
            call.cancel();
        }
    }

    pub(crate) fn enqueue(&self, task: AsyncTask) {
        self.lock().ready.push_back(task);
        self.promote_and_execute();
    }

    pub(crate) fn executed(&self, call: &Call) {
        self.lock().running_sync.push(call.clone());
    }

    pub(crate) fn finished_sync(&self, call: &Call) {
        self.lock().running_sync.retain(|c| !c.same_call(call));
        self.promote_and_execute();
    }

    pub(crate) fn finished_async(&self, call: &Call) {
        self.lock().running.retain(|r| !r.call.same_call(call));
        self.promote_and_execute();
    }

    /// The promotion rule: move ready calls into running while the global
    /// cap has room and their host is under its cap, then run them on the
    /// executor outside the lock.
    fn promote_and_execute(&self) {
        let mut executable: Vec<AsyncTask> = Vec::new();
        let idle_callback = {
            let mut inner = self.lock();

            let mut i = 0;
            while i < inner.ready.len() {
                if inner.running.len() >= inner.max_requests {
                    break;
                }
                let host = inner.ready[i].host();
                if inner.host_count(&host) >= inner.max_requests_per_host {
                    i += 1;
                    continue;
                }
                let task = inner.ready.remove(i).expect("index in bounds");
                inner.running.push(Running {
                    host,
                    call: task.call().clone(),
                });
                executable.push(task);
            }

            if inner.is_idle() {
                inner.idle_callback.clone()
            } else {
                None
            }
        };

        for task in executable {
            debug!("dispatch call to {}", task.host());
            self.executor
                .execute(format!("callwire {}", task.host()), Box::new(move || task.run()));
        }

        if let Some(callback) = idle_callback {
            callback();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("dispatcher lock")
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
    }
}
