//! Named callback workers and the task scheduling shim.
//!
//! Every worker owns a FIFO queue drained by one tokio task. Workers are kept in
//! a registry populated when they are spawned, and the worker currently running
//! a task is published through a task-local context, so [`Dispatcher::schedule_task`]
//! can re-enter the caller's own queue without inspecting thread identity.

pub mod config;

use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use config::DispatcherConfig;

pub const MONITOR_WORKER: &str = "monitor";
pub const GET_PUT_WORKER: &str = "get_put";
pub const CONNECTION_WORKER: &str = "connection";
pub const UTILITY_WORKER: &str = "utility";

pub type Task = Box<dyn FnOnce() + Send + 'static>;

tokio::task_local! {
    static CURRENT_WORKER: WorkerContext;
}

#[derive(Clone)]
struct WorkerContext {
    name: Arc<str>,
    queue: UnboundedSender<Task>,
}

/// Name of the dispatcher worker running the current task, if any.
pub fn current_worker() -> Option<String> {
    CURRENT_WORKER.try_with(|ctx| ctx.name.to_string()).ok()
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    workers: RwLock<HashMap<String, WorkerContext>>,
    utility: String,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.worker_names())
            .field("utility", &self.inner.utility)
            .finish()
    }
}

impl Dispatcher {
    /// Must be called from within a tokio runtime.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_handle(config, Handle::current())
    }

    pub fn with_handle(config: DispatcherConfig, runtime: Handle) -> Self {
        let dispatcher = Dispatcher {
            inner: Arc::new(Inner {
                workers: RwLock::new(HashMap::new()),
                utility: config.utility_worker.clone(),
                runtime,
                shutdown: CancellationToken::new(),
            }),
        };

        for name in &config.workers {
            dispatcher.spawn_worker(name);
        }
        dispatcher.spawn_worker(&config.utility_worker);

        dispatcher
    }

    /// Registers and starts a worker. Returns false if the name is taken.
    pub fn spawn_worker(&self, name: &str) -> bool {
        let mut workers = self
            .inner
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if workers.contains_key(name) {
            return false;
        }

        let (tx, rx) = mpsc::unbounded_channel::<Task>();
        let ctx = WorkerContext {
            name: Arc::from(name),
            queue: tx,
        };
        workers.insert(name.to_string(), ctx.clone());

        self.inner
            .runtime
            .spawn(Self::worker_loop(ctx, rx, self.inner.shutdown.clone()));
        true
    }

    pub fn worker_names(&self) -> Vec<String> {
        let workers = self
            .inner
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn utility_worker(&self) -> &str {
        &self.inner.utility
    }

    /// Queues `func` on the named worker, or on the utility worker when no
    /// worker has that name.
    pub fn submit<F>(&self, worker: &str, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let target = self.lookup(worker).or_else(|| {
            warn!("Unknown dispatcher worker '{}', using utility queue", worker);
            self.lookup(&self.inner.utility)
        });
        Self::push(target, Box::new(func));
    }

    /// Runs `func` on the caller's worker when called from one of this
    /// dispatcher's workers, otherwise on the utility worker.
    ///
    /// With a delay, a one-shot timer makes that choice when it fires, from the
    /// timer's own context.
    pub fn schedule_task<F>(&self, func: F, delay: Option<Duration>)
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(func);
        match delay {
            None => self.enqueue(task),
            Some(delay) => {
                let dispatcher = self.clone();
                self.inner.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    dispatcher.enqueue(task);
                });
            }
        }
    }

    /// Stops every worker. Tasks still queued are dropped.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn enqueue(&self, task: Task) {
        let own_worker = CURRENT_WORKER
            .try_with(|ctx| ctx.clone())
            .ok()
            .filter(|ctx| self.owns(ctx));

        let target = own_worker.or_else(|| self.lookup(&self.inner.utility));
        Self::push(target, task);
    }

    fn owns(&self, ctx: &WorkerContext) -> bool {
        self.lookup(&ctx.name)
            .map(|registered| registered.queue.same_channel(&ctx.queue))
            .unwrap_or(false)
    }

    fn lookup(&self, name: &str) -> Option<WorkerContext> {
        self.inner
            .workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn push(target: Option<WorkerContext>, task: Task) {
        match target {
            Some(ctx) => {
                if ctx.queue.send(task).is_err() {
                    warn!("Dispatcher worker '{}' is gone, task dropped", ctx.name);
                }
            }
            None => warn!("Dispatcher has no worker to run task, task dropped"),
        }
    }

    async fn worker_loop(
        ctx: WorkerContext,
        mut rx: UnboundedReceiver<Task>,
        shutdown: CancellationToken,
    ) {
        debug!("Dispatcher worker '{}' started", ctx.name);

        loop {
            tokio::select! {
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    let outcome = CURRENT_WORKER.sync_scope(ctx.clone(), || {
                        panic::catch_unwind(AssertUnwindSafe(task))
                    });
                    if outcome.is_err() {
                        error!("Task panicked on dispatcher worker '{}'", ctx.name);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Dispatcher worker '{}' stopped", ctx.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_default_workers_registered() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        assert_eq!(
            dispatcher.worker_names(),
            vec!["connection", "get_put", "monitor", "utility"]
        );
        assert!(!dispatcher.spawn_worker("monitor"));
        assert!(dispatcher.spawn_worker("A"));
    }

    #[tokio::test]
    async fn test_schedule_from_worker_stays_on_worker() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        dispatcher.spawn_worker("A");

        let (tx, rx) = oneshot::channel();
        let inner = dispatcher.clone();
        dispatcher.submit("A", move || {
            inner.schedule_task(
                move || {
                    let _ = tx.send(current_worker());
                },
                None,
            );
        });

        assert_eq!(rx.await.unwrap(), Some("A".to_string()));
    }

    #[tokio::test]
    async fn test_schedule_from_outside_uses_utility() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        assert_eq!(current_worker(), None);

        let (tx, rx) = oneshot::channel();
        dispatcher.schedule_task(
            move || {
                let _ = tx.send(current_worker());
            },
            None,
        );

        assert_eq!(rx.await.unwrap(), Some(UTILITY_WORKER.to_string()));
    }

    #[tokio::test]
    async fn test_same_worker_scheduling_keeps_fifo_order() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        dispatcher.spawn_worker("A");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = oneshot::channel();

        let first_order = order.clone();
        let inner = dispatcher.clone();
        dispatcher.submit("A", move || {
            first_order.lock().unwrap().push(1);
            let order = first_order.clone();
            inner.schedule_task(
                move || {
                    order.lock().unwrap().push(3);
                    let _ = tx.send(());
                },
                None,
            );
        });

        let second_order = order.clone();
        dispatcher.submit("A", move || second_order.lock().unwrap().push(2));

        rx.await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delayed_task_picks_queue_when_timer_fires() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (tx, rx) = oneshot::channel();
        let inner = dispatcher.clone();

        dispatcher.submit(MONITOR_WORKER, move || {
            inner.schedule_task(
                move || {
                    let _ = tx.send(current_worker());
                },
                Some(Duration::from_millis(20)),
            );
        });

        // The timer is not a worker, so the task lands on the utility queue.
        assert_eq!(rx.await.unwrap(), Some(UTILITY_WORKER.to_string()));
    }

    #[tokio::test]
    async fn test_unknown_worker_falls_back_to_utility() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (tx, rx) = oneshot::channel();
        dispatcher.submit("nope", move || {
            let _ = tx.send(current_worker());
        });
        assert_eq!(rx.await.unwrap(), Some(UTILITY_WORKER.to_string()));
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_kill_worker() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (tx, rx) = oneshot::channel();

        dispatcher.submit(MONITOR_WORKER, || panic!("callback failure"));
        dispatcher.submit(MONITOR_WORKER, move || {
            let _ = tx.send(current_worker());
        });

        assert_eq!(rx.await.unwrap(), Some(MONITOR_WORKER.to_string()));
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        dispatcher.shutdown();
        assert!(dispatcher.worker_names().is_empty());
    }
}
