//! Background task lifecycle for named, cancellable tasks
//!
//! The [`TaskManager`] owns a registry of live tasks keyed by name. Each task
//! runs on the Tokio runtime with its own [`CancellationToken`]; the token is
//! handed to the work and also raced against it, so a cancelled task stops at
//! its next suspension point even if it never looks at the token.
//!
//! # Completion race
//!
//! A task leaves the live registry inside its own completion observer, after its
//! work has already finished. Between those two points [`TaskManager::cancel`]
//! still finds the task and returns `true`, yet the recorded outcome stays
//! whatever the work produced (usually `Completed`). Callers that need a
//! definitive answer should read [`TaskManager::status`] after
//! [`TaskManager::wait_for_all`] rather than trusting the return value of `cancel`.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{MAX_EVENT_BUFFER, TaskConfig};
use crate::types::{TaskEvent, TaskOutcome, TaskState};


/// A registered task that has not yet been observed as terminal
struct LiveTask {
    /// Distinguishes successive tasks registered under the same name
    generation: u64,
    cancel: CancellationToken,
    /// Flips to `true` once the completion observer has run
    done: watch::Receiver<bool>,
}

struct Registry {
    live: HashMap<String, LiveTask>,
    finished: FinishedLog,
}

/// Last terminal outcome per name, bounded, oldest forgotten first
struct FinishedLog {
    outcomes: HashMap<String, TaskOutcome>,
    order: VecDeque<String>,
    limit: usize,
}

impl FinishedLog {
    fn new(limit: usize) -> Self {
        Self {
            outcomes: HashMap::new(),
            order: VecDeque::new(),
            limit,
        }
    }

    fn record(&mut self, name: String, outcome: TaskOutcome) {
        self.remove(&name);
        if self.limit == 0 {
            return;
        }
        while self.order.len() >= self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.outcomes.remove(&oldest);
            }
        }
        self.order.push_back(name.clone());
        self.outcomes.insert(name, outcome);
    }

    fn remove(&mut self, name: &str) {
        if self.outcomes.remove(name).is_some() {
            self.order.retain(|kept| kept != name);
        }
    }

    fn get(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.get(name)
    }

    fn clear(&mut self) {
        self.outcomes.clear();
        self.order.clear();
    }
}

struct Inner {
    registry: Mutex<Registry>,
    event_tx: broadcast::Sender<TaskEvent>,
    next_generation: AtomicU64,
    config: TaskConfig,
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry updates are single inserts/removes, so a poisoned lock still holds consistent data
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Completion observer, runs exactly once per task
    fn complete(&self, name: String, generation: u64, outcome: TaskOutcome, done: watch::Sender<bool>) {
        let still_current = {
            let mut registry = self.registry();
            let current = registry
                .live
                .get(&name)
                .is_some_and(|task| task.generation == generation);
            if current {
                registry.live.remove(&name);
                registry.finished.record(name.clone(), outcome.clone());
            }
            current
        };

        done.send_replace(true);

        match &outcome {
            TaskOutcome::Completed => tracing::info!(task = %name, "Task completed successfully"),
            TaskOutcome::Failed { error } => tracing::error!(task = %name, error = %error, "Task failed"),
            TaskOutcome::Cancelled => tracing::info!(task = %name, "Task cancelled"),
        }
        if !still_current {
            tracing::debug!(task = %name, generation, "Finished task had already been replaced");
        }

        self.event_tx.send(TaskEvent::finished(name, &outcome)).ok();
    }
}

/// Manages long-running background tasks with cancellation and monitoring
///
/// Cloning is cheap; clones share one registry. The manager is an ordinary value
/// owned by the caller, so independent managers never see each other's tasks.
///
/// ```no_run
/// use fetch_dispatch::{TaskManager, TaskState};
/// use std::time::Duration;
///
/// # async fn example() {
/// let manager = TaskManager::default();
///
/// manager.start("poll", |cancel| async move {
///     cancel.cancelled().await;
///     Ok::<(), std::io::Error>(())
/// });
/// manager.start("nap", |_| async {
///     tokio::time::sleep(Duration::from_millis(10)).await;
///     Ok::<(), std::io::Error>(())
/// });
///
/// assert!(manager.cancel("poll"));
/// assert!(manager.wait_for_all(Some(Duration::from_secs(5))).await);
/// assert_eq!(manager.status("poll"), Some(TaskState::Cancelled));
/// assert_eq!(manager.status("nap"), Some(TaskState::Completed));
/// # }
/// ```
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

impl TaskManager {
    /// Create an empty manager
    pub fn new(config: TaskConfig) -> Self {
        let (event_tx, _rx) = broadcast::channel(config.event_buffer.clamp(1, MAX_EVENT_BUFFER));
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    live: HashMap::new(),
                    finished: FinishedLog::new(config.max_finished),
                }),
                event_tx,
                next_generation: AtomicU64::new(0),
                config,
            }),
        }
    }

    /// Subscribe to task lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start a new background task under `name`
    ///
    /// `work` is called once with the task's cancellation token and the future it
    /// returns is spawned. If a live task already uses `name`, that task is
    /// cancelled and unregistered before the new one is registered.
    ///
    /// An `Err` returned by the work, or a panic inside it, marks the task
    /// [`Failed`](TaskState::Failed); neither reaches the caller.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start<F, Fut, E>(&self, name: impl Into<String>, work: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = watch::channel(false);
        let future = work(cancel.clone());

        {
            let mut registry = self.inner.registry();
            if let Some(previous) = registry.live.remove(&name) {
                previous.cancel.cancel();
                tracing::info!(task = %name, "Replacing running task");
            }
            registry.finished.remove(&name);
            registry.live.insert(
                name.clone(),
                LiveTask {
                    generation,
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );

            let inner = Arc::clone(&self.inner);
            let task_name = name.clone();
            tokio::spawn(async move {
                let outcome = run_to_outcome(future, &cancel).await;
                inner.complete(task_name, generation, outcome, done_tx);
            });
        }

        tracing::info!(task = %name, "Started task");
        self.inner.event_tx.send(TaskEvent::Started { name }).ok();
    }

    /// Request cancellation of a running task
    ///
    /// Returns `false` if no live task has this name (unknown, or already
    /// terminal and reaped). See the module docs for the completion race.
    pub fn cancel(&self, name: &str) -> bool {
        let registry = self.inner.registry();
        match registry.live.get(name) {
            Some(task) => {
                task.cancel.cancel();
                tracing::info!(task = %name, "Cancelled task");
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every live task without waiting for them
    ///
    /// Returns how many tasks were asked to stop.
    pub fn cancel_all(&self) -> usize {
        let registry = self.inner.registry();
        for (name, task) in registry.live.iter() {
            tracing::debug!(task = %name, "Signaling cancellation");
            task.cancel.cancel();
        }
        registry.live.len()
    }

    /// Wait until every task live at the time of the call is terminal
    ///
    /// Tasks started after the call are not waited on. Returns `false` if the
    /// timeout elapsed first.
    pub async fn wait_for_all(&self, timeout: Option<Duration>) -> bool {
        let pending: Vec<watch::Receiver<bool>> = {
            let registry = self.inner.registry();
            registry.live.values().map(|task| task.done.clone()).collect()
        };

        if pending.is_empty() {
            return true;
        }

        tracing::debug!(pending = pending.len(), "Waiting for tasks to finish");
        let all_done = join_all(pending.into_iter().map(|mut done| async move {
            // A dropped sender means the task is gone as well
            let _ = done.wait_for(|finished| *finished).await;
        }));

        match timeout {
            Some(limit) => tokio::time::timeout(limit, all_done).await.is_ok(),
            None => {
                all_done.await;
                true
            }
        }
    }

    /// Cancel every task and wait for them, bounded by the configured shutdown timeout
    ///
    /// Returns `false` if some task was still running when the timeout elapsed.
    pub async fn shutdown(&self) -> bool {
        tracing::info!("Initiating task shutdown");
        let cancelled = self.cancel_all();

        let finished = self
            .wait_for_all(Some(self.inner.config.shutdown_timeout))
            .await;
        if finished {
            tracing::info!(cancelled, "All tasks stopped");
        } else {
            tracing::warn!(
                remaining = self.active_count(),
                "Timeout waiting for tasks to stop"
            );
        }
        finished
    }

    /// Current state of the task registered under `name`
    ///
    /// Live tasks report [`TaskState::Running`]; reaped tasks report their last
    /// terminal state until the name is started again or its outcome is evicted
    /// by [`TaskConfig::max_finished`].
    pub fn status(&self, name: &str) -> Option<TaskState> {
        let registry = self.inner.registry();
        if registry.live.contains_key(name) {
            return Some(TaskState::Running);
        }
        registry.finished.get(name).map(TaskOutcome::state)
    }

    /// Terminal outcome of the last finished task registered under `name`
    pub fn outcome(&self, name: &str) -> Option<TaskOutcome> {
        self.inner.registry().finished.get(name).cloned()
    }

    /// Number of live tasks
    pub fn active_count(&self) -> usize {
        self.inner.registry().live.len()
    }

    /// Names of live tasks, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry().live.keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget recorded outcomes of finished tasks
    pub fn clear_finished(&self) {
        self.inner.registry().finished.clear();
    }
}

/// Drive the work to a terminal outcome, honoring cancellation at every suspension point
async fn run_to_outcome<Fut, E>(future: Fut, cancel: &CancellationToken) -> TaskOutcome
where
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let guarded = AssertUnwindSafe(future).catch_unwind();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => TaskOutcome::Cancelled,
        result = guarded => match result {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => TaskOutcome::Failed { error: e.to_string() },
            Err(panic) => TaskOutcome::Failed { error: panic_message(panic.as_ref()) },
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("task panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("task panicked: {msg}")
    } else {
        "task panicked".to_string()
    }
}
