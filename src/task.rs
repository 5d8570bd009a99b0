//! # Supervised Background Tasks
//!
//! Every long-running loop (rotor poller, sensor reader) runs as a
//! [`BackgroundTask`]. The task body returns a `Result`; a failure is logged
//! and published as [`TaskStatus::Failed`] so the orchestrator can notice a
//! dead loop instead of acting on stale data.
//!
//! Cancellation is cooperative: task bodies race their I/O against
//! [`ShutdownSignal::cancelled`] inside `tokio::select!`, which drops any
//! in-flight read the moment shutdown is requested.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{MoonrakerError, Result};

/// Observer callback invoked on the producing task.
///
/// Handlers must not block; hand work off through a channel if needed.
pub type EventHandler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// The guarded values here (headings, attitude, capture buffers) stay
/// internally consistent even if a handler panicked mid-update.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected shutdown trigger/signal pair.
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger(Arc::new(tx)), ShutdownSignal(rx))
}

/// Sending half of a shutdown request. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.0.borrow()
    }
}

/// Receiving half of a shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<bool>);

impl ShutdownSignal {
    /// Resolves once shutdown is requested or the trigger is dropped.
    pub async fn cancelled(&mut self) {
        while !*self.0.borrow_and_update() {
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Lifecycle of a supervised task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Stopped,
    Failed(String),
}

/// Handle to a spawned, supervised loop
pub struct BackgroundTask {
    name: String,
    trigger: ShutdownTrigger,
    status: watch::Receiver<TaskStatus>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl BackgroundTask {
    /// Spawn `body` on the tokio runtime.
    ///
    /// The body receives the [`ShutdownSignal`] it must honour and returns
    /// `Ok(())` on a clean stop. An `Err` marks the task as failed.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let (trigger, signal) = shutdown_channel();
        let (status_tx, status_rx) = watch::channel(TaskStatus::Running);

        let future = body(signal);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => {
                    debug!("{} task stopped", task_name);
                    status_tx.send_replace(TaskStatus::Stopped);
                }
                Err(e) => {
                    error!("{} task terminated: {}", task_name, e);
                    status_tx.send_replace(TaskStatus::Failed(e.to_string()));
                }
            }
        });

        Self {
            name,
            trigger,
            status: status_rx,
            handle: Some(handle),
        }
    }

    /// Task name used in logs and errors
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle status
    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Return `TaskFailed` if the loop has died.
    pub fn check(&self) -> Result<()> {
        match &*self.status.borrow() {
            TaskStatus::Failed(reason) => Err(MoonrakerError::TaskFailed {
                task: self.name.clone(),
                reason: reason.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Request shutdown and wait for the loop to exit.
    pub async fn stop(&mut self) {
        self.trigger.trigger();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("{} task panicked: {}", self.name, e);
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.trigger.trigger();
    }
}
