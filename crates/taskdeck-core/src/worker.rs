/*
[INPUT]:  An async work closure, a TaskProbe for progress reporting, stop requests
[OUTPUT]: A QueueTask running the closure on tokio with best-effort cancellation
[POS]:    Execution layer - ready-made task kind for async work
[UPDATE]: When changing spawn/cancellation semantics or terminal-state mapping
[UPDATE]: 2026-07-02 Render anyhow chains into the task message on failure
*/

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::status::{StatusLabels, TaskStatus};
use crate::task::{QueueTask, TaskCore};

type WorkFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type WorkFn = Box<dyn FnOnce(TaskProbe) -> WorkFuture + Send>;

/// Handle passed to the work closure for progress reporting and
/// cancellation checks.
#[derive(Debug, Clone)]
pub struct TaskProbe {
    core: Arc<TaskCore>,
    cancel: CancellationToken,
}

impl TaskProbe {
    pub fn set_target(&self, target: impl Into<String>) {
        self.core.set_target(target);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        self.core.set_message(message);
    }

    pub fn set_percentage(&self, percentage: f64) {
        self.core.set_percentage(percentage);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// A queueable task wrapping an async closure.
///
/// The closure is spawned on the ambient tokio runtime when the dispatcher
/// starts the task. Completion maps to `Complete` (percentage forced to
/// 1.0), an error maps to `Failed` with the rendered error chain as the
/// message, and cancellation maps to `Failed` with a stop notice.
pub struct WorkerTask {
    core: Arc<TaskCore>,
    work: Mutex<Option<WorkFn>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerTask {
    /// Build a task ready for queueing: the status is moved to `Waiting`
    /// immediately, which makes it eligible for dispatch.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        labels: Arc<StatusLabels>,
        work: F,
    ) -> Arc<Self>
    where
        F: FnOnce(TaskProbe) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let core = Arc::new(TaskCore::new(name, labels));
        core.set_status(TaskStatus::Waiting);
        Arc::new(Self {
            core,
            work: Mutex::new(Some(Box::new(move |probe| Box::pin(work(probe))))),
            handle: Mutex::new(None),
        })
    }

    /// True once the spawned worker has exited (for any terminal outcome).
    pub fn is_finished(&self) -> bool {
        self.handle
            .lock()
            .expect("worker handle poisoned")
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(false)
    }
}

impl QueueTask for WorkerTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start(&self) {
        if self.core.status() != TaskStatus::Waiting {
            warn!(task_id = %self.core.id(), status = %self.core.status(), "start ignored");
            return;
        }
        let Some(work) = self.work.lock().expect("worker closure poisoned").take() else {
            return;
        };

        self.core.set_status(TaskStatus::Running);

        let core = self.core.clone();
        let cancel = self.core.cancel_token();
        let probe = TaskProbe {
            core: core.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task_id = %core.id(), "worker cancelled");
                    core.set_message("stopped by request");
                    core.set_status(TaskStatus::Failed);
                }
                result = work(probe) => match result {
                    Ok(()) => {
                        core.set_percentage(1.0);
                        core.set_status(TaskStatus::Complete);
                    }
                    Err(err) => {
                        warn!(task_id = %core.id(), error = %err, "worker failed");
                        core.set_message(format!("{err:#}"));
                        core.set_status(TaskStatus::Failed);
                    }
                },
            }
        });
        *self.handle.lock().expect("worker handle poisoned") = Some(handle);
    }

    fn stop(&self) {
        if self.core.status() == TaskStatus::Running {
            self.core.cancel_token().cancel();
        }
    }
}
