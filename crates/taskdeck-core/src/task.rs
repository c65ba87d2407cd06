/*
[INPUT]:  Field updates from concrete task implementations and the UI (handled flag)
[OUTPUT]: Observable task entity publishing FieldChange events, QueueTask capability trait
[POS]:    Entity layer - per-task state machine and observation surface
[UPDATE]: When adding observable task fields or lifecycle hooks
[UPDATE]: 2026-06-18 Stamp started_at/finished_at from status transitions
*/

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::events::{Field, FieldBus, FieldChange, FieldValue, Subscription};
use crate::status::{StatusLabels, TaskStatus};

#[derive(Debug, Clone)]
struct TaskFields {
    target: String,
    status: TaskStatus,
    message: String,
    percentage: f64,
    handled: bool,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// The observable core every queueable task carries.
///
/// Identity and display name are fixed at creation; the remaining fields are
/// mutated by the task implementation (or, for `handled`, by the UI layer)
/// and every mutation publishes a [`FieldChange`]. Setters release the field
/// lock before publishing, so observers can read the entity freely.
#[derive(Debug)]
pub struct TaskCore {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    labels: Arc<StatusLabels>,
    cancel: CancellationToken,
    bus: FieldBus,
    fields: Mutex<TaskFields>,
}

impl TaskCore {
    pub fn new(name: impl Into<String>, labels: Arc<StatusLabels>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            name: name.into(),
            created_at: Utc::now(),
            labels,
            cancel: CancellationToken::new(),
            bus: FieldBus::new(id),
            fields: Mutex::new(TaskFields {
                target: String::new(),
                status: TaskStatus::Undefined,
                message: String::new(),
                percentage: 0.0,
                handled: false,
                started_at: None,
                finished_at: None,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn labels(&self) -> Arc<StatusLabels> {
        self.labels.clone()
    }

    /// Cancellation token observed by the task's worker. `stop()`
    /// implementations cancel it; cooperative workers poll or await it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn target(&self) -> String {
        self.lock().target.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn display_status(&self) -> String {
        self.labels.label(self.status()).to_string()
    }

    pub fn message(&self) -> String {
        self.lock().message.clone()
    }

    pub fn percentage(&self) -> f64 {
        self.lock().percentage
    }

    pub fn handled(&self) -> bool {
        self.lock().handled
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    pub fn set_target(&self, target: impl Into<String>) {
        let target = target.into();
        self.lock().target = target.clone();
        self.bus.publish(Field::Target, FieldValue::Text(target));
    }

    /// Publishes `Status` and the derived `DisplayStatus`. Publication is
    /// unconditional: re-announcing an unchanged status is how the dispatch
    /// layer re-evaluates a failed-then-handled head.
    pub fn set_status(&self, status: TaskStatus) {
        {
            let mut fields = self.lock();
            fields.status = status;
            if status == TaskStatus::Running && fields.started_at.is_none() {
                fields.started_at = Some(Utc::now());
            }
            if status.is_terminal() && fields.finished_at.is_none() {
                fields.finished_at = Some(Utc::now());
            }
        }
        debug!(task_id = %self.id, %status, "task status");
        self.bus.publish(Field::Status, FieldValue::Status(status));
        self.bus.publish(
            Field::DisplayStatus,
            FieldValue::Text(self.labels.label(status).to_string()),
        );
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.lock().message = message.clone();
        self.bus.publish(Field::Message, FieldValue::Text(message));
    }

    pub fn set_percentage(&self, percentage: f64) {
        self.lock().percentage = percentage;
        self.bus
            .publish(Field::Percentage, FieldValue::Number(percentage));
    }

    /// Acknowledgment flag for failed tasks, set by the observer layer.
    pub fn set_handled(&self, handled: bool) {
        self.lock().handled = handled;
        self.bus.publish(Field::Handled, FieldValue::Flag(handled));
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        self.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.bus.unsubscribe(subscription)
    }

    pub fn watch(&self) -> tokio::sync::broadcast::Receiver<FieldChange> {
        self.bus.watch()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let fields = self.lock().clone();
        TaskSnapshot {
            id: self.id,
            name: self.name.clone(),
            target: fields.target,
            status: fields.status,
            display_status: self.labels.label(fields.status).to_string(),
            message: fields.message,
            percentage: fields.percentage,
            handled: fields.handled,
            created_at: self.created_at,
            started_at: fields.started_at,
            finished_at: fields.finished_at,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskFields> {
        self.fields.lock().expect("task fields poisoned")
    }
}

/// Point-in-time copy of a task's observable state, for poll-based UIs.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub name: String,
    pub target: String,
    pub status: TaskStatus,
    pub display_status: String,
    pub message: String,
    pub percentage: f64,
    pub handled: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Capability interface for queueable background work.
///
/// Implementations own how the work runs; the dispatcher only relies on the
/// contract below and on the shared [`TaskCore`].
pub trait QueueTask: Send + Sync {
    fn core(&self) -> &TaskCore;

    /// Begin execution. Precondition: status is `Waiting`. Must not block;
    /// the work runs out-of-line, moves the status to `Running` and
    /// eventually to `Complete` or `Failed`, updating target/message/
    /// percentage along the way.
    fn start(&self);

    /// Request cooperative cancellation. Safe to call at any time; a no-op
    /// when the task is not running.
    fn stop(&self);

    /// Release the task once it is displaced from the active slot. Forces a
    /// stop when still running so no background work leaks. Idempotent.
    fn dispose(&self) {
        if self.core().status() == TaskStatus::Running {
            debug!(task_id = %self.core().id(), "disposing running task, forcing stop");
            self.stop();
        }
    }
}
