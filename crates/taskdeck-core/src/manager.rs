/*
[INPUT]:  Push/remove/stop/clear/queue calls from the host, field events from the active task
[OUTPUT]: Sequential dispatch of queued tasks, aggregated status events for observers
[POS]:    Dispatch core - queue ownership, head-change protocol, auto-dequeue
[UPDATE]: When changing dispatch rules, eviction policy, or the aggregate views
[UPDATE]: 2026-07-15 Run start/dispose/publish actions after releasing the queue lock
[UPDATE]: 2026-07-21 Start a waiting head immediately when dispatch is enabled
*/

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::events::{Field, FieldBus, FieldChange, FieldValue, Subscription};
use crate::status::{StatusLabels, TaskStatus};
use crate::task::{QueueTask, TaskSnapshot};

/// Sequential task dispatcher.
///
/// Owns an insertion-ordered queue of tasks and runs exactly one at a time:
/// the queue head is the active task, everything else waits. The manager is
/// an explicitly constructed value the application shell passes around;
/// clones share the same queue.
///
/// All operations return immediately. Internally each operation computes
/// the queue transition under one lock, then runs the resulting
/// start/dispose/publish actions after releasing it, so a task that
/// transitions synchronously inside `start()` re-enters the dispatcher
/// without deadlocking.
#[derive(Clone)]
pub struct TaskManager {
    shared: Arc<Shared>,
}

struct Shared {
    bus: FieldBus,
    labels: Arc<StatusLabels>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    queue: VecDeque<Arc<dyn QueueTask>>,
    active: Option<ActiveSlot>,
    dispatch_enabled: bool,
    total_enqueued: u64,
}

/// The current head plus the observer hooks attached to it.
struct ActiveSlot {
    task: Arc<dyn QueueTask>,
    relay_sub: Subscription,
    dispatch_sub: Option<Subscription>,
}

/// Work computed under the queue lock, executed after it is released.
enum Action {
    Dispose(Arc<dyn QueueTask>),
    Start(Arc<dyn QueueTask>),
    Publish(Field, FieldValue),
    PublishTotal,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::with_labels(StatusLabels::default())
    }

    pub fn with_labels(labels: StatusLabels) -> Self {
        Self {
            shared: Arc::new(Shared {
                bus: FieldBus::new(Uuid::new_v4()),
                labels: Arc::new(labels),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.bus.entity_id()
    }

    /// The label table this manager aggregates display statuses with.
    /// Hosts build their task cores from the same table.
    pub fn labels(&self) -> Arc<StatusLabels> {
        self.shared.labels.clone()
    }

    /// Append a task to the queue tail. If it becomes the head, the
    /// head-change protocol runs (and starts it when dispatch is enabled
    /// and the task is waiting).
    pub fn push(&self, task: Arc<dyn QueueTask>) {
        let actions = {
            let mut inner = self.lock();
            inner.total_enqueued += 1;
            debug!(
                task_id = %task.core().id(),
                name = task.core().name(),
                total_enqueued = inner.total_enqueued,
                "task pushed"
            );
            inner.queue.push_back(task);
            self.sync_head(&mut inner)
        };
        self.run(actions);
    }

    /// Remove a task by identity. Returns whether anything was removed.
    /// Removing the head displaces it: the head-change protocol detaches
    /// and disposes it (disposal forces a stop when still running).
    pub fn remove(&self, task_id: Uuid) -> bool {
        let (removed, actions) = {
            let mut inner = self.lock();
            let before = inner.queue.len();
            inner.queue.retain(|task| task.core().id() != task_id);
            let removed = inner.queue.len() != before;
            let actions = if removed {
                debug!(%task_id, "task removed");
                self.sync_head(&mut inner)
            } else {
                Vec::new()
            };
            (removed, actions)
        };
        self.run(actions);
        removed
    }

    /// Disable dispatch and cooperatively stop the active task, if any.
    /// The queue itself is left untouched.
    pub fn stop(&self) {
        self.set_queue(false);
        let task = {
            let inner = self.lock();
            inner.active.as_ref().map(|slot| slot.task.clone())
        };
        if let Some(task) = task {
            info!(task_id = %task.core().id(), "stopping active task");
            task.stop();
        }
    }

    /// Empty the queue and reset the enqueue counter. A no-op while the
    /// active task is running: bulk clearing never interrupts in-flight
    /// work.
    pub fn clear(&self) {
        let actions = {
            let mut inner = self.lock();
            let running = inner
                .active
                .as_ref()
                .map(|slot| slot.task.core().status() == TaskStatus::Running)
                .unwrap_or(false);
            if running {
                debug!("clear ignored while the active task is running");
                return;
            }
            inner.total_enqueued = 0;
            inner.queue.clear();
            self.sync_head(&mut inner)
        };
        self.run(actions);
    }

    pub fn queue(&self) -> bool {
        self.lock().dispatch_enabled
    }

    /// Flip the dispatch flag. Enabling attaches the auto-dequeue observer
    /// to the active task and starts it immediately when waiting; disabling
    /// detaches the observer but leaves the task running.
    pub fn set_queue(&self, enabled: bool) {
        let mut actions = Vec::new();
        {
            let mut inner = self.lock();
            if inner.dispatch_enabled == enabled {
                return;
            }
            inner.dispatch_enabled = enabled;
            info!(enabled, "queue dispatch");
            actions.push(Action::Publish(Field::Queue, FieldValue::Flag(enabled)));
            if let Some(slot) = inner.active.as_mut() {
                if enabled {
                    slot.dispatch_sub = Some(self.attach_dispatch(&slot.task));
                    if slot.task.core().status() == TaskStatus::Waiting {
                        actions.push(Action::Start(slot.task.clone()));
                    }
                } else if let Some(sub) = slot.dispatch_sub.take() {
                    slot.task.core().unsubscribe(sub);
                }
            }
        }
        self.run(actions);
    }

    pub fn current_task(&self) -> Option<Arc<dyn QueueTask>> {
        self.lock().active.as_ref().map(|slot| slot.task.clone())
    }

    /// Number of tasks currently queued (including the active one).
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Tasks ever enqueued since the last idle `clear()`. Natural
    /// drain-to-empty deliberately does not reset this counter.
    pub fn total_enqueued(&self) -> u64 {
        self.lock().total_enqueued
    }

    // Aggregate views proxying the active task, with safe defaults when
    // the queue is empty.

    pub fn status(&self) -> TaskStatus {
        self.current_task()
            .map(|task| task.core().status())
            .unwrap_or_default()
    }

    pub fn display_status(&self) -> String {
        self.shared.labels.label(self.status()).to_string()
    }

    pub fn message(&self) -> String {
        self.current_task()
            .map(|task| task.core().message())
            .unwrap_or_default()
    }

    pub fn task_percentage(&self) -> f64 {
        self.current_task()
            .map(|task| task.core().percentage())
            .unwrap_or(0.0)
    }

    /// Approximate overall progress: `(len - 1) / total_enqueued`. `None`
    /// while the queue is empty or nothing was ever enqueued. The formula
    /// intentionally matches the product's historical behavior, including
    /// the off-by-one relative to "tasks completed".
    pub fn total_percentage(&self) -> Option<f64> {
        let inner = self.lock();
        total_percentage_of(&inner)
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        let inner = self.lock();
        ManagerSnapshot {
            queue_enabled: inner.dispatch_enabled,
            queued: inner.queue.len(),
            total_enqueued: inner.total_enqueued,
            total_percentage: total_percentage_of(&inner),
            current: inner
                .active
                .as_ref()
                .map(|slot| slot.task.core().snapshot()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        self.shared.bus.subscribe(callback)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.shared.bus.unsubscribe(subscription)
    }

    pub fn watch(&self) -> tokio::sync::broadcast::Receiver<FieldChange> {
        self.shared.bus.watch()
    }

    /// Head-change protocol. Runs after every structural mutation and is a
    /// no-op when the head is unchanged (identity comparison), so repeated
    /// structural events never double-start or double-dispose a task.
    fn sync_head(&self, inner: &mut Inner) -> Vec<Action> {
        let new_head = inner.queue.front().cloned();
        let unchanged = match (&inner.active, &new_head) {
            (Some(slot), Some(task)) => slot.task.core().id() == task.core().id(),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return Vec::new();
        }

        let mut actions = Vec::new();

        if let Some(slot) = inner.active.take() {
            let core = slot.task.core();
            core.unsubscribe(slot.relay_sub);
            if let Some(sub) = slot.dispatch_sub {
                core.unsubscribe(sub);
            }
            actions.push(Action::Dispose(slot.task));
        }

        match new_head {
            Some(task) => {
                debug!(task_id = %task.core().id(), "new queue head");
                let relay_sub = self.attach_relay(&task);
                let dispatch_sub = inner
                    .dispatch_enabled
                    .then(|| self.attach_dispatch(&task));
                actions.push(Action::Publish(
                    Field::CurrentTask,
                    FieldValue::TaskRef(Some(task.core().id())),
                ));
                if inner.dispatch_enabled && task.core().status() == TaskStatus::Waiting {
                    actions.push(Action::Start(task.clone()));
                }
                inner.active = Some(ActiveSlot {
                    task,
                    relay_sub,
                    dispatch_sub,
                });
            }
            None => {
                debug!("queue drained");
                actions.push(Action::Publish(
                    Field::CurrentTask,
                    FieldValue::TaskRef(None),
                ));
            }
        }

        actions.push(Action::PublishTotal);
        actions
    }

    /// Re-publishes the active task's observable fields under the
    /// manager's identity so UI observers can bind to the manager alone.
    fn attach_relay(&self, task: &Arc<dyn QueueTask>) -> Subscription {
        let shared = Arc::downgrade(&self.shared);
        task.core().subscribe(move |change| {
            let Some(shared) = shared.upgrade() else { return };
            let field = match change.field {
                Field::Status => Field::Status,
                Field::DisplayStatus => Field::DisplayStatus,
                Field::Message => Field::Message,
                Field::Percentage => Field::TaskPercentage,
                _ => return,
            };
            shared.bus.publish(field, change.value.clone());
        })
    }

    /// Auto-dequeue observer: reacts to the active task's status events
    /// only. `Complete`, or `Failed` with the handled flag already set,
    /// evicts the head; anything else (including a later `handled` flip on
    /// its own) leaves the queue blocked until the next status event.
    fn attach_dispatch(&self, task: &Arc<dyn QueueTask>) -> Subscription {
        let shared = Arc::downgrade(&self.shared);
        task.core().subscribe(move |change| {
            if change.field != Field::Status {
                return;
            }
            let Some(shared) = shared.upgrade() else { return };
            TaskManager { shared }.dispatch(change.entity_id);
        })
    }

    fn dispatch(&self, task_id: Uuid) {
        let actions = {
            let mut inner = self.lock();
            let evict = {
                let Some(slot) = inner.active.as_ref() else { return };
                if slot.task.core().id() != task_id {
                    return;
                }
                let core = slot.task.core();
                let status = core.status();
                status == TaskStatus::Complete
                    || (status == TaskStatus::Failed && core.handled())
            };
            if !evict {
                return;
            }
            info!(%task_id, "auto-dequeue");
            inner.queue.retain(|task| task.core().id() != task_id);
            self.sync_head(&mut inner)
        };
        self.run(actions);
    }

    fn run(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Dispose(task) => {
                    debug!(task_id = %task.core().id(), "displaced from head, disposing");
                    task.dispose();
                }
                Action::Start(task) => {
                    // The task may have moved on between the decision and
                    // now (e.g. an eager observer stopped it).
                    if task.core().status() == TaskStatus::Waiting {
                        info!(
                            task_id = %task.core().id(),
                            name = task.core().name(),
                            "starting task"
                        );
                        task.start();
                    }
                }
                Action::Publish(field, value) => self.shared.bus.publish(field, value),
                Action::PublishTotal => {
                    let value = match self.total_percentage() {
                        Some(ratio) => FieldValue::Number(ratio),
                        None => FieldValue::Empty,
                    };
                    self.shared.bus.publish(Field::TotalPercentage, value);
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().expect("task queue poisoned")
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn total_percentage_of(inner: &Inner) -> Option<f64> {
    if inner.queue.is_empty() || inner.total_enqueued == 0 {
        return None;
    }
    Some((inner.queue.len() as f64 - 1.0) / inner.total_enqueued as f64)
}

/// Point-in-time aggregate view for poll-based UIs.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub queue_enabled: bool,
    pub queued: usize,
    pub total_enqueued: u64,
    pub total_percentage: Option<f64>,
    pub current: Option<TaskSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::task::TaskCore;

    /// Manually driven task: tests flip its status through the core.
    struct StubTask {
        core: TaskCore,
        started: AtomicUsize,
        stopped: AtomicUsize,
        disposed: AtomicUsize,
        instant: bool,
    }

    impl StubTask {
        fn waiting(name: &str) -> Arc<Self> {
            Self::build(name, false)
        }

        /// A task that completes synchronously inside `start()`, for
        /// exercising re-entrant dispatch.
        fn instant(name: &str) -> Arc<Self> {
            Self::build(name, true)
        }

        fn build(name: &str, instant: bool) -> Arc<Self> {
            let core = TaskCore::new(name, Arc::new(StatusLabels::default()));
            core.set_status(TaskStatus::Waiting);
            Arc::new(Self {
                core,
                started: AtomicUsize::new(0),
                stopped: AtomicUsize::new(0),
                disposed: AtomicUsize::new(0),
                instant,
            })
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn stopped(&self) -> usize {
            self.stopped.load(Ordering::SeqCst)
        }

        fn disposed(&self) -> usize {
            self.disposed.load(Ordering::SeqCst)
        }
    }

    impl QueueTask for StubTask {
        fn core(&self) -> &TaskCore {
            &self.core
        }

        fn start(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.core.set_status(TaskStatus::Running);
            if self.instant {
                self.core.set_percentage(1.0);
                self.core.set_status(TaskStatus::Complete);
            }
        }

        fn stop(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            if self.core.status() == TaskStatus::Running {
                self.core.set_message("stopped");
                self.core.set_status(TaskStatus::Failed);
            }
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.core.status() == TaskStatus::Running {
                self.stop();
            }
        }
    }

    fn active_id(manager: &TaskManager) -> Option<Uuid> {
        manager.current_task().map(|task| task.core().id())
    }

    #[test]
    fn active_task_is_always_the_head() {
        let manager = TaskManager::new();
        assert!(active_id(&manager).is_none());

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        assert_eq!(active_id(&manager), Some(a.core().id()));

        manager.push(b.clone());
        assert_eq!(active_id(&manager), Some(a.core().id()));
        assert_eq!(manager.len(), 2);

        manager.remove(a.core().id());
        assert_eq!(active_id(&manager), Some(b.core().id()));

        manager.remove(b.core().id());
        assert!(active_id(&manager).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn unchanged_head_is_not_restarted_or_redisposed() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        assert_eq!(a.started(), 1);

        // Structural event that leaves the head alone.
        manager.push(b.clone());
        assert_eq!(a.started(), 1);
        assert_eq!(a.disposed(), 0);
        assert_eq!(b.started(), 0);

        // Removing a non-head entry leaves the head alone too.
        manager.remove(b.core().id());
        assert_eq!(a.disposed(), 0);
        assert_eq!(active_id(&manager), Some(a.core().id()));
    }

    #[test]
    fn remove_of_absent_task_is_a_noop() {
        let manager = TaskManager::new();
        let a = StubTask::waiting("a");
        manager.push(a.clone());

        assert!(!manager.remove(Uuid::new_v4()));
        assert_eq!(manager.len(), 1);
        assert_eq!(active_id(&manager), Some(a.core().id()));
    }

    #[test]
    fn clear_is_refused_while_running() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());
        assert_eq!(a.core().status(), TaskStatus::Running);

        manager.clear();
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.total_enqueued(), 2);
        assert_eq!(active_id(&manager), Some(a.core().id()));
    }

    #[test]
    fn clear_while_idle_resets_everything() {
        let manager = TaskManager::new();

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b);
        assert_eq!(manager.total_enqueued(), 2);

        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(manager.total_enqueued(), 0);
        assert!(active_id(&manager).is_none());
        assert_eq!(manager.total_percentage(), None);
        // The waiting head was displaced and disposed, not stopped.
        assert_eq!(a.disposed(), 1);
        assert_eq!(a.stopped(), 0);
    }

    #[test]
    fn clear_on_empty_queue_is_a_noop() {
        let manager = TaskManager::new();
        manager.clear();
        assert!(manager.is_empty());
        assert_eq!(manager.total_enqueued(), 0);
    }

    #[test]
    fn completion_auto_dequeues_and_starts_the_next_task() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());
        assert_eq!(a.started(), 1);
        assert_eq!(b.started(), 0);

        a.core().set_status(TaskStatus::Complete);
        assert_eq!(manager.len(), 1);
        assert_eq!(active_id(&manager), Some(b.core().id()));
        assert_eq!(b.started(), 1);
        assert_eq!(a.disposed(), 1);
    }

    #[test]
    fn instant_tasks_drain_in_one_cascade() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let tasks: Vec<_> = (0..3).map(|i| StubTask::instant(&format!("t{i}"))).collect();
        for task in &tasks {
            manager.push(task.clone());
        }

        assert!(manager.is_empty());
        for task in &tasks {
            assert_eq!(task.started(), 1);
            assert_eq!(task.core().status(), TaskStatus::Complete);
        }
        // Drain does not reset the historical counter.
        assert_eq!(manager.total_enqueued(), 3);
        assert_eq!(manager.total_percentage(), None);
    }

    #[test]
    fn failed_unhandled_task_blocks_the_queue() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());

        a.core().set_message("conversion failed");
        a.core().set_status(TaskStatus::Failed);
        assert_eq!(manager.len(), 2);
        assert_eq!(active_id(&manager), Some(a.core().id()));
        assert_eq!(b.started(), 0);
        assert_eq!(manager.message(), "conversion failed");
    }

    #[test]
    fn handled_flip_takes_effect_on_the_next_status_event() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());

        a.core().set_status(TaskStatus::Failed);
        a.core().set_handled(true);
        // The handled flip alone does not evict.
        assert_eq!(manager.len(), 2);
        assert_eq!(active_id(&manager), Some(a.core().id()));

        // The next status event re-evaluates the policy.
        a.core().set_status(TaskStatus::Failed);
        assert_eq!(manager.len(), 1);
        assert_eq!(active_id(&manager), Some(b.core().id()));
        assert_eq!(b.started(), 1);
    }

    #[test]
    fn disabled_queue_never_starts_tasks() {
        let manager = TaskManager::new();

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());
        assert_eq!(a.started(), 0);
        assert_eq!(b.started(), 0);

        // Completion while disabled is not auto-dequeued either.
        a.core().set_status(TaskStatus::Complete);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn enabling_queue_starts_the_waiting_head() {
        let manager = TaskManager::new();

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());

        manager.set_queue(true);
        assert_eq!(a.started(), 1);
        assert_eq!(a.core().status(), TaskStatus::Running);
        assert_eq!(b.started(), 0);
        assert_eq!(b.core().status(), TaskStatus::Waiting);
    }

    #[test]
    fn removing_a_running_head_disposes_it_and_advances() {
        let manager = TaskManager::new();

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());
        manager.set_queue(true);
        assert_eq!(a.core().status(), TaskStatus::Running);

        assert!(manager.remove(a.core().id()));
        // Remove itself does not stop the task; disposal of the displaced
        // head forces the stop.
        assert_eq!(a.disposed(), 1);
        assert_eq!(a.stopped(), 1);
        assert_eq!(active_id(&manager), Some(b.core().id()));
        assert_eq!(b.started(), 1);
    }

    #[test]
    fn stop_disables_dispatch_and_stops_the_active_task() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        let a = StubTask::waiting("a");
        manager.push(a.clone());
        assert_eq!(a.core().status(), TaskStatus::Running);

        manager.stop();
        assert!(!manager.queue());
        assert_eq!(a.stopped(), 1);
        // Dispatch is detached, so the stub's Failed status is not evicted.
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn stop_on_empty_queue_is_a_noop() {
        let manager = TaskManager::new();
        manager.set_queue(true);
        manager.stop();
        assert!(!manager.queue());
    }

    #[test]
    fn total_percentage_matches_the_historical_formula() {
        let manager = TaskManager::new();
        assert_eq!(manager.total_percentage(), None);

        manager.set_queue(true);
        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        let c = StubTask::waiting("c");
        manager.push(a.clone());
        manager.push(b);
        manager.push(c);
        // 3 queued, 3 ever enqueued.
        assert_eq!(manager.total_percentage(), Some(2.0 / 3.0));

        a.core().set_status(TaskStatus::Complete);
        // 2 queued, 3 ever enqueued -> (2 - 1) / 3.
        let ratio = manager.total_percentage().expect("defined while non-empty");
        assert!((ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn drain_then_push_reflects_historical_totals() {
        let manager = TaskManager::new();
        manager.set_queue(true);

        manager.push(StubTask::instant("a"));
        assert!(manager.is_empty());
        assert_eq!(manager.total_enqueued(), 1);
        assert_eq!(manager.total_percentage(), None);

        let b = StubTask::waiting("b");
        manager.push(b);
        // 1 queued, 2 ever enqueued -> 0.0, not 1.0: history is kept.
        assert_eq!(manager.total_percentage(), Some(0.0));
    }

    #[test]
    fn aggregate_views_default_when_idle() {
        let manager = TaskManager::new();
        assert_eq!(manager.status(), TaskStatus::Undefined);
        assert_eq!(manager.display_status(), "");
        assert_eq!(manager.message(), "");
        assert_eq!(manager.task_percentage(), 0.0);
        assert!(manager.current_task().is_none());
    }

    #[test]
    fn active_task_fields_are_relayed_under_the_manager_identity() {
        let manager = TaskManager::new();
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        manager.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        let a = StubTask::waiting("a");
        manager.push(a.clone());
        events.lock().unwrap().clear();

        a.core().set_message("frame 12");
        a.core().set_percentage(0.12);
        a.core().set_target("intro.mov");
        a.core().set_handled(true);

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|change| change.entity_id == manager.id()));
        assert_eq!(seen[0].field, Field::Message);
        assert_eq!(seen[0].value, FieldValue::Text("frame 12".into()));
        assert_eq!(seen[1].field, Field::TaskPercentage);
        assert_eq!(seen[1].value, FieldValue::Number(0.12));
    }

    #[test]
    fn displaced_task_is_no_longer_relayed() {
        let manager = TaskManager::new();
        let events = Arc::new(StdMutex::new(Vec::new()));
        let sink = events.clone();
        manager.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        let a = StubTask::waiting("a");
        let b = StubTask::waiting("b");
        manager.push(a.clone());
        manager.push(b.clone());
        manager.remove(a.core().id());
        events.lock().unwrap().clear();

        a.core().set_message("ghost");
        assert!(events.lock().unwrap().is_empty());

        b.core().set_message("live");
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[test]
    fn head_changes_publish_current_task_and_total_percentage() {
        let manager = TaskManager::new();
        let mut rx = manager.watch();

        let a = StubTask::waiting("a");
        manager.push(a.clone());

        let change = rx.try_recv().unwrap();
        assert_eq!(change.field, Field::CurrentTask);
        assert_eq!(change.value, FieldValue::TaskRef(Some(a.core().id())));
        let change = rx.try_recv().unwrap();
        assert_eq!(change.field, Field::TotalPercentage);
        assert_eq!(change.value, FieldValue::Number(0.0));

        manager.remove(a.core().id());
        let change = rx.try_recv().unwrap();
        assert_eq!(change.value, FieldValue::TaskRef(None));
        let change = rx.try_recv().unwrap();
        assert_eq!(change.field, Field::TotalPercentage);
        assert_eq!(change.value, FieldValue::Empty);
    }

    #[test]
    fn snapshot_reports_queue_and_current_task() {
        let manager = TaskManager::with_labels(StatusLabels {
            waiting: "En attente".into(),
            ..StatusLabels::default()
        });
        manager.push(StubTask::waiting("a"));

        let snap = manager.snapshot();
        assert!(!snap.queue_enabled);
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.total_enqueued, 1);
        let current = snap.current.expect("active task");
        assert_eq!(current.name, "a");
        assert_eq!(current.status, TaskStatus::Waiting);
    }
}
