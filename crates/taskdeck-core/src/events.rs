/*
[INPUT]:  Field mutations on tasks and the manager
[OUTPUT]: FieldChange events fanned out to callback subscribers and a broadcast stream
[POS]:    Notification layer - publish/subscribe between entities and observers
[UPDATE]: When adding observable fields or event payload kinds
*/

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::status::TaskStatus;

/// Buffered events per entity stream before slow observers start lagging.
const EVENT_STREAM_CAPACITY: usize = 256;

/// Observable fields across tasks and the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    // Task fields
    Target,
    Status,
    DisplayStatus,
    Message,
    Percentage,
    Handled,
    // Manager fields
    Queue,
    CurrentTask,
    TaskPercentage,
    TotalPercentage,
}

/// New value carried by a field-change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Status(TaskStatus),
    TaskRef(Option<Uuid>),
    /// The field currently has no meaningful value (e.g. the aggregate
    /// percentage while the queue is empty).
    Empty,
}

/// One field mutation on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub entity_id: Uuid,
    pub field: Field,
    pub value: FieldValue,
}

/// Handle for detaching a callback subscriber.
pub type Subscription = u64;

type Callback = Arc<dyn Fn(&FieldChange) + Send + Sync>;

/// Per-entity event hub.
///
/// Two delivery paths: synchronous callbacks (used by the manager to react
/// to the active task in the same call stack) and a tokio broadcast stream
/// for UI observers. Callbacks are cloned out of the registry before they
/// are invoked, so a callback may freely subscribe, unsubscribe, or publish
/// on any bus without deadlocking.
pub struct FieldBus {
    entity_id: Uuid,
    subscribers: Mutex<Vec<(Subscription, Callback)>>,
    next_subscription: AtomicU64,
    stream: broadcast::Sender<FieldChange>,
}

impl FieldBus {
    pub fn new(entity_id: Uuid) -> Self {
        let (stream, _) = broadcast::channel(EVENT_STREAM_CAPACITY);
        Self {
            entity_id,
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            stream,
        }
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    /// Register a synchronous observer. The callback runs on whichever
    /// thread publishes, so it must not block.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&FieldChange) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .push((id, Arc::new(callback)));
        id
    }

    /// Detach a callback subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .retain(|(id, _)| *id != subscription);
    }

    /// Open a broadcast stream of this entity's events.
    pub fn watch(&self) -> broadcast::Receiver<FieldChange> {
        self.stream.subscribe()
    }

    pub fn publish(&self, field: Field, value: FieldValue) {
        let change = FieldChange {
            entity_id: self.entity_id,
            field,
            value,
        };
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .expect("subscriber registry poisoned")
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(&change);
        }
        // No stream observers is the common case for headless use.
        let _ = self.stream.send(change);
    }
}

impl fmt::Debug for FieldBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBus")
            .field("entity_id", &self.entity_id)
            .finish_non_exhaustive()
    }
}
