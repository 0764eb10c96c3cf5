use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{BlockId, TodoId};
use crate::timer::{SessionState, TaskId};

/// Every state change in the system produces an Event.
/// Front-ends subscribe to them through an [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TodoCreated {
        todo_id: TodoId,
        at: DateTime<Utc>,
    },
    TodoCompleted {
        todo_id: TodoId,
        at: DateTime<Utc>,
    },
    /// A completion was undone.
    TodoRestored {
        todo_id: TodoId,
        at: DateTime<Utc>,
    },
    TodoMarkToggled {
        todo_id: TodoId,
        marked: bool,
        at: DateTime<Utc>,
    },
    CapabilityRequested {
        at: DateTime<Utc>,
    },
    /// The gate refused; nothing was scheduled.
    CapabilityDenied {
        at: DateTime<Utc>,
    },
    CountdownStarted {
        task_id: TaskId,
        duration_secs: u64,
        /// The countdown this one replaced, whose elapsed time is discarded.
        replaced: Option<TaskId>,
        at: DateTime<Utc>,
    },
    CountdownTick {
        task_id: TaskId,
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    CountdownCancelled {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    BlockRecorded {
        block_id: BlockId,
        task_id: TaskId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    StateChanged {
        state: SessionState,
        at: DateTime<Utc>,
    },
}

/// Broadcast fan-out for [`Event`]s.
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is dropped, and slow subscribers observe `RecvError::Lagged`.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: Event) {
        tracing::trace!(?event, "event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
