//! Shared fixtures for integration tests.
//!
//! `FakeRunner` never ticks on its own: tests push progress with `tick`
//! and `finish`, then let the manager observe it with `poll`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blokit_core::error::Result;
use blokit_core::timer::{countdown_secs, CancelResult, TaskProgress, TaskRunner, TaskState};
use blokit_core::{
    CapabilityGate, EventBus, MemoryStore, SessionConfig, SessionManager, Store, TaskId,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use uuid::Uuid;

struct FakeTask {
    tag: String,
    total_secs: u64,
    remaining_secs: u64,
    state: TaskState,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct FakeState {
    channels: HashMap<String, watch::Sender<Option<TaskProgress>>>,
    tasks: HashMap<TaskId, FakeTask>,
    scheduled: Vec<(String, u64)>,
    cancel_requests: Vec<TaskId>,
}

impl FakeState {
    fn channel(&mut self, tag: &str) -> &watch::Sender<Option<TaskProgress>> {
        self.channels
            .entry(tag.to_string())
            .or_insert_with(|| watch::channel(None).0)
    }

    fn publish(&mut self, id: TaskId, at: DateTime<Utc>) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        let progress = TaskProgress {
            task_id: id,
            tag: task.tag.clone(),
            total_secs: task.total_secs,
            remaining_secs: task.remaining_secs,
            state: task.state,
            at,
        };
        let tag = task.tag.clone();
        self.channel(&tag).send_replace(Some(progress));
    }
}

type ScheduleHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct FakeRunner {
    state: Mutex<FakeState>,
    on_schedule: Mutex<Option<ScheduleHook>>,
}

impl FakeRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Report `remaining` seconds left on a running task.
    pub fn tick(&self, id: TaskId, remaining: u64) {
        let mut state = self.state.lock();
        if let Some(task) = state.tasks.get_mut(&id) {
            task.remaining_secs = remaining;
            task.state = TaskState::Running;
        }
        state.publish(id, Utc::now());
    }

    /// Complete the task now and report it.
    pub fn finish(&self, id: TaskId) -> DateTime<Utc> {
        let at = self.finish_silently(id);
        self.state.lock().publish(id, at);
        at
    }

    /// Complete the task without reporting it, as if the report were still
    /// in flight.
    pub fn finish_silently(&self, id: TaskId) -> DateTime<Utc> {
        let at = Utc::now();
        let mut state = self.state.lock();
        if let Some(task) = state.tasks.get_mut(&id) {
            task.remaining_secs = 0;
            task.state = TaskState::Finished;
            task.finished_at = Some(at);
        }
        at
    }

    /// Run `hook` at the end of every `schedule`, after the new task has
    /// been published.
    pub fn on_schedule(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_schedule.lock() = Some(Box::new(hook));
    }

    fn insert_task(&self, tag: &str, total_secs: u64) -> TaskId {
        let mut state = self.state.lock();
        for task in state.tasks.values_mut() {
            if task.tag == tag && task.state.is_active() {
                task.state = TaskState::Cancelled;
            }
        }
        let id = Uuid::new_v4();
        state.tasks.insert(
            id,
            FakeTask {
                tag: tag.to_string(),
                total_secs,
                remaining_secs: total_secs,
                state: TaskState::Pending,
                finished_at: None,
            },
        );
        state.scheduled.push((tag.to_string(), total_secs));
        state.publish(id, Utc::now());
        id
    }

    pub fn scheduled(&self) -> Vec<(String, u64)> {
        self.state.lock().scheduled.clone()
    }

    pub fn cancel_requests(&self) -> Vec<TaskId> {
        self.state.lock().cancel_requests.clone()
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.state.lock().tasks.get(&id).map(|t| t.state)
    }
}

impl TaskRunner for FakeRunner {
    fn schedule(&self, tag: &str, duration: Duration) -> Result<TaskId> {
        let total_secs = countdown_secs(duration)?;
        let id = self.insert_task(tag, total_secs);
        if let Some(hook) = self.on_schedule.lock().as_ref() {
            hook();
        }
        Ok(id)
    }

    fn cancel(&self, task_id: TaskId) -> Result<CancelResult> {
        let mut state = self.state.lock();
        state.cancel_requests.push(task_id);
        let result = match state.tasks.get_mut(&task_id) {
            Some(task) if task.state.is_active() => {
                task.state = TaskState::Cancelled;
                CancelResult::Cancelled
            }
            Some(task) => match task.finished_at {
                Some(finished_at) => CancelResult::AlreadyFinished { finished_at },
                None => CancelResult::Unknown,
            },
            None => CancelResult::Unknown,
        };
        if result == CancelResult::Cancelled {
            state.publish(task_id, Utc::now());
        }
        Ok(result)
    }

    fn subscribe_progress(&self, tag: &str) -> watch::Receiver<Option<TaskProgress>> {
        self.state.lock().channel(tag).subscribe()
    }
}

/// Gate with a fixed answer that counts how often it was asked.
pub struct CountingGate {
    answer: bool,
    calls: AtomicUsize,
}

impl CountingGate {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityGate for CountingGate {
    async fn request(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub runner: Arc<FakeRunner>,
    pub gate: Arc<CountingGate>,
    pub events: EventBus,
    pub manager: SessionManager,
}

impl Harness {
    pub fn new(granted: bool) -> Self {
        let store = Arc::new(MemoryStore::new());
        let runner = FakeRunner::new();
        let gate = CountingGate::new(granted);
        let events = EventBus::default();
        let manager = SessionManager::new(
            store.clone(),
            runner.clone(),
            gate.clone(),
            SessionConfig::default(),
            events.clone(),
        );
        Self {
            store,
            runner,
            gate,
            events,
            manager,
        }
    }

    pub fn block_count(&self) -> usize {
        self.store
            .query_blocks(blokit_core::BlockQuery::All)
            .map(|b| b.len())
            .unwrap_or(0)
    }
}
