//! Focus block session manager.
//!
//! Owns the single countdown under its tag and turns a naturally finished
//! countdown into a persisted [`Block`].
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> AwaitingPermission -> Running -> Completing -> Idle
//!                 |                 |
//!                 +-> Idle (denied) +-> Cancelled -> Idle
//! ```
//!
//! The runner's progress stream is the only writer of `remaining_secs` and
//! `is_running`. Callers feed it in with [`SessionManager::drive`],
//! [`SessionManager::run_to_completion`] or [`SessionManager::poll`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::capability::CapabilityGate;
use super::runner::{countdown_secs, CancelResult, TaskId, TaskProgress, TaskRunner, TaskState};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::model::{Block, NewBlock};
use crate::store::{BlockQuery, LiveView, Store};

pub const DEFAULT_FOCUS_DURATION: Duration = Duration::from_secs(25 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingPermission,
    Running,
    Completing,
    Cancelled,
}

/// Snapshot of the countdown as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSession {
    pub state: SessionState,
    pub task_id: Option<TaskId>,
    pub total_secs: u64,
    pub remaining_secs: u64,
    /// The runner reports the task as executing (not merely queued).
    pub is_running: bool,
}

impl TimerSession {
    fn idle(total_secs: u64) -> Self {
        Self {
            state: SessionState::Idle,
            task_id: None,
            total_secs,
            remaining_secs: 0,
            is_running: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Runner tag; one active countdown per tag.
    pub tag: String,
    pub duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tag: "countdown".into(),
            duration: DEFAULT_FOCUS_DURATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(TaskId),
    /// The gate refused. Nothing was scheduled.
    CapabilityDenied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    NoActiveSession,
    Cancelled(TaskId),
    /// The countdown had already finished; its block was recorded anyway.
    CompletedFirst(Block),
}

struct Tracking {
    session: TimerSession,
    /// Last task recorded as a block or cancelled. Stale reports about it
    /// are never adopted again.
    retired: Option<TaskId>,
}

pub struct SessionManager {
    store: Arc<dyn Store>,
    runner: Arc<dyn TaskRunner>,
    gate: Arc<dyn CapabilityGate>,
    config: SessionConfig,
    events: EventBus,
    tracking: Mutex<Tracking>,
    published: watch::Sender<TimerSession>,
}

impl SessionManager {
    /// Attach to `runner` under `config.tag`.
    ///
    /// Nothing is read from the runner until the first `poll`/`drive`;
    /// at that point an idle manager adopts a countdown already running
    /// under its tag, and records one that finished while nobody watched.
    /// Attach at most one manager per runner tag.
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn TaskRunner>,
        gate: Arc<dyn CapabilityGate>,
        config: SessionConfig,
        events: EventBus,
    ) -> Self {
        let session = TimerSession::idle(config.duration.as_secs());
        let (published, _) = watch::channel(session.clone());
        Self {
            store,
            runner,
            gate,
            config,
            events,
            tracking: Mutex::new(Tracking {
                session,
                retired: None,
            }),
            published,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> TimerSession {
        self.tracking.lock().session.clone()
    }

    /// Live session snapshots; new receivers see the latest one first.
    pub fn watch(&self) -> watch::Receiver<TimerSession> {
        self.published.subscribe()
    }

    /// Blocks started today (UTC), refreshed on every store mutation.
    pub fn todays_blocks(&self) -> LiveView<BlockQuery> {
        LiveView::new(self.store.clone(), BlockQuery::Today)
    }

    /// Start a countdown of the configured length.
    ///
    /// # Errors
    /// See [`SessionManager::start_with`].
    pub async fn start(&self) -> Result<StartOutcome> {
        self.start_with(self.config.duration).await
    }

    /// Ask the gate, then schedule a countdown of `duration`, replacing any
    /// countdown already running under this tag.
    ///
    /// # Errors
    /// Returns a validation error for durations under one second or over
    /// [`MAX_COUNTDOWN_SECS`](crate::model::MAX_COUNTDOWN_SECS), or the
    /// runner's error if scheduling fails. A denied gate is not an error.
    pub async fn start_with(&self, duration: Duration) -> Result<StartOutcome> {
        let total_secs = countdown_secs(duration)?;

        self.transition(|s| s.state = SessionState::AwaitingPermission);
        self.events.publish(Event::CapabilityRequested { at: Utc::now() });

        if !self.gate.request().await {
            tracing::info!(tag = %self.config.tag, "countdown capability denied");
            self.settle_after_prompt();
            self.events.publish(Event::CapabilityDenied { at: Utc::now() });
            return Ok(StartOutcome::CapabilityDenied);
        }

        let task_id = match self.runner.schedule(&self.config.tag, duration) {
            Ok(id) => id,
            Err(e) => {
                self.settle_after_prompt();
                return Err(e);
            }
        };

        let replaced = {
            let mut tracking = self.tracking.lock();
            // A concurrent poll may already have adopted the new task.
            let replaced = tracking
                .session
                .task_id
                .replace(task_id)
                .filter(|old| *old != task_id);
            tracking.session = TimerSession {
                state: SessionState::Running,
                task_id: Some(task_id),
                total_secs,
                remaining_secs: total_secs,
                is_running: false,
            };
            self.publish(&tracking.session);
            replaced
        };

        if let Some(old) = replaced {
            tracing::info!(
                tag = %self.config.tag,
                task_id = %old,
                "countdown replaced, elapsed time discarded"
            );
        }
        tracing::info!(tag = %self.config.tag, %task_id, total_secs, "countdown started");
        self.events.publish(Event::CountdownStarted {
            task_id,
            duration_secs: total_secs,
            replaced,
            at: Utc::now(),
        });
        Ok(StartOutcome::Started(task_id))
    }

    /// Cancel the active countdown, if any.
    ///
    /// If the countdown finished before the runner saw the request, the
    /// block is recorded and returned as [`CancelOutcome::CompletedFirst`].
    ///
    /// # Errors
    /// Returns an error if the runner fails or the block cannot be stored.
    pub fn cancel(&self) -> Result<CancelOutcome> {
        let (task_id, total_secs) = {
            let tracking = self.tracking.lock();
            match tracking.session.task_id {
                Some(id) => (id, tracking.session.total_secs),
                None => return Ok(CancelOutcome::NoActiveSession),
            }
        };

        match self.runner.cancel(task_id)? {
            CancelResult::AlreadyFinished { finished_at } => {
                tracing::info!(%task_id, "cancel lost the race against completion");
                let finished = TaskProgress {
                    task_id,
                    tag: self.config.tag.clone(),
                    total_secs,
                    remaining_secs: 0,
                    state: TaskState::Finished,
                    at: finished_at,
                };
                Ok(match self.apply_progress(finished)? {
                    Some(block) => CancelOutcome::CompletedFirst(block),
                    // The progress stream recorded it first.
                    None => CancelOutcome::NoActiveSession,
                })
            }
            CancelResult::Cancelled | CancelResult::Unknown => {
                self.mark_cancelled(task_id);
                Ok(CancelOutcome::Cancelled(task_id))
            }
        }
    }

    /// Apply the runner's latest report under this tag.
    ///
    /// # Errors
    /// Returns an error if a finished countdown's block cannot be stored.
    pub fn poll(&self) -> Result<Option<Block>> {
        let latest = self
            .runner
            .subscribe_progress(&self.config.tag)
            .borrow()
            .clone();
        match latest {
            Some(progress) => self.apply_progress(progress),
            None => Ok(None),
        }
    }

    /// Follow the runner's progress until the runner goes away.
    ///
    /// # Errors
    /// Returns the first error raised while recording a block.
    pub async fn drive(&self) -> Result<()> {
        let mut rx = self.runner.subscribe_progress(&self.config.tag);
        loop {
            let latest = rx.borrow_and_update().clone();
            if let Some(progress) = latest {
                self.apply_progress(progress)?;
            }
            if rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    /// Follow the active countdown until it ends.
    ///
    /// Returns the recorded block, or `None` if the countdown was cancelled
    /// or replaced, or if nothing was running.
    ///
    /// # Errors
    /// Returns an error if the block cannot be stored.
    pub async fn run_to_completion(&self) -> Result<Option<Block>> {
        let mut rx = self.runner.subscribe_progress(&self.config.tag);
        if let Some(block) = self.poll()? {
            return Ok(Some(block));
        }
        let Some(task_id) = self.session().task_id else {
            return Ok(None);
        };
        loop {
            let latest = rx.borrow_and_update().clone();
            if let Some(progress) = latest {
                if let Some(block) = self.apply_progress(progress)? {
                    return Ok(Some(block));
                }
            }
            if self.session().task_id != Some(task_id) {
                return Ok(None);
            }
            if rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    /// Fold one progress report into the session.
    ///
    /// Returns the block recorded when the report finishes the tracked
    /// countdown.
    ///
    /// # Errors
    /// Returns an error if the block cannot be stored; the session then
    /// stays on the countdown so a later report can retry.
    pub fn apply_progress(&self, progress: TaskProgress) -> Result<Option<Block>> {
        if progress.tag != self.config.tag {
            return Ok(None);
        }

        let mut tracking = self.tracking.lock();
        let adopted = tracking.session.task_id != Some(progress.task_id);
        if adopted {
            let adopt = tracking.session.task_id.is_none()
                && tracking.retired != Some(progress.task_id)
                && progress.state != TaskState::Cancelled;
            if !adopt {
                tracing::trace!(task_id = %progress.task_id, "ignoring untracked countdown");
                return Ok(None);
            }
            tracing::info!(
                task_id = %progress.task_id,
                state = ?progress.state,
                "adopting countdown"
            );
            if tracking.session.state != SessionState::AwaitingPermission {
                tracking.session.state = SessionState::Running;
            }
            tracking.session.task_id = Some(progress.task_id);
            tracking.session.total_secs = progress.total_secs;
            tracking.session.remaining_secs = progress.remaining_secs;
        }

        match progress.state {
            TaskState::Pending | TaskState::Running => {
                let session = &mut tracking.session;
                let remaining = session.remaining_secs.min(progress.remaining_secs);
                let is_running = progress.state == TaskState::Running;
                if !adopted && session.remaining_secs == remaining && session.is_running == is_running
                {
                    return Ok(None);
                }
                session.remaining_secs = remaining;
                session.is_running = is_running;
                if session.state != SessionState::AwaitingPermission {
                    session.state = SessionState::Running;
                }
                self.publish(session);
                tracing::debug!(task_id = %progress.task_id, remaining, "countdown tick");
                self.events.publish(Event::CountdownTick {
                    task_id: progress.task_id,
                    remaining_secs: remaining,
                    at: progress.at,
                });
                Ok(None)
            }
            TaskState::Finished => {
                let prior_state = tracking.session.state;
                tracking.session.state = SessionState::Completing;
                tracking.session.remaining_secs = 0;
                tracking.session.is_running = false;
                self.publish(&tracking.session);

                let recorded = NewBlock::ending_at(progress.at, tracking.session.total_secs)
                    .and_then(|block| self.store.insert_block(block));
                let block = match recorded {
                    Ok(block) => block,
                    Err(e) => {
                        tracing::warn!(
                            task_id = %progress.task_id,
                            error = %e,
                            "failed to record block"
                        );
                        tracking.session.state = prior_state;
                        self.publish(&tracking.session);
                        return Err(e);
                    }
                };

                tracking.retired = Some(progress.task_id);
                tracking.session = TimerSession::idle(self.config.duration.as_secs());
                self.publish(&tracking.session);
                drop(tracking);

                tracing::info!(task_id = %progress.task_id, block_id = block.id, "block recorded");
                self.events.publish(Event::BlockRecorded {
                    block_id: block.id,
                    task_id: progress.task_id,
                    started_at: block.started_at,
                    finished_at: block.finished_at,
                });
                Ok(Some(block))
            }
            TaskState::Cancelled => {
                drop(tracking);
                self.mark_cancelled(progress.task_id);
                Ok(None)
            }
        }
    }

    fn mark_cancelled(&self, task_id: TaskId) {
        {
            let mut tracking = self.tracking.lock();
            if tracking.session.task_id != Some(task_id) {
                return;
            }
            tracking.session.state = SessionState::Cancelled;
            tracking.retired = Some(task_id);
            self.publish(&tracking.session);
            tracking.session = TimerSession::idle(self.config.duration.as_secs());
            self.publish(&tracking.session);
        }
        tracing::info!(%task_id, "countdown cancelled");
        self.events.publish(Event::CountdownCancelled {
            task_id,
            at: Utc::now(),
        });
    }

    /// Leave `AwaitingPermission` without scheduling: back to the countdown
    /// that was already running, or to idle.
    fn settle_after_prompt(&self) {
        self.transition(|s| {
            if s.state == SessionState::AwaitingPermission {
                s.state = if s.task_id.is_some() {
                    SessionState::Running
                } else {
                    SessionState::Idle
                };
            }
        });
    }

    fn transition(&self, change: impl FnOnce(&mut TimerSession)) {
        let mut tracking = self.tracking.lock();
        let before = tracking.session.state;
        change(&mut tracking.session);
        self.publish(&tracking.session);
        let after = tracking.session.state;
        drop(tracking);
        if before != after {
            self.events.publish(Event::StateChanged {
                state: after,
                at: Utc::now(),
            });
        }
    }

    fn publish(&self, session: &TimerSession) {
        self.published.send_replace(session.clone());
    }
}
