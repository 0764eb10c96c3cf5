//! Durable task runner contract.
//!
//! A runner executes countdowns outside the caller's control flow and
//! reports their progress per tag. Scheduling under a tag that already has
//! an active countdown replaces it; the replaced countdown never finishes.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Result, ValidationError};
use crate::model::MAX_COUNTDOWN_SECS;

pub type TaskId = Uuid;

/// Whole seconds of a countdown of `duration`.
///
/// # Errors
/// Returns a validation error unless the duration is between one second
/// and [`MAX_COUNTDOWN_SECS`].
pub fn countdown_secs(duration: Duration) -> Result<u64> {
    match duration.as_secs() {
        0 => Err(ValidationError::ZeroDuration.into()),
        secs if secs > MAX_COUNTDOWN_SECS => Err(ValidationError::DurationTooLong {
            max_secs: MAX_COUNTDOWN_SECS,
        }
        .into()),
        secs => Ok(secs),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Cancelled,
}

impl TaskState {
    pub fn is_active(self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Running)
    }
}

/// One progress report from a runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub tag: String,
    pub total_secs: u64,
    pub remaining_secs: u64,
    pub state: TaskState,
    /// When the report was made; the completion time for `Finished`.
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelResult {
    Cancelled,
    /// The task completed before the cancel request was observed.
    AlreadyFinished { finished_at: DateTime<Utc> },
    /// No task with this id is known, or it was replaced.
    Unknown,
}

pub trait TaskRunner: Send + Sync {
    /// Start a countdown of `duration` under `tag`, replacing any active one.
    ///
    /// # Errors
    /// Returns an error if the duration is rejected by [`countdown_secs`] or
    /// the countdown cannot be started.
    fn schedule(&self, tag: &str, duration: Duration) -> Result<TaskId>;

    /// Request cancellation. Finished and unknown tasks are not an error.
    fn cancel(&self, task_id: TaskId) -> Result<CancelResult>;

    /// Latest progress under `tag`; `None` until something is scheduled.
    fn subscribe_progress(&self, tag: &str) -> watch::Receiver<Option<TaskProgress>>;
}

/// A countdown as written to durable storage when it is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub tag: String,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
}

impl JournalEntry {
    /// A fresh entry with a new task id.
    pub fn new(tag: impl Into<String>, started_at: DateTime<Utc>, duration_secs: u64) -> Self {
        Self {
            tag: tag.into(),
            task_id: Uuid::new_v4(),
            started_at,
            duration_secs,
        }
    }

    /// `None` when the stored duration is out of range.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.duration_secs == 0 || self.duration_secs > MAX_COUNTDOWN_SECS {
            return None;
        }
        i64::try_from(self.duration_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|length| self.started_at.checked_add_signed(length))
    }

    /// Whole seconds left at `now`, rounded up; 0 once the deadline passed.
    /// `None` when the entry has no valid deadline.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> Option<u64> {
        let left_ms = (self.deadline()? - now).num_milliseconds();
        Some(if left_ms <= 0 {
            0
        } else {
            (left_ms as u64).div_ceil(1000)
        })
    }
}

/// Durable storage for scheduled countdowns, one entry per tag.
pub trait TaskJournal: Send + Sync {
    fn record(&self, entry: &JournalEntry) -> Result<()>;

    /// Drop the entry for `tag` if it still belongs to `task_id`.
    fn remove(&self, tag: &str, task_id: TaskId) -> Result<()>;

    fn entries(&self) -> Result<Vec<JournalEntry>>;
}
