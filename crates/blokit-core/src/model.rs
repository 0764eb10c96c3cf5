//! Persisted records: todos and completed focus blocks.

use chrono::{DateTime, Duration, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

pub type TodoId = i64;
pub type BlockId = i64;

/// Longest countdown, and so the longest block, that can be recorded.
pub const MAX_COUNTDOWN_SECS: u64 = 24 * 60 * 60;

/// A to-do item.
///
/// `marked_at` is present iff `marked`, `completed_at` is present iff
/// `completed`. The mutators below are the only way the manager changes a
/// todo, and each keeps both pairs in step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub content: String,
    pub completed: bool,
    pub marked: bool,
    pub created_at: DateTime<Utc>,
    pub marked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Todo {
    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(at);
    }

    pub fn undo_complete(&mut self) {
        self.completed = false;
        self.completed_at = None;
    }

    pub fn toggle_marked(&mut self, at: DateTime<Utc>) {
        self.marked = !self.marked;
        self.marked_at = if self.marked { Some(at) } else { None };
    }
}

/// A todo that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTodo {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl NewTodo {
    /// Trim `text`; `None` when nothing is left.
    pub fn from_text(text: &str, now: DateTime<Utc>) -> Option<Self> {
        let content = text.trim();
        if content.is_empty() {
            return None;
        }
        Some(Self {
            content: content.to_string(),
            created_at: now,
        })
    }

    pub(crate) fn into_todo(self, id: TodoId) -> Todo {
        Todo {
            id,
            content: self.content,
            completed: false,
            marked: false,
            created_at: self.created_at,
            marked_at: None,
            completed_at: None,
        }
    }
}

/// A completed focus session. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Block {
    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBlock {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl NewBlock {
    /// A block of `length_secs` seconds that ended at `finished_at`.
    ///
    /// # Errors
    /// Returns a validation error unless the length is between one second
    /// and [`MAX_COUNTDOWN_SECS`].
    pub fn ending_at(finished_at: DateTime<Utc>, length_secs: u64) -> Result<Self> {
        if length_secs == 0 {
            return Err(ValidationError::ZeroDuration.into());
        }
        let started_at = Some(length_secs)
            .filter(|secs| *secs <= MAX_COUNTDOWN_SECS)
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(TimeDelta::try_seconds)
            .and_then(|length| finished_at.checked_sub_signed(length))
            .ok_or(ValidationError::DurationTooLong {
                max_secs: MAX_COUNTDOWN_SECS,
            })?;
        Ok(Self {
            started_at,
            finished_at,
        })
    }

    pub(crate) fn into_block(self, id: BlockId) -> Block {
        Block {
            id,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}
