//! Persistence for todos and blocks.
//!
//! The managers never talk to a concrete database; they receive an
//! `Arc<dyn Store>` and observe changes through its revision channel.

mod config;
pub mod live;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use config::{Config, LogConfig, NotificationsConfig, TimerConfig, TodoConfig};
pub use live::{LiveQuery, LiveView};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{ConfigError, Result};
use crate::model::{Block, NewBlock, NewTodo, Todo, TodoId};

/// Record storage shared by the todo list and the session manager.
///
/// Implementations must commit a mutation before bumping the revision
/// published on [`Store::subscribe`], so a reader woken by the bump always
/// sees the write.
pub trait Store: Send + Sync {
    fn insert_todo(&self, todo: NewTodo) -> Result<Todo>;

    /// Overwrite the stored todo with the same id.
    ///
    /// # Errors
    /// Returns `CoreError::NotFound` if no todo has this id.
    fn update_todo(&self, todo: &Todo) -> Result<()>;

    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>>;

    fn query_todos(&self, query: TodoQuery) -> Result<Vec<Todo>>;

    fn insert_block(&self, block: NewBlock) -> Result<Block>;

    fn query_blocks(&self, query: BlockQuery) -> Result<Vec<Block>>;

    /// Revision counter, bumped once per committed mutation.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Which todos a list shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoQuery {
    /// Not completed, oldest first.
    #[default]
    Incomplete,
    /// Marked and not completed, most recently marked first.
    Marked,
    /// Everything, oldest first.
    All,
}

impl TodoQuery {
    pub fn matches(self, todo: &Todo) -> bool {
        match self {
            TodoQuery::Incomplete => !todo.completed,
            TodoQuery::Marked => !todo.completed && todo.marked,
            TodoQuery::All => true,
        }
    }

    /// Sort already-filtered todos into this query's order.
    pub fn sort(self, todos: &mut [Todo]) {
        match self {
            TodoQuery::Incomplete | TodoQuery::All => {
                todos.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            }
            TodoQuery::Marked => {
                todos.sort_by(|a, b| (b.marked_at, b.id).cmp(&(a.marked_at, a.id)));
            }
        }
    }
}

impl std::str::FromStr for TodoQuery {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "incomplete" => Ok(TodoQuery::Incomplete),
            "marked" => Ok(TodoQuery::Marked),
            "all" => Ok(TodoQuery::All),
            other => Err(format!("unknown todo view: {other}")),
        }
    }
}

/// Which blocks to fetch, ordered by `started_at` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockQuery {
    All,
    /// Blocks whose start falls on this UTC date.
    StartedOn(NaiveDate),
    /// `StartedOn` the current UTC date, resolved when the query runs.
    Today,
}

impl BlockQuery {
    /// Replace `Today` with the concrete date.
    pub fn resolve(self) -> Self {
        match self {
            BlockQuery::Today => BlockQuery::StartedOn(Utc::now().date_naive()),
            other => other,
        }
    }

    pub fn matches(self, block: &Block) -> bool {
        match self.resolve() {
            BlockQuery::StartedOn(day) => block.started_at.date_naive() == day,
            _ => true,
        }
    }
}

/// Returns `~/.config/blokit[-dev]/` based on BLOKIT_ENV.
///
/// Set BLOKIT_ENV=dev to use the development data directory, or
/// BLOKIT_DATA_DIR to point somewhere else entirely.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var_os("BLOKIT_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("BLOKIT_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("blokit-dev")
            } else {
                base_dir.join("blokit")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn todo(id: TodoId, minute: u32, marked_minute: Option<u32>, completed: bool) -> Todo {
        let at = |m: u32| Utc.with_ymd_and_hms(2026, 3, 1, 9, m, 0).unwrap();
        Todo {
            id,
            content: format!("todo {id}"),
            completed,
            marked: marked_minute.is_some(),
            created_at: at(minute),
            marked_at: marked_minute.map(at),
            completed_at: completed.then(|| at(59)),
        }
    }

    #[test]
    fn marked_query_excludes_completed_and_orders_newest_first() {
        let mut todos: Vec<Todo> = vec![
            todo(1, 0, Some(10), false),
            todo(2, 1, None, false),
            todo(3, 2, Some(30), false),
            todo(4, 3, Some(40), true),
        ]
        .into_iter()
        .filter(|t| TodoQuery::Marked.matches(t))
        .collect();
        TodoQuery::Marked.sort(&mut todos);
        let ids: Vec<_> = todos.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn incomplete_query_orders_by_creation() {
        let mut todos = vec![todo(2, 5, None, false), todo(1, 1, None, false)];
        TodoQuery::Incomplete.sort(&mut todos);
        assert_eq!(todos[0].id, 1);
    }

    #[test]
    fn todo_query_parses_view_names() {
        assert_eq!("marked".parse::<TodoQuery>().unwrap(), TodoQuery::Marked);
        assert!("starred".parse::<TodoQuery>().is_err());
    }

    #[test]
    fn block_query_filters_by_day() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let block = Block {
            id: 1,
            started_at: start,
            finished_at: start + Duration::minutes(25),
        };
        assert!(BlockQuery::StartedOn(start.date_naive()).matches(&block));
        assert!(!BlockQuery::StartedOn(start.date_naive().succ_opt().unwrap()).matches(&block));
        assert!(BlockQuery::All.matches(&block));
    }
}
