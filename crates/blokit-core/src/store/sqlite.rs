//! SQLite-backed store.
//!
//! Provides persistent storage for:
//! - Todo items and their completion/marking state
//! - Completed focus blocks
//! - The durable countdown journal

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::watch;
use uuid::Uuid;

use super::{data_dir, migrations, BlockQuery, Store, TodoQuery};
use crate::error::{CoreError, DatabaseError, Result};
use crate::model::{Block, NewBlock, NewTodo, Todo, TodoId};
use crate::timer::{JournalEntry, TaskId, TaskJournal};

const TODO_COLUMNS: &str =
    "id, content, completed, marked, created_at, marked_at, completed_at";

/// SQLite database for todos and blocks.
///
/// The connection is guarded by a mutex so the store can be shared as
/// `Arc<dyn Store>`; every statement runs in autocommit mode and the
/// revision is bumped after it returns.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    revision: watch::Sender<u64>,
}

impl SqliteStore {
    /// Open the database at `<data_dir>/blokit.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        Self::open_at(data_dir()?.join("blokit.db"))
    }

    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        let (revision, _) = watch::channel(0);
        Ok(Self {
            conn: Mutex::new(conn),
            revision,
        })
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Store for SqliteStore {
    fn insert_todo(&self, todo: NewTodo) -> Result<Todo> {
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO todo (content, completed, marked, created_at)
                 VALUES (?1, 0, 0, ?2)",
                params![todo.content, encode_ts(todo.created_at)],
            )?;
            conn.last_insert_rowid()
        };
        self.bump();
        Ok(todo.into_todo(id))
    }

    fn update_todo(&self, todo: &Todo) -> Result<()> {
        let changed = self.conn.lock().execute(
            "UPDATE todo
             SET content = ?2, completed = ?3, marked = ?4,
                 marked_at = ?5, completed_at = ?6
             WHERE id = ?1",
            params![
                todo.id,
                todo.content,
                todo.completed,
                todo.marked,
                todo.marked_at.map(encode_ts),
                todo.completed_at.map(encode_ts),
            ],
        )?;
        if changed == 0 {
            return Err(CoreError::todo_not_found(todo.id));
        }
        self.bump();
        Ok(())
    }

    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        let conn = self.conn.lock();
        let todo = conn
            .query_row(
                &format!("SELECT {TODO_COLUMNS} FROM todo WHERE id = ?1"),
                params![id],
                row_to_todo,
            )
            .optional()?;
        Ok(todo)
    }

    fn query_todos(&self, query: TodoQuery) -> Result<Vec<Todo>> {
        let sql = match query {
            TodoQuery::Incomplete => format!(
                "SELECT {TODO_COLUMNS} FROM todo WHERE completed = 0 ORDER BY created_at, id"
            ),
            TodoQuery::Marked => format!(
                "SELECT {TODO_COLUMNS} FROM todo WHERE completed = 0 AND marked = 1
                 ORDER BY marked_at DESC, id DESC"
            ),
            TodoQuery::All => format!("SELECT {TODO_COLUMNS} FROM todo ORDER BY created_at, id"),
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let todos = stmt
            .query_map([], row_to_todo)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(todos)
    }

    fn insert_block(&self, block: NewBlock) -> Result<Block> {
        let id = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO block (started_at, finished_at) VALUES (?1, ?2)",
                params![encode_ts(block.started_at), encode_ts(block.finished_at)],
            )?;
            conn.last_insert_rowid()
        };
        self.bump();
        Ok(block.into_block(id))
    }

    fn query_blocks(&self, query: BlockQuery) -> Result<Vec<Block>> {
        let conn = self.conn.lock();
        let blocks = match query.resolve() {
            BlockQuery::StartedOn(day) => {
                let (from, to) = day_bounds(day);
                let mut stmt = conn.prepare(
                    "SELECT id, started_at, finished_at FROM block
                     WHERE started_at >= ?1 AND started_at < ?2
                     ORDER BY started_at, id",
                )?;
                let rows = stmt.query_map(params![from, to], row_to_block)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            _ => {
                let mut stmt = conn.prepare(
                    "SELECT id, started_at, finished_at FROM block ORDER BY started_at, id",
                )?;
                let rows = stmt.query_map([], row_to_block)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(blocks)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl TaskJournal for SqliteStore {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO durable_task (tag, task_id, started_at, duration_secs)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.tag,
                entry.task_id.to_string(),
                encode_ts(entry.started_at),
                entry.duration_secs,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, tag: &str, task_id: TaskId) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM durable_task WHERE tag = ?1 AND task_id = ?2",
            params![tag, task_id.to_string()],
        )?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tag, task_id, started_at, duration_secs FROM durable_task ORDER BY tag",
        )?;
        let entries = stmt
            .query_map([], |row| {
                let task_id: String = row.get(1)?;
                Ok(JournalEntry {
                    tag: row.get(0)?,
                    task_id: Uuid::parse_str(&task_id).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e))
                    })?,
                    started_at: decode_ts(row, 2)?,
                    duration_secs: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn encode_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => decode_ts(row, idx).map(Some),
        None => Ok(None),
    }
}

fn day_bounds(day: NaiveDate) -> (String, String) {
    let start = day.and_time(NaiveTime::default()).and_utc();
    (encode_ts(start), encode_ts(start + chrono::Duration::days(1)))
}

fn row_to_todo(row: &Row<'_>) -> rusqlite::Result<Todo> {
    Ok(Todo {
        id: row.get(0)?,
        content: row.get(1)?,
        completed: row.get(2)?,
        marked: row.get(3)?,
        created_at: decode_ts(row, 4)?,
        marked_at: decode_opt_ts(row, 5)?,
        completed_at: decode_opt_ts(row, 6)?,
    })
}

fn row_to_block(row: &Row<'_>) -> rusqlite::Result<Block> {
    Ok(Block {
        id: row.get(0)?,
        started_at: decode_ts(row, 1)?,
        finished_at: decode_ts(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn new_todo(text: &str) -> NewTodo {
        NewTodo::from_text(text, Utc::now()).unwrap()
    }

    #[test]
    fn insert_and_get_round_trips_timestamps() {
        let store = SqliteStore::open_memory().unwrap();
        let mut todo = store.insert_todo(new_todo("water plants")).unwrap();
        todo.toggle_marked(Utc::now());
        store.update_todo(&todo).unwrap();

        let fetched = store.get_todo(todo.id).unwrap().unwrap();
        assert_eq!(fetched, todo);
    }

    #[test]
    fn update_missing_todo_is_not_found() {
        let store = SqliteStore::open_memory().unwrap();
        let ghost = new_todo("ghost").into_todo(404);
        assert!(store.update_todo(&ghost).unwrap_err().is_not_found());
    }

    #[test]
    fn marked_query_orders_by_marked_at_desc() {
        let store = SqliteStore::open_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
        let mut a = store.insert_todo(new_todo("a")).unwrap();
        let mut b = store.insert_todo(new_todo("b")).unwrap();
        let mut c = store.insert_todo(new_todo("c")).unwrap();
        a.toggle_marked(base + Duration::minutes(2));
        b.toggle_marked(base + Duration::minutes(5));
        c.toggle_marked(base + Duration::minutes(9));
        c.complete(base + Duration::minutes(10));
        for t in [&a, &b, &c] {
            store.update_todo(t).unwrap();
        }

        let marked = store.query_todos(TodoQuery::Marked).unwrap();
        let ids: Vec<_> = marked.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b.id, a.id]);
    }

    #[test]
    fn blocks_filter_by_start_day() {
        let store = SqliteStore::open_memory().unwrap();
        let end = Utc.with_ymd_and_hms(2026, 5, 4, 0, 10, 0).unwrap();
        // Started the previous evening.
        store
            .insert_block(NewBlock::ending_at(end, 25 * 60).unwrap())
            .unwrap();
        store
            .insert_block(
                NewBlock::ending_at(end + Duration::hours(2), 25 * 60).unwrap(),
            )
            .unwrap();

        let day = end.date_naive();
        assert_eq!(store.query_blocks(BlockQuery::StartedOn(day)).unwrap().len(), 1);
        assert_eq!(store.query_blocks(BlockQuery::All).unwrap().len(), 2);
    }

    #[test]
    fn journal_round_trip() {
        let store = SqliteStore::open_memory().unwrap();
        let entry = JournalEntry::new("countdown", Utc::now(), 1500);
        store.record(&entry).unwrap();
        assert_eq!(store.entries().unwrap(), vec![entry.clone()]);

        let newer = JournalEntry::new("countdown", Utc::now(), 600);
        store.record(&newer).unwrap();
        store.remove("countdown", entry.task_id).unwrap();
        assert_eq!(store.entries().unwrap(), vec![newer.clone()]);
        store.remove("countdown", newer.task_id).unwrap();
        assert!(store.entries().unwrap().is_empty());
    }

    #[test]
    fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blokit.db");
        {
            let store = SqliteStore::open_at(&path).unwrap();
            store.insert_todo(new_todo("persisted")).unwrap();
        }
        let store = SqliteStore::open_at(&path).unwrap();
        let todos = store.query_todos(TodoQuery::All).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].content, "persisted");
    }
}
