//! In-process store, used by tests and by callers that do not need
//! persistence across restarts.

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{BlockQuery, Store, TodoQuery};
use crate::error::{CoreError, Result};
use crate::model::{Block, NewBlock, NewTodo, Todo, TodoId};
use crate::timer::{JournalEntry, TaskId, TaskJournal};

#[derive(Default)]
struct Tables {
    todos: Vec<Todo>,
    blocks: Vec<Block>,
    journal: Vec<JournalEntry>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
    revision: watch::Sender<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            tables: Mutex::new(Tables::default()),
            revision,
        }
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn insert_todo(&self, todo: NewTodo) -> Result<Todo> {
        let todo = {
            let mut tables = self.tables.lock();
            let id = tables.todos.len() as TodoId + 1;
            let todo = todo.into_todo(id);
            tables.todos.push(todo.clone());
            todo
        };
        self.bump();
        Ok(todo)
    }

    fn update_todo(&self, todo: &Todo) -> Result<()> {
        {
            let mut tables = self.tables.lock();
            let slot = tables
                .todos
                .iter_mut()
                .find(|t| t.id == todo.id)
                .ok_or_else(|| CoreError::todo_not_found(todo.id))?;
            *slot = todo.clone();
        }
        self.bump();
        Ok(())
    }

    fn get_todo(&self, id: TodoId) -> Result<Option<Todo>> {
        Ok(self.tables.lock().todos.iter().find(|t| t.id == id).cloned())
    }

    fn query_todos(&self, query: TodoQuery) -> Result<Vec<Todo>> {
        let mut todos: Vec<Todo> = self
            .tables
            .lock()
            .todos
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        query.sort(&mut todos);
        Ok(todos)
    }

    fn insert_block(&self, block: NewBlock) -> Result<Block> {
        let block = {
            let mut tables = self.tables.lock();
            let block = block.into_block(tables.blocks.len() as i64 + 1);
            tables.blocks.push(block.clone());
            block
        };
        self.bump();
        Ok(block)
    }

    fn query_blocks(&self, query: BlockQuery) -> Result<Vec<Block>> {
        let query = query.resolve();
        let mut blocks: Vec<Block> = self
            .tables
            .lock()
            .blocks
            .iter()
            .filter(|b| query.matches(b))
            .cloned()
            .collect();
        blocks.sort_by_key(|b| (b.started_at, b.id));
        Ok(blocks)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

impl TaskJournal for MemoryStore {
    fn record(&self, entry: &JournalEntry) -> Result<()> {
        let mut tables = self.tables.lock();
        tables.journal.retain(|e| e.tag != entry.tag);
        tables.journal.push(entry.clone());
        Ok(())
    }

    fn remove(&self, tag: &str, task_id: TaskId) -> Result<()> {
        self.tables
            .lock()
            .journal
            .retain(|e| e.tag != tag || e.task_id != task_id);
        Ok(())
    }

    fn entries(&self) -> Result<Vec<JournalEntry>> {
        Ok(self.tables.lock().journal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn update_missing_todo_is_not_found() {
        let store = MemoryStore::new();
        let ghost = NewTodo::from_text("ghost", Utc::now()).unwrap().into_todo(99);
        assert!(store.update_todo(&ghost).unwrap_err().is_not_found());
    }

    #[test]
    fn mutations_bump_revision() {
        let store = MemoryStore::new();
        let rx = store.subscribe();
        store
            .insert_todo(NewTodo::from_text("a", Utc::now()).unwrap())
            .unwrap();
        store
            .insert_block(NewBlock::ending_at(Utc::now(), 25 * 60).unwrap())
            .unwrap();
        assert_eq!(*rx.borrow(), 2);
    }

    #[test]
    fn journal_keeps_one_entry_per_tag() {
        let store = MemoryStore::new();
        let first = JournalEntry::new("countdown", Utc::now(), 60);
        let second = JournalEntry::new("countdown", Utc::now(), 90);
        store.record(&first).unwrap();
        store.record(&second).unwrap();
        let entries = store.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_id, second.task_id);

        // A stale id leaves the newer entry alone.
        store.remove("countdown", first.task_id).unwrap();
        assert_eq!(store.entries().unwrap().len(), 1);
        store.remove("countdown", second.task_id).unwrap();
        assert!(store.entries().unwrap().is_empty());
    }
}
