//! Todo list manager.
//!
//! Todos are created from free text and then only change through the
//! three transitions below; nothing is ever deleted.

use std::sync::Arc;

use chrono::Utc;

use crate::error::{CoreError, Result};
use crate::events::{Event, EventBus};
use crate::model::{NewTodo, Todo, TodoId};
use crate::store::{LiveView, Store, TodoQuery};

pub struct TodoListManager {
    store: Arc<dyn Store>,
    events: EventBus,
}

impl TodoListManager {
    pub fn new(store: Arc<dyn Store>, events: EventBus) -> Self {
        Self { store, events }
    }

    /// Store a new todo with the trimmed `text`.
    ///
    /// Returns `Ok(None)` without touching the store when nothing is left
    /// after trimming.
    ///
    /// # Errors
    /// Returns an error if the store rejects the insert.
    pub fn create(&self, text: &str) -> Result<Option<Todo>> {
        let Some(new) = NewTodo::from_text(text, Utc::now()) else {
            tracing::debug!("skipping empty todo");
            return Ok(None);
        };
        let todo = self.store.insert_todo(new)?;
        tracing::info!(todo_id = todo.id, "todo created");
        self.events.publish(Event::TodoCreated {
            todo_id: todo.id,
            at: todo.created_at,
        });
        Ok(Some(todo))
    }

    /// # Errors
    /// Returns `CoreError::NotFound` if no todo has this id.
    pub fn get(&self, id: TodoId) -> Result<Todo> {
        self.store
            .get_todo(id)?
            .ok_or_else(|| CoreError::todo_not_found(id))
    }

    /// Mark the todo completed now. Completing a completed todo changes
    /// nothing.
    ///
    /// # Errors
    /// Returns `CoreError::NotFound` if no todo has this id.
    pub fn complete(&self, id: TodoId) -> Result<Todo> {
        let mut todo = self.get(id)?;
        if todo.completed {
            return Ok(todo);
        }
        let now = Utc::now();
        todo.complete(now);
        self.store.update_todo(&todo)?;
        tracing::info!(todo_id = id, "todo completed");
        self.events.publish(Event::TodoCompleted { todo_id: id, at: now });
        Ok(todo)
    }

    /// Revert a completion. The manager imposes no deadline; offering the
    /// undo only briefly is up to the caller.
    ///
    /// # Errors
    /// Returns `CoreError::NotFound` if no todo has this id.
    pub fn undo_complete(&self, id: TodoId) -> Result<Todo> {
        let mut todo = self.get(id)?;
        if !todo.completed {
            return Ok(todo);
        }
        todo.undo_complete();
        self.store.update_todo(&todo)?;
        tracing::info!(todo_id = id, "todo completion undone");
        self.events.publish(Event::TodoRestored {
            todo_id: id,
            at: Utc::now(),
        });
        Ok(todo)
    }

    /// # Errors
    /// Returns `CoreError::NotFound` if no todo has this id.
    pub fn toggle_marked(&self, id: TodoId) -> Result<Todo> {
        let mut todo = self.get(id)?;
        let now = Utc::now();
        todo.toggle_marked(now);
        self.store.update_todo(&todo)?;
        tracing::debug!(todo_id = id, marked = todo.marked, "todo mark toggled");
        self.events.publish(Event::TodoMarkToggled {
            todo_id: id,
            marked: todo.marked,
            at: now,
        });
        Ok(todo)
    }

    pub fn list(&self, query: TodoQuery) -> LiveView<TodoQuery> {
        LiveView::new(self.store.clone(), query)
    }

    /// Incomplete todos, oldest first.
    pub fn list_incomplete(&self) -> LiveView<TodoQuery> {
        self.list(TodoQuery::Incomplete)
    }

    /// Marked incomplete todos, most recently marked first.
    pub fn list_marked(&self) -> LiveView<TodoQuery> {
        self.list(TodoQuery::Marked)
    }

    pub fn list_all(&self) -> LiveView<TodoQuery> {
        self.list(TodoQuery::All)
    }
}
