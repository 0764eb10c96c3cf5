//! Live query results.
//!
//! A [`LiveView`] pairs a query with the store's revision channel. The first
//! read replays the current result; afterwards every committed mutation
//! wakes the view and the query runs again against the committed state.

use std::sync::Arc;

use tokio::sync::watch;

use super::{BlockQuery, Store, TodoQuery};
use crate::error::Result;
use crate::model::{Block, Todo};

/// A query that can be re-run against a store.
pub trait LiveQuery: Copy + Send + Sync {
    type Item: Clone + Send;

    fn fetch(&self, store: &dyn Store) -> Result<Vec<Self::Item>>;
}

impl LiveQuery for TodoQuery {
    type Item = Todo;

    fn fetch(&self, store: &dyn Store) -> Result<Vec<Todo>> {
        store.query_todos(*self)
    }
}

impl LiveQuery for BlockQuery {
    type Item = Block;

    fn fetch(&self, store: &dyn Store) -> Result<Vec<Block>> {
        store.query_blocks(self.resolve())
    }
}

pub struct LiveView<Q: LiveQuery> {
    store: Arc<dyn Store>,
    query: Q,
    revisions: watch::Receiver<u64>,
}

impl<Q: LiveQuery> LiveView<Q> {
    pub fn new(store: Arc<dyn Store>, query: Q) -> Self {
        let revisions = store.subscribe();
        Self {
            store,
            query,
            revisions,
        }
    }

    pub fn query(&self) -> Q {
        self.query
    }

    /// The latest result. Marks the current revision as seen.
    pub fn current(&mut self) -> Result<Vec<Q::Item>> {
        self.revisions.borrow_and_update();
        self.query.fetch(self.store.as_ref())
    }

    /// Wait for the next committed mutation and re-run the query.
    ///
    /// The view holds the store, so this keeps waiting for as long as the
    /// view lives. `None` only comes back if the store's revision sender
    /// is closed.
    pub async fn next(&mut self) -> Option<Result<Vec<Q::Item>>> {
        self.revisions.changed().await.ok()?;
        Some(self.current())
    }
}
