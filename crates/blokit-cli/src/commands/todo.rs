//! Todo list commands.

use std::sync::Arc;
use std::time::Duration;

use blokit_core::{Config, EventBus, SqliteStore, Todo, TodoId, TodoListManager, TodoQuery};
use clap::Subcommand;

use super::{print_json, CliResult};

/// Other processes write to the same database without waking our live
/// view, so `watch` also re-reads on this interval.
const WATCH_REFRESH: Duration = Duration::from_secs(1);

#[derive(Subcommand)]
pub enum TodoAction {
    /// Add a todo
    Add {
        /// Todo text; surrounding whitespace is trimmed
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// List todos
    List {
        /// Which todos to show: incomplete, marked or all
        #[arg(long, default_value = "incomplete")]
        view: TodoQuery,
    },
    /// Mark a todo completed
    Complete {
        /// Todo ID
        id: TodoId,
    },
    /// Undo a completion
    Undo {
        /// Todo ID
        id: TodoId,
    },
    /// Toggle the mark on a todo
    Mark {
        /// Todo ID
        id: TodoId,
    },
    /// Print the list again every time it changes (Ctrl-C to stop)
    Watch {
        #[arg(long, default_value = "incomplete")]
        view: TodoQuery,
    },
}

fn open_manager() -> Result<TodoListManager, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    Ok(TodoListManager::new(store, EventBus::default()))
}

pub async fn run(action: TodoAction, config: &Config) -> CliResult {
    let todos = open_manager()?;

    match action {
        TodoAction::Add { text } => match todos.create(&text.join(" "))? {
            Some(todo) => print_json(&todo)?,
            None => eprintln!("nothing to add: todo text is empty"),
        },
        TodoAction::List { view } => {
            print_json(&todos.list(view).current()?)?;
        }
        TodoAction::Complete { id } => {
            let todo = todos.complete(id)?;
            print_json(&todo)?;
            if config.todo.undo_window_secs > 0 {
                eprintln!(
                    "completed; undo within {}s with: blokit todo undo {id}",
                    config.todo.undo_window_secs
                );
            }
        }
        TodoAction::Undo { id } => {
            print_json(&todos.undo_complete(id)?)?;
        }
        TodoAction::Mark { id } => {
            print_json(&todos.toggle_marked(id)?)?;
        }
        TodoAction::Watch { view } => watch(&todos, view).await?,
    }
    Ok(())
}

async fn watch(todos: &TodoListManager, view: TodoQuery) -> CliResult {
    let mut live = todos.list(view);
    let mut shown: Vec<Todo> = live.current()?;
    print_json(&shown)?;

    let mut refresh = tokio::time::interval(WATCH_REFRESH);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let latest = tokio::select! {
            Some(result) = live.next() => result?,
            _ = refresh.tick() => live.current()?,
            _ = &mut ctrl_c => return Ok(()),
        };
        if latest != shown {
            print_json(&latest)?;
            shown = latest;
        }
    }
}
