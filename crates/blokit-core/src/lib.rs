//! # Blokit Core Library
//!
//! This library provides the core logic for Blokit: a to-do list plus
//! "focus block" countdowns that leave a record of every completed session.
//! The `blokit` CLI is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Todo list**: create/complete/undo/mark transitions over a [`Store`],
//!   with live list views
//! - **Session manager**: the single active countdown, run by an injected
//!   [`TaskRunner`] and gated by a [`CapabilityGate`]; a countdown that
//!   reaches zero becomes an immutable [`Block`]
//! - **Storage**: SQLite or in-memory stores and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`TodoListManager`]: todo state transitions
//! - [`SessionManager`]: countdown state machine
//! - [`TokioTaskRunner`]: in-process countdown runner with a durable journal
//! - [`SqliteStore`]: persistence
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod model;
pub mod store;
pub mod timer;
pub mod todo;

pub use error::{ConfigError, CoreError, DatabaseError, ValidationError};
pub use events::{Event, EventBus};
pub use model::{Block, BlockId, Todo, TodoId, MAX_COUNTDOWN_SECS};
pub use store::{BlockQuery, Config, LiveView, MemoryStore, SqliteStore, Store, TodoQuery};
pub use timer::{
    CancelOutcome, CapabilityGate, SessionConfig, SessionManager, SessionState, StartOutcome,
    StaticGate, TaskId, TaskProgress, TaskRunner, TaskState, TimerSession, TokioTaskRunner,
};
pub use todo::TodoListManager;
