mod capability;
mod runner;
mod session;
mod tokio_runner;

pub use capability::{CapabilityGate, StaticGate};
pub use runner::{
    countdown_secs, CancelResult, JournalEntry, TaskId, TaskJournal, TaskProgress, TaskRunner,
    TaskState,
};
pub use session::{
    CancelOutcome, SessionConfig, SessionManager, SessionState, StartOutcome, TimerSession,
    DEFAULT_FOCUS_DURATION,
};
pub use tokio_runner::TokioTaskRunner;
