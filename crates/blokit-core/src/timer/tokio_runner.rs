//! Countdown runner backed by tokio tasks.
//!
//! Each countdown is one spawned task that reports the remaining seconds
//! once per second, from the full duration down to 1, then reports
//! `Finished` with 0 left. Finishing and cancelling both go through the
//! slot table lock, so for a given task exactly one of them takes effect.
//!
//! With a [`TaskJournal`] attached, scheduled countdowns survive a process
//! restart: [`TokioTaskRunner::resume`] picks them up again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::runner::{
    countdown_secs, CancelResult, JournalEntry, TaskId, TaskJournal, TaskProgress, TaskRunner,
    TaskState,
};
use crate::error::{CoreError, Result};

const TICK: Duration = Duration::from_secs(1);

struct ActiveTask {
    id: TaskId,
    total_secs: u64,
    handle: JoinHandle<()>,
}

struct Slot {
    progress: watch::Sender<Option<TaskProgress>>,
    active: Option<ActiveTask>,
    /// Last task under this tag that ran to completion.
    finished: Option<(TaskId, DateTime<Utc>)>,
}

impl Slot {
    fn new() -> Self {
        let (progress, _) = watch::channel(None);
        Self {
            progress,
            active: None,
            finished: None,
        }
    }

    fn publish(
        &self,
        tag: &str,
        id: TaskId,
        total_secs: u64,
        remaining_secs: u64,
        state: TaskState,
        at: DateTime<Utc>,
    ) {
        self.progress.send_replace(Some(TaskProgress {
            task_id: id,
            tag: tag.to_string(),
            total_secs,
            remaining_secs,
            state,
            at,
        }));
    }
}

struct Shared {
    slots: Mutex<HashMap<String, Slot>>,
    journal: Option<Arc<dyn TaskJournal>>,
}

impl Shared {
    /// Publish a running tick. Returns false once the task is no longer
    /// the active one under `tag`.
    fn report(&self, tag: &str, id: TaskId, remaining_secs: u64) -> bool {
        let slots = self.slots.lock();
        match slots.get(tag) {
            Some(slot) => match &slot.active {
                Some(active) if active.id == id => {
                    slot.publish(
                        tag,
                        id,
                        active.total_secs,
                        remaining_secs,
                        TaskState::Running,
                        Utc::now(),
                    );
                    true
                }
                _ => false,
            },
            None => false,
        }
    }

    fn finish(&self, tag: &str, id: TaskId, finished_at: DateTime<Utc>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(tag) else {
            return;
        };
        let total_secs = match &slot.active {
            Some(active) if active.id == id => active.total_secs,
            // Cancelled or replaced while we waited for the lock.
            _ => return,
        };
        slot.active = None;
        slot.finished = Some((id, finished_at));
        slot.publish(tag, id, total_secs, 0, TaskState::Finished, finished_at);
        self.forget(tag, id);
        tracing::info!(%tag, task_id = %id, "countdown finished");
    }

    /// Clear the journal entry for `tag`, unless a newer countdown already
    /// took it over.
    fn forget(&self, tag: &str, id: TaskId) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.remove(tag, id) {
                tracing::warn!(%tag, error = %e, "failed to clear countdown journal");
            }
        }
    }
}

#[derive(Clone)]
pub struct TokioTaskRunner {
    shared: Arc<Shared>,
}

impl TokioTaskRunner {
    /// A runner whose countdowns live only as long as the process.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A runner that journals every scheduled countdown.
    pub fn with_journal(journal: Arc<dyn TaskJournal>) -> Self {
        Self::build(Some(journal))
    }

    fn build(journal: Option<Arc<dyn TaskJournal>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(HashMap::new()),
                journal,
            }),
        }
    }

    /// Pick up countdowns left in the journal by an earlier process.
    ///
    /// Countdowns whose deadline already passed are reported `Finished` at
    /// their deadline; the rest continue with the time they have left.
    /// Returns the ids of every countdown taken over.
    ///
    /// # Errors
    /// Returns an error if the journal cannot be read, or if a countdown
    /// must be spawned outside a tokio runtime.
    pub fn resume(&self) -> Result<Vec<TaskId>> {
        let Some(journal) = &self.shared.journal else {
            return Ok(Vec::new());
        };
        let runtime = current_runtime()?;
        let entries = journal.entries()?;
        let now = Utc::now();
        let mut resumed = Vec::new();

        let mut slots = self.shared.slots.lock();
        for entry in entries {
            let slot = slots.entry(entry.tag.clone()).or_insert_with(Slot::new);
            if slot.active.is_some() {
                continue;
            }

            let (Some(remaining), Some(finished_at)) =
                (entry.remaining_secs(now), entry.deadline())
            else {
                tracing::warn!(
                    tag = %entry.tag,
                    task_id = %entry.task_id,
                    duration_secs = entry.duration_secs,
                    "dropping journaled countdown with invalid duration"
                );
                self.shared.forget(&entry.tag, entry.task_id);
                continue;
            };
            if remaining == 0 {
                slot.finished = Some((entry.task_id, finished_at));
                slot.publish(
                    &entry.tag,
                    entry.task_id,
                    entry.duration_secs,
                    0,
                    TaskState::Finished,
                    finished_at,
                );
                self.shared.forget(&entry.tag, entry.task_id);
                tracing::info!(
                    tag = %entry.tag,
                    task_id = %entry.task_id,
                    "countdown expired while offline"
                );
            } else {
                slot.publish(
                    &entry.tag,
                    entry.task_id,
                    entry.duration_secs,
                    remaining,
                    TaskState::Pending,
                    now,
                );
                let handle = self.spawn(&runtime, &entry, remaining);
                slot.active = Some(ActiveTask {
                    id: entry.task_id,
                    total_secs: entry.duration_secs,
                    handle,
                });
                tracing::info!(
                    tag = %entry.tag,
                    task_id = %entry.task_id,
                    remaining,
                    "countdown resumed"
                );
            }
            resumed.push(entry.task_id);
        }
        Ok(resumed)
    }

    /// Spawn the countdown task. Callers hold the slot lock, so the task
    /// cannot report before its slot names it active.
    fn spawn(&self, runtime: &Handle, entry: &JournalEntry, remaining_secs: u64) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let tag = entry.tag.clone();
        let id = entry.task_id;
        runtime.spawn(async move {
            run_countdown(shared, tag, id, remaining_secs).await;
        })
    }
}

impl Default for TokioTaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| CoreError::Runner(format!("no tokio runtime: {e}")))
}

async fn run_countdown(shared: Arc<Shared>, tag: String, id: TaskId, remaining_secs: u64) {
    let started = Instant::now();
    let mut remaining = remaining_secs;
    while remaining > 0 {
        if !shared.report(&tag, id, remaining) {
            return;
        }
        let elapsed_ticks = remaining_secs - remaining + 1;
        tokio::time::sleep_until(started + TICK * elapsed_ticks as u32).await;
        remaining -= 1;
        tracing::trace!(%tag, task_id = %id, remaining, "countdown tick");
    }
    shared.finish(&tag, id, Utc::now());
}

impl TaskRunner for TokioTaskRunner {
    fn schedule(&self, tag: &str, duration: Duration) -> Result<TaskId> {
        let total_secs = countdown_secs(duration)?;
        let runtime = current_runtime()?;
        let entry = JournalEntry::new(tag, Utc::now(), total_secs);
        if let Some(journal) = &self.shared.journal {
            journal.record(&entry)?;
        }

        let mut slots = self.shared.slots.lock();
        let slot = slots.entry(tag.to_string()).or_insert_with(Slot::new);
        if let Some(previous) = slot.active.take() {
            previous.handle.abort();
            tracing::info!(%tag, task_id = %previous.id, "countdown replaced");
        }

        slot.publish(
            tag,
            entry.task_id,
            total_secs,
            total_secs,
            TaskState::Pending,
            entry.started_at,
        );
        let handle = self.spawn(&runtime, &entry, total_secs);
        slot.active = Some(ActiveTask {
            id: entry.task_id,
            total_secs,
            handle,
        });
        tracing::info!(%tag, task_id = %entry.task_id, total_secs, "countdown scheduled");
        Ok(entry.task_id)
    }

    fn cancel(&self, task_id: TaskId) -> Result<CancelResult> {
        let mut slots = self.shared.slots.lock();
        for (tag, slot) in slots.iter_mut() {
            if slot.active.as_ref().is_some_and(|a| a.id == task_id) {
                let Some(active) = slot.active.take() else {
                    continue;
                };
                active.handle.abort();
                let remaining = slot
                    .progress
                    .borrow()
                    .as_ref()
                    .map(|p| p.remaining_secs)
                    .unwrap_or(active.total_secs);
                slot.publish(
                    tag,
                    task_id,
                    active.total_secs,
                    remaining,
                    TaskState::Cancelled,
                    Utc::now(),
                );
                self.shared.forget(tag, task_id);
                tracing::info!(%tag, %task_id, "countdown cancelled");
                return Ok(CancelResult::Cancelled);
            }
            if let Some((finished_id, finished_at)) = slot.finished {
                if finished_id == task_id {
                    return Ok(CancelResult::AlreadyFinished { finished_at });
                }
            }
        }
        Ok(CancelResult::Unknown)
    }

    fn subscribe_progress(&self, tag: &str) -> watch::Receiver<Option<TaskProgress>> {
        self.shared
            .slots
            .lock()
            .entry(tag.to_string())
            .or_insert_with(Slot::new)
            .progress
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn next_state(rx: &mut watch::Receiver<Option<TaskProgress>>) -> TaskProgress {
        rx.changed().await.unwrap();
        rx.borrow_and_update().clone().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_once_per_second_then_finishes() {
        let runner = TokioTaskRunner::new();
        let mut rx = runner.subscribe_progress("countdown");
        let id = runner.schedule("countdown", Duration::from_secs(3)).unwrap();

        let mut seen = Vec::new();
        loop {
            let p = next_state(&mut rx).await;
            assert_eq!(p.task_id, id);
            seen.push((p.state, p.remaining_secs));
            if p.state == TaskState::Finished {
                break;
            }
        }
        let running: Vec<u64> = seen
            .iter()
            .filter(|(s, _)| *s == TaskState::Running)
            .map(|(_, r)| *r)
            .collect();
        assert_eq!(running, vec![3, 2, 1]);
        assert_eq!(seen.last(), Some(&(TaskState::Finished, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_countdown() {
        let runner = TokioTaskRunner::new();
        let mut rx = runner.subscribe_progress("countdown");
        let id = runner.schedule("countdown", Duration::from_secs(60)).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(runner.cancel(id).unwrap(), CancelResult::Cancelled);
        let p = rx.borrow_and_update().clone().unwrap();
        assert_eq!(p.state, TaskState::Cancelled);

        tokio::time::sleep(Duration::from_secs(120)).await;
        let p = rx.borrow().clone().unwrap();
        assert_eq!(p.state, TaskState::Cancelled);
        assert_eq!(runner.cancel(id).unwrap(), CancelResult::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_finish_reports_completion() {
        let runner = TokioTaskRunner::new();
        let id = runner.schedule("countdown", Duration::from_secs(2)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        match runner.cancel(id).unwrap() {
            CancelResult::AlreadyFinished { .. } => {}
            other => panic!("expected AlreadyFinished, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_replaces_active_countdown() {
        let runner = TokioTaskRunner::new();
        let rx = runner.subscribe_progress("countdown");
        let first = runner.schedule("countdown", Duration::from_secs(10)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = runner.schedule("countdown", Duration::from_secs(10)).unwrap();
        assert_ne!(first, second);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let last = rx.borrow().clone().unwrap();
        assert_eq!(last.task_id, second);
        assert_eq!(last.state, TaskState::Finished);
        assert_eq!(runner.cancel(first).unwrap(), CancelResult::Unknown);
    }

    #[tokio::test]
    async fn out_of_range_durations_are_rejected() {
        let journal = Arc::new(MemoryStore::new());
        let runner = TokioTaskRunner::with_journal(journal.clone());
        assert!(runner.schedule("countdown", Duration::ZERO).is_err());
        let err = runner
            .schedule("countdown", Duration::from_secs(60_000_000_000_000))
            .unwrap_err();
        assert!(err.to_string().contains("at most"), "{err}");
        assert!(journal.entries().unwrap().is_empty());
        assert!(runner.subscribe_progress("countdown").borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_replaced_countdown_keeps_newer_journal_entry() {
        let journal = Arc::new(MemoryStore::new());
        let runner = TokioTaskRunner::with_journal(journal.clone());
        let first = runner.schedule("countdown", Duration::from_secs(1)).unwrap();

        // The next countdown is journaled before the first one's finish
        // takes the slot lock.
        let next = JournalEntry::new("countdown", Utc::now(), 60);
        journal.record(&next).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let last = runner.subscribe_progress("countdown").borrow().clone().unwrap();
        assert_eq!((last.task_id, last.state), (first, TaskState::Finished));
        let entries = journal.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].task_id, next.task_id);
    }

    #[tokio::test(start_paused = true)]
    async fn journal_tracks_active_countdown() {
        let journal = Arc::new(MemoryStore::new());
        let runner = TokioTaskRunner::with_journal(journal.clone());
        let id = runner.schedule("countdown", Duration::from_secs(2)).unwrap();
        assert_eq!(journal.entries().unwrap()[0].task_id, id);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(journal.entries().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_continues_or_expires_journaled_countdowns() {
        let journal = Arc::new(MemoryStore::new());
        let live = JournalEntry::new("live", Utc::now() - chrono::Duration::seconds(10), 60);
        let stale = JournalEntry::new("stale", Utc::now() - chrono::Duration::minutes(30), 60);
        journal.record(&live).unwrap();
        journal.record(&stale).unwrap();

        let runner = TokioTaskRunner::with_journal(journal.clone());
        let resumed = runner.resume().unwrap();
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed, vec![live.task_id, stale.task_id]);

        let stale_progress = runner.subscribe_progress("stale").borrow().clone().unwrap();
        assert_eq!(stale_progress.state, TaskState::Finished);
        assert_eq!(Some(stale_progress.at), stale.deadline());

        let live_progress = runner.subscribe_progress("live").borrow().clone().unwrap();
        assert!(live_progress.state.is_active());
        assert!(live_progress.remaining_secs <= 50);

        let remaining: Vec<_> = journal.entries().unwrap().into_iter().map(|e| e.tag).collect();
        assert_eq!(remaining, vec!["live".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_drops_entries_with_invalid_duration() {
        let journal = Arc::new(MemoryStore::new());
        let huge = JournalEntry::new("countdown", Utc::now(), 60_000_000_000_000);
        journal.record(&huge).unwrap();

        let runner = TokioTaskRunner::with_journal(journal.clone());
        assert!(runner.resume().unwrap().is_empty());
        assert!(journal.entries().unwrap().is_empty());
        assert!(runner.subscribe_progress("countdown").borrow().is_none());

        // The runner stays usable for the next countdown.
        let id = runner.schedule("countdown", Duration::from_secs(5)).unwrap();
        assert_eq!(journal.entries().unwrap()[0].task_id, id);
    }
}
