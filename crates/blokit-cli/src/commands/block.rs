//! Focus block commands.
//!
//! Every invocation resumes journaled countdowns first, so a block that
//! finished while no `blokit` process was running is recorded on the next
//! command.

use std::sync::Arc;
use std::time::Duration;

use blokit_core::{
    CancelOutcome, Config, EventBus, SessionManager, SessionState, SqliteStore, StartOutcome,
    TokioTaskRunner,
};
use clap::Subcommand;

use super::{print_json, CliResult};
use crate::gate::PromptGate;

#[derive(Subcommand)]
pub enum BlockAction {
    /// Start a countdown and follow it in the foreground (Ctrl-C cancels)
    Start {
        /// Countdown length in minutes (default: timer.focus_duration_min)
        #[arg(long)]
        minutes: Option<u64>,
        /// Grant the notification permission without asking
        #[arg(long)]
        yes: bool,
    },
    /// Follow a countdown left running by an earlier process
    Resume,
    /// Cancel the active countdown
    Cancel,
    /// Print the current session as JSON
    Status,
    /// List blocks started today (UTC)
    Today,
}

fn open_session(
    config: &Config,
    assume_yes: bool,
) -> Result<SessionManager, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteStore::open()?);
    let runner = Arc::new(TokioTaskRunner::with_journal(store.clone()));
    let resumed = runner.resume()?;
    if !resumed.is_empty() {
        tracing::debug!(count = resumed.len(), "resumed journaled countdowns");
    }

    let gate = Arc::new(PromptGate::new(assume_yes || config.notifications.auto_grant));
    let manager = SessionManager::new(store, runner, gate, config.session(), EventBus::default());
    if let Some(block) = manager.poll()? {
        eprintln!("recorded a block that finished while blokit was not running:");
        print_json(&block)?;
    }
    Ok(manager)
}

pub async fn run(action: BlockAction, config: &Config) -> CliResult {
    match action {
        BlockAction::Start { minutes, yes } => {
            let manager = open_session(config, yes)?;
            let duration = match minutes {
                Some(m) => Duration::from_secs(m.saturating_mul(60)),
                None => manager.config().duration,
            };
            match manager.start_with(duration).await? {
                StartOutcome::Started(task_id) => {
                    eprintln!("block started ({task_id})");
                    follow(&manager).await?;
                }
                StartOutcome::CapabilityDenied => {
                    eprintln!("permission denied; no block started");
                }
            }
        }
        BlockAction::Resume => {
            let manager = open_session(config, false)?;
            if manager.session().task_id.is_some() {
                follow(&manager).await?;
            } else {
                eprintln!("no countdown to resume");
            }
        }
        BlockAction::Cancel => {
            let manager = open_session(config, false)?;
            report_cancel(manager.cancel()?)?;
        }
        BlockAction::Status => {
            let manager = open_session(config, false)?;
            print_json(&manager.session())?;
        }
        BlockAction::Today => {
            let manager = open_session(config, false)?;
            print_json(&manager.todays_blocks().current()?)?;
        }
    }
    Ok(())
}

/// Show the countdown until it finishes or Ctrl-C cancels it.
async fn follow(manager: &SessionManager) -> CliResult {
    let mut session = manager.watch();
    let finished = manager.run_to_completion();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(finished, ctrl_c);

    loop {
        tokio::select! {
            result = &mut finished => {
                eprintln!();
                match result? {
                    Some(block) => {
                        eprintln!("block complete");
                        print_json(&block)?;
                    }
                    None => eprintln!("countdown ended without a block"),
                }
                return Ok(());
            }
            Ok(()) = session.changed() => {
                let snapshot = session.borrow_and_update().clone();
                if snapshot.state == SessionState::Running {
                    eprint!("\r{} remaining ", format_remaining(snapshot.remaining_secs));
                }
            }
            _ = &mut ctrl_c => {
                eprintln!();
                return report_cancel(manager.cancel()?);
            }
        }
    }
}

fn report_cancel(outcome: CancelOutcome) -> CliResult {
    match outcome {
        CancelOutcome::NoActiveSession => eprintln!("no active countdown"),
        CancelOutcome::Cancelled(task_id) => eprintln!("countdown {task_id} cancelled"),
        CancelOutcome::CompletedFirst(block) => {
            eprintln!("countdown had already finished; block recorded");
            print_json(&block)?;
        }
    }
    Ok(())
}

fn format_remaining(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_is_minutes_and_seconds() {
        assert_eq!(format_remaining(0), "00:00");
        assert_eq!(format_remaining(59), "00:59");
        assert_eq!(format_remaining(25 * 60), "25:00");
        assert_eq!(format_remaining(61 * 60 + 5), "61:05");
    }
}
