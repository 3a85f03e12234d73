use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dispatcher::SubmissionDispatcher;
use crate::error::{ClientError, SessionError};
use crate::models::SubmissionResult;
use crate::session::{AttemptPhase, QuizSession, SubmitTrigger, TickOutcome};

pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum CountdownExit {
    /// The clock ran out and the countdown dispatched the submission.
    Expired(Result<SubmissionResult, ClientError>),
    /// The clock ran out while a student submission was already in flight.
    Superseded,
    /// The attempt was completed before the clock ran out.
    Finalized,
}

/// Owns the countdown task. Dropping the handle stops the ticking; a timeout
/// submission already sent still runs to completion and settles the session.
pub struct CountdownHandle {
    task: Option<JoinHandle<CountdownExit>>,
}

impl CountdownHandle {
    /// Waits for the countdown to stop. Cancel-safe; returns `None` once the
    /// exit has been taken or if the task was aborted.
    pub async fn wait(&mut self) -> Option<CountdownExit> {
        let task = self.task.as_mut()?;
        let exit = task.await.ok();
        self.task = None;
        exit
    }

    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub fn spawn_countdown(session: Arc<QuizSession>, dispatcher: SubmissionDispatcher) -> CountdownHandle {
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            match session.phase() {
                AttemptPhase::Completed => return CountdownExit::Finalized,
                AttemptPhase::NotStarted | AttemptPhase::Submitting => continue,
                AttemptPhase::InProgress => {}
            }
            match session.tick() {
                Ok(TickOutcome::Running(left)) => {
                    if left % 60 == 0 {
                        debug!(quiz_id = %session.quiz().id, minutes_left = left / 60, "countdown");
                    }
                }
                Ok(TickOutcome::Expired) => {
                    info!(quiz_id = %session.quiz().id, "time is up, submitting");
                    // aborting the countdown must not drop a request in flight
                    let submit = tokio::spawn({
                        let session = session.clone();
                        let dispatcher = dispatcher.clone();
                        async move { dispatcher.submit(&session, SubmitTrigger::Timeout).await }
                    });
                    let outcome = match submit.await {
                        Ok(outcome) => outcome,
                        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                        Err(_) => return CountdownExit::Superseded,
                    };
                    return match outcome {
                        Err(ClientError::Session(SessionError::AlreadyClaimed)) => {
                            CountdownExit::Superseded
                        }
                        Err(ClientError::Session(SessionError::Finalized)) => CountdownExit::Finalized,
                        other => CountdownExit::Expired(other),
                    };
                }
                Err(SessionError::Finalized) => return CountdownExit::Finalized,
                // lost a race with a claim; re-check the phase next tick
                Err(_) => continue,
            }
        }
    });
    CountdownHandle { task: Some(task) }
}
