//! Per-attempt state for taking a quiz.
//!
//! A [`QuizSession`] owns the snapshot that is mirrored into
//! [`SessionStorage`] after every mutation, and the attempt phase
//! (`NotStarted -> InProgress -> Submitting -> Completed`). Leaving
//! `InProgress` goes through [`QuizSession::claim_submission`], which is a
//! compare-and-swap on the phase, so a timer-driven and a user-driven submit
//! can never both go out.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::models::{Answer, AnswerRecord, Quiz, SubmissionPayload, SubmissionResult};
use crate::shuffle::{ensure_shuffled, is_permutation_of, ShuffleMap, ShuffledOption};
use crate::storage::{progress_key, SessionStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttemptPhase {
    NotStarted = 0,
    InProgress = 1,
    Submitting = 2,
    Completed = 3,
}

impl AttemptPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => AttemptPhase::NotStarted,
            1 => AttemptPhase::InProgress,
            2 => AttemptPhase::Submitting,
            _ => AttemptPhase::Completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitTrigger {
    /// Explicit submit. Requires every question answered while time remains.
    User,
    /// Countdown reached zero. Partial answers go out as they are.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running(u64),
    Expired,
}

/// Stored shape under `quiz_progress_<quizId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub quiz_id: String,
    pub current_question: usize,
    #[serde(default)]
    pub answers: BTreeMap<String, Answer>,
    pub time_left: u64,
    #[serde(default)]
    pub shuffled_options: Option<ShuffleMap>,
}

impl SessionSnapshot {
    pub fn fresh(quiz: &Quiz) -> Self {
        Self {
            quiz_id: quiz.id.clone(),
            current_question: 0,
            answers: BTreeMap::new(),
            time_left: quiz.duration_secs(),
            shuffled_options: None,
        }
    }
}

/// What the student sees for the current question.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub question_id: String,
    pub prompt: String,
    /// Display order; each entry keeps its original index.
    pub options: Vec<ShuffledOption>,
    pub answer: Option<Answer>,
    pub time_left: u64,
}

pub struct QuizSession {
    quiz: Arc<Quiz>,
    storage: Arc<dyn SessionStorage>,
    key: String,
    state: Mutex<SessionSnapshot>,
    phase: AtomicU8,
    result: Mutex<Option<SubmissionResult>>,
    resumed: bool,
}

fn load_snapshot(storage: &dyn SessionStorage, key: &str, quiz: &Quiz) -> Option<SessionSnapshot> {
    let raw = match storage.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            warn!("failed to read saved progress {}: {}", key, err);
            return None;
        }
    };
    match serde_json::from_str::<SessionSnapshot>(&raw) {
        Ok(snapshot) if snapshot.quiz_id == quiz.id => Some(snapshot),
        Ok(snapshot) => {
            warn!(
                "ignoring saved progress {} for quiz {} (expected {})",
                key, snapshot.quiz_id, quiz.id
            );
            None
        }
        Err(err) => {
            warn!("saved progress {} is malformed, starting fresh: {}", key, err);
            None
        }
    }
}

/// Drops the parts of a stored snapshot that no longer fit `quiz`: answers
/// the question would reject, a clock beyond the quiz duration, and an option
/// order that is not a permutation of every question's options.
fn repair_snapshot(snapshot: &mut SessionSnapshot, quiz: &Quiz) {
    if snapshot.current_question >= quiz.questions.len() {
        snapshot.current_question = quiz.questions.len().saturating_sub(1);
    }
    if snapshot.time_left > quiz.duration_secs() {
        warn!(
            quiz_id = %quiz.id,
            stored = snapshot.time_left,
            "saved clock exceeds the quiz duration, capping it"
        );
        snapshot.time_left = quiz.duration_secs();
    }
    snapshot.answers.retain(|question_id, answer| {
        let valid = quiz.question(question_id).is_some_and(|q| q.accepts(answer));
        if !valid {
            warn!(quiz_id = %quiz.id, %question_id, "dropping saved answer that no longer fits");
        }
        valid
    });
    let order_fits = snapshot.shuffled_options.as_ref().map_or(true, |map| {
        map.len() == quiz.questions.len()
            && quiz
                .questions
                .iter()
                .all(|q| map.get(&q.id).is_some_and(|shuffled| is_permutation_of(q, shuffled)))
    });
    if !order_fits {
        warn!(quiz_id = %quiz.id, "saved option order is broken, it will be regenerated");
        snapshot.shuffled_options = None;
    }
}

impl QuizSession {
    /// Resumes the stored attempt for `quiz` if there is a matching one,
    /// otherwise starts a fresh one.
    pub fn open(quiz: Arc<Quiz>, storage: Arc<dyn SessionStorage>) -> Self {
        let key = progress_key(&quiz.id);
        let (snapshot, resumed) = match load_snapshot(storage.as_ref(), &key, &quiz) {
            Some(mut snapshot) => {
                repair_snapshot(&mut snapshot, &quiz);
                info!(
                    quiz_id = %quiz.id,
                    time_left = snapshot.time_left,
                    answered = snapshot.answers.len(),
                    "resuming saved attempt"
                );
                (snapshot, true)
            }
            None => (SessionSnapshot::fresh(&quiz), false),
        };
        Self {
            quiz,
            storage,
            key,
            state: Mutex::new(snapshot),
            phase: AtomicU8::new(AttemptPhase::NotStarted as u8),
            result: Mutex::new(None),
            resumed,
        }
    }

    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    pub fn storage_key(&self) -> &str {
        &self.key
    }

    pub fn was_resumed(&self) -> bool {
        self.resumed
    }

    pub fn phase(&self) -> AttemptPhase {
        AttemptPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock_state().clone()
    }

    pub fn time_left(&self) -> u64 {
        self.lock_state().time_left
    }

    pub fn answered_count(&self) -> usize {
        self.lock_state().answers.len()
    }

    pub fn unanswered_ids(&self) -> Vec<String> {
        self.unanswered_in(&self.lock_state())
    }

    pub fn result(&self) -> Option<SubmissionResult> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn start(&self) -> Result<(), SessionError> {
        self.start_with_rng(&mut rand::thread_rng())
    }

    /// Shuffles options (once per attempt) and enters `InProgress`.
    pub fn start_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<(), SessionError> {
        let mut state = self.lock_state();
        match self.transition(AttemptPhase::NotStarted, AttemptPhase::InProgress) {
            Ok(()) => {}
            Err(AttemptPhase::InProgress) => return Ok(()),
            Err(AttemptPhase::Completed) => return Err(SessionError::Finalized),
            Err(other) => return Err(SessionError::NotInProgress(other)),
        }
        if ensure_shuffled(&mut state.shuffled_options, &self.quiz, rng) {
            debug!(quiz_id = %self.quiz.id, "generated option order");
        }
        self.persist(&state);
        Ok(())
    }

    /// Records an answer given in original option indices.
    pub fn select_answer(&self, question_id: &str, answer: Answer) -> Result<(), SessionError> {
        let question = self
            .quiz
            .question(question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;
        if !question.accepts(&answer) {
            return Err(SessionError::InvalidAnswer(question_id.to_string()));
        }
        self.mutate(|state| {
            state.answers.insert(question_id.to_string(), answer);
            Ok(())
        })
    }

    /// Records the option shown at `display_index`, translated back to its
    /// original index.
    pub fn select_displayed_option(
        &self,
        question_id: &str,
        display_index: usize,
    ) -> Result<Answer, SessionError> {
        let answer = {
            let state = self.lock_state();
            let original = self.original_index(&state, question_id, display_index)?;
            Answer::Choice(original)
        };
        self.select_answer(question_id, answer.clone())?;
        Ok(answer)
    }

    /// Records a drag-and-drop arrangement given as display positions.
    pub fn arrange_blocks(
        &self,
        question_id: &str,
        display_order: &[usize],
    ) -> Result<Answer, SessionError> {
        let answer = {
            let state = self.lock_state();
            let order = display_order
                .iter()
                .map(|&pos| self.original_index(&state, question_id, pos))
                .collect::<Result<Vec<_>, _>>()?;
            Answer::Order(order)
        };
        self.select_answer(question_id, answer.clone())?;
        Ok(answer)
    }

    pub fn go_to(&self, index: usize) -> Result<usize, SessionError> {
        let len = self.quiz.questions.len();
        if index >= len {
            return Err(SessionError::OutOfRange { index, len });
        }
        self.mutate(|state| {
            state.current_question = index;
            Ok(index)
        })
    }

    pub fn next(&self) -> Result<usize, SessionError> {
        let last = self.quiz.questions.len().saturating_sub(1);
        self.mutate(|state| {
            state.current_question = (state.current_question + 1).min(last);
            Ok(state.current_question)
        })
    }

    pub fn previous(&self) -> Result<usize, SessionError> {
        self.mutate(|state| {
            state.current_question = state.current_question.saturating_sub(1);
            Ok(state.current_question)
        })
    }

    /// Takes one second off the clock.
    pub fn tick(&self) -> Result<TickOutcome, SessionError> {
        self.mutate(|state| {
            if state.time_left == 0 {
                return Ok(TickOutcome::Expired);
            }
            state.time_left -= 1;
            Ok(if state.time_left == 0 {
                TickOutcome::Expired
            } else {
                TickOutcome::Running(state.time_left)
            })
        })
    }

    pub fn current_view(&self) -> Option<QuestionView> {
        let state = self.lock_state();
        let question = self.quiz.questions.get(state.current_question)?;
        let options = state
            .shuffled_options
            .as_ref()
            .and_then(|m| m.get(&question.id))
            .cloned()
            .unwrap_or_else(|| {
                question
                    .options()
                    .iter()
                    .enumerate()
                    .map(|(original_index, text)| ShuffledOption {
                        text: text.clone(),
                        original_index,
                    })
                    .collect()
            });
        Some(QuestionView {
            index: state.current_question,
            total: self.quiz.questions.len(),
            question_id: question.id.clone(),
            prompt: question.prompt.clone(),
            options,
            answer: state.answers.get(&question.id).cloned(),
            time_left: state.time_left,
        })
    }

    /// Moves `InProgress -> Submitting` and returns the payload to send.
    /// Only one caller can ever win this for a given attempt.
    pub fn claim_submission(&self, trigger: SubmitTrigger) -> Result<SubmissionPayload, SessionError> {
        let state = self.lock_state();
        match self.phase() {
            AttemptPhase::InProgress => {}
            AttemptPhase::Submitting => return Err(SessionError::AlreadyClaimed),
            AttemptPhase::Completed => return Err(SessionError::Finalized),
            AttemptPhase::NotStarted => {
                return Err(SessionError::NotInProgress(AttemptPhase::NotStarted))
            }
        }
        if trigger == SubmitTrigger::User && state.time_left > 0 {
            let missing = self.unanswered_in(&state);
            if !missing.is_empty() {
                return Err(SessionError::Unanswered(missing));
            }
        }
        self.transition(AttemptPhase::InProgress, AttemptPhase::Submitting)
            .map_err(|_| SessionError::AlreadyClaimed)?;

        let answers: Vec<AnswerRecord> = self
            .quiz
            .questions
            .iter()
            .filter_map(|q| {
                state.answers.get(&q.id).map(|a| AnswerRecord {
                    question_id: q.id.clone(),
                    selected_answer: a.clone(),
                })
            })
            .collect();
        info!(
            quiz_id = %self.quiz.id,
            ?trigger,
            answered = answers.len(),
            total = self.quiz.questions.len(),
            "claimed submission"
        );
        Ok(SubmissionPayload {
            quiz_id: self.quiz.id.clone(),
            answers,
        })
    }

    /// `Submitting -> Completed`. Clears stored progress.
    pub fn complete(&self, result: SubmissionResult) -> Result<(), SessionError> {
        let _state = self.lock_state();
        self.transition(AttemptPhase::Submitting, AttemptPhase::Completed)
            .map_err(SessionError::NotInProgress)?;
        if let Err(err) = self.storage.clear(&self.key) {
            warn!("failed to clear saved progress {}: {}", self.key, err);
        }
        *self.result.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
        Ok(())
    }

    /// `Submitting -> InProgress` after a failed submit; progress stays saved.
    pub fn release(&self) -> Result<(), SessionError> {
        let state = self.lock_state();
        self.transition(AttemptPhase::Submitting, AttemptPhase::InProgress)
            .map_err(SessionError::NotInProgress)?;
        self.persist(&state);
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, from: AttemptPhase, to: AttemptPhase) -> Result<(), AttemptPhase> {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(AttemptPhase::from_u8)
    }

    /// Phase changes away from `InProgress` also take the state lock, so the
    /// check below holds for the whole closure.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut SessionSnapshot) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let mut state = self.lock_state();
        match self.phase() {
            AttemptPhase::InProgress => {}
            AttemptPhase::Completed => return Err(SessionError::Finalized),
            other => return Err(SessionError::NotInProgress(other)),
        }
        let out = f(&mut state)?;
        self.persist(&state);
        Ok(out)
    }

    fn persist(&self, state: &SessionSnapshot) {
        if self.phase() == AttemptPhase::Completed {
            return;
        }
        let raw = match serde_json::to_string(state) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("failed to encode progress for {}: {}", self.key, err);
                return;
            }
        };
        if let Err(err) = self.storage.set(&self.key, &raw) {
            warn!("failed to save progress {}: {}", self.key, err);
        }
    }

    fn original_index(
        &self,
        state: &SessionSnapshot,
        question_id: &str,
        display_index: usize,
    ) -> Result<usize, SessionError> {
        let question = self
            .quiz
            .question(question_id)
            .ok_or_else(|| SessionError::UnknownQuestion(question_id.to_string()))?;
        let len = question.options().len();
        match state.shuffled_options.as_ref().and_then(|m| m.get(question_id)) {
            Some(shuffled) => shuffled
                .get(display_index)
                .map(|o| o.original_index)
                .ok_or(SessionError::OutOfRange { index: display_index, len }),
            None if display_index < len => Ok(display_index),
            None => Err(SessionError::OutOfRange { index: display_index, len }),
        }
    }

    fn unanswered_in(&self, state: &SessionSnapshot) -> Vec<String> {
        self.quiz
            .questions
            .iter()
            .filter(|q| !state.answers.contains_key(&q.id))
            .map(|q| q.id.clone())
            .collect()
    }
}
