use futures::future::BoxFuture;
use quiz_client::api::QuizApi;
use quiz_client::dispatcher::SubmissionDispatcher;
use quiz_client::error::{ClientError, SessionError, StorageError};
use quiz_client::models::{
    Answer, FlagRequest, LeaderboardEntry, Quiz, QuestionKind, SubmissionPayload, SubmissionResult,
};
use quiz_client::session::{AttemptPhase, QuizSession, SubmitTrigger};
use quiz_client::storage::{FileStorage, MemoryStorage, SessionStorage};
use quiz_client::timer::{spawn_countdown, CountdownExit};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

struct FakeInner {
    quiz: Quiz,
    latency: Duration,
    submit_calls: AtomicUsize,
    fail_next: AtomicBool,
    payloads: Mutex<Vec<SubmissionPayload>>,
}

#[derive(Clone)]
struct FakeApi {
    inner: Arc<FakeInner>,
}

impl FakeApi {
    fn new(quiz: Quiz, latency: Duration) -> Self {
        Self {
            inner: Arc::new(FakeInner {
                quiz,
                latency,
                submit_calls: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
                payloads: Mutex::new(Vec::new()),
            }),
        }
    }

    fn submit_calls(&self) -> usize {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }

    fn payloads(&self) -> Vec<SubmissionPayload> {
        self.inner.payloads.lock().unwrap().clone()
    }
}

impl QuizApi for FakeApi {
    fn fetch_quiz_by_code(&self, _code: &str) -> BoxFuture<'static, Result<Quiz, ClientError>> {
        let quiz = self.inner.quiz.clone();
        Box::pin(async move { Ok(quiz) })
    }

    fn submit(
        &self,
        payload: SubmissionPayload,
    ) -> BoxFuture<'static, Result<SubmissionResult, ClientError>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.submit_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(inner.latency).await;
            if inner.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ClientError::Api {
                    status: 503,
                    code: None,
                    message: "unavailable".into(),
                });
            }
            let score = payload
                .answers
                .iter()
                .filter(|record| {
                    let question = inner.quiz.question(&record.question_id);
                    match (question.map(|q| &q.kind), &record.selected_answer) {
                        (
                            Some(QuestionKind::Mcq { correct_answer, .. })
                            | Some(QuestionKind::TrueFalse { correct_answer, .. }),
                            Answer::Choice(chosen),
                        ) => *correct_answer == Some(*chosen),
                        _ => false,
                    }
                })
                .count() as u32;
            let total = inner.quiz.questions.len() as u32;
            inner.payloads.lock().unwrap().push(payload);
            Ok(SubmissionResult {
                score,
                total_questions: total,
                percentage: f64::from(score) * 100.0 / f64::from(total),
                detailed_results: vec![],
                is_practice: false,
                attempt_number: Some(1),
            })
        })
    }

    fn leaderboard(
        &self,
        _quiz_id: &str,
    ) -> BoxFuture<'static, Result<Vec<LeaderboardEntry>, ClientError>> {
        Box::pin(async { Ok(vec![]) })
    }

    fn flag_question(&self, _request: FlagRequest) -> BoxFuture<'static, Result<(), ClientError>> {
        Box::pin(async { Ok(()) })
    }
}

fn two_question_quiz() -> Quiz {
    serde_json::from_value(json!({
        "id": "quiz-timer",
        "title": "One minute",
        "duration": 1,
        "questions": [
            {"id": "q1", "question": "2 + 2", "options": ["3", "4", "5"], "correctAnswer": 1},
            {"id": "q2", "question": "Sky is green", "questionType": "true_false", "correctAnswer": 1}
        ]
    }))
    .unwrap()
}

fn setup(
    latency: Duration,
) -> (FakeApi, Arc<MemoryStorage>, Arc<QuizSession>, SubmissionDispatcher) {
    let quiz = two_question_quiz();
    let api = FakeApi::new(quiz.clone(), latency);
    let storage = Arc::new(MemoryStorage::new());
    let session = Arc::new(QuizSession::open(Arc::new(quiz), storage.clone()));
    session.start().unwrap();
    let dispatcher = SubmissionDispatcher::new(Arc::new(api.clone()));
    (api, storage, session, dispatcher)
}

#[tokio::test(start_paused = true)]
async fn timeout_submits_partial_answers_once() {
    let (api, storage, session, dispatcher) = setup(Duration::from_millis(50));
    session.select_answer("q1", Answer::Choice(1)).unwrap();

    let started = tokio::time::Instant::now();
    let mut countdown = spawn_countdown(session.clone(), dispatcher);
    let exit = countdown.wait().await;

    assert!(started.elapsed() >= Duration::from_secs(60));
    let result = match exit {
        Some(CountdownExit::Expired(Ok(result))) => result,
        other => panic!("unexpected countdown exit {other:?}"),
    };
    assert_eq!(result.score, 1);
    assert_eq!(result.total_questions, 2);
    assert_eq!(api.submit_calls(), 1);
    let payloads = api.payloads();
    assert_eq!(payloads[0].answers.len(), 1);
    assert_eq!(payloads[0].answers[0].question_id, "q1");
    assert_eq!(session.phase(), AttemptPhase::Completed);
    assert!(storage.is_empty());
    assert!(countdown.wait().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn timer_and_user_racing_submit_only_once() {
    let (api, storage, session, dispatcher) = setup(Duration::from_millis(200));
    session.select_answer("q1", Answer::Choice(1)).unwrap();
    session.select_answer("q2", Answer::Choice(1)).unwrap();

    let mut countdown = spawn_countdown(session.clone(), dispatcher.clone());
    tokio::time::sleep(Duration::from_secs(60)).await;
    let user = dispatcher.submit(&session, SubmitTrigger::User).await;
    let exit = countdown.wait().await;

    let timer_won = matches!(exit, Some(CountdownExit::Expired(Ok(_))));
    let user_won = user.is_ok();
    assert!(timer_won ^ user_won, "user: {user:?}, timer: {exit:?}");
    if !user_won {
        assert!(matches!(
            user,
            Err(ClientError::Session(SessionError::AlreadyClaimed))
        ));
    }
    assert_eq!(api.submit_calls(), 1);
    assert_eq!(session.phase(), AttemptPhase::Completed);
    assert!(storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn user_submit_stops_the_countdown() {
    let (api, _storage, session, dispatcher) = setup(Duration::from_millis(10));
    let mut countdown = spawn_countdown(session.clone(), dispatcher.clone());

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    session.select_answer("q1", Answer::Choice(0)).unwrap();
    assert!(matches!(
        dispatcher.submit(&session, SubmitTrigger::User).await,
        Err(ClientError::Session(SessionError::Unanswered(_)))
    ));
    session.select_answer("q2", Answer::Choice(1)).unwrap();
    let result = dispatcher.submit(&session, SubmitTrigger::User).await.unwrap();
    assert_eq!(result.score, 1);
    assert_eq!(session.time_left(), 50);

    assert!(matches!(countdown.wait().await, Some(CountdownExit::Finalized)));
    assert_eq!(api.submit_calls(), 1);
    assert!(matches!(
        dispatcher.submit(&session, SubmitTrigger::User).await,
        Err(ClientError::Session(SessionError::Finalized))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_timeout_submission_keeps_attempt() {
    let (api, storage, session, dispatcher) = setup(Duration::from_millis(10));
    session.select_answer("q2", Answer::Choice(1)).unwrap();
    api.inner.fail_next.store(true, Ordering::SeqCst);

    let mut countdown = spawn_countdown(session.clone(), dispatcher.clone());
    match countdown.wait().await {
        Some(CountdownExit::Expired(Err(ClientError::Api { status: 503, .. }))) => {}
        other => panic!("unexpected countdown exit {other:?}"),
    }
    assert_eq!(session.phase(), AttemptPhase::InProgress);
    assert!(storage.contains("quiz_progress_quiz-timer"));
    assert_eq!(session.time_left(), 0);

    let result = dispatcher.submit(&session, SubmitTrigger::User).await.unwrap();
    assert_eq!(result.score, 1);
    assert_eq!(api.submit_calls(), 2);
    assert!(storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_stops_ticking() {
    let (_api, _storage, session, dispatcher) = setup(Duration::ZERO);
    let countdown = spawn_countdown(session.clone(), dispatcher);
    tokio::time::sleep(Duration::from_millis(5_500)).await;
    drop(countdown);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(session.time_left(), 55);
}

#[tokio::test(start_paused = true)]
async fn reload_mid_quiz_restores_saved_clock() {
    let dir = std::env::temp_dir().join(format!("quiz-client-flow-{}", uuid::Uuid::new_v4()));
    let quiz = Arc::new(two_question_quiz());
    let api = FakeApi::new((*quiz).clone(), Duration::ZERO);
    let dispatcher = SubmissionDispatcher::new(Arc::new(api.clone()));

    let before = {
        let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&dir));
        let session = Arc::new(QuizSession::open(quiz.clone(), storage));
        session.start().unwrap();
        session.select_answer("q1", Answer::Choice(2)).unwrap();
        session.next().unwrap();
        let countdown = spawn_countdown(session.clone(), dispatcher.clone());
        tokio::time::sleep(Duration::from_millis(45_500)).await;
        drop(countdown);
        session.snapshot()
    };
    assert_eq!(before.time_left, 15);

    let storage: Arc<dyn SessionStorage> = Arc::new(FileStorage::new(&dir));
    let resumed = QuizSession::open(quiz, storage);
    assert!(resumed.was_resumed());
    resumed.start().unwrap();
    let after = resumed.snapshot();
    assert_eq!(after.time_left, 15);
    assert_eq!(after.current_question, 1);
    assert_eq!(after.answers, before.answers);
    assert_eq!(after.shuffled_options, before.shuffled_options);
    assert_eq!(api.submit_calls(), 0);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_handle_mid_submission_still_settles_the_attempt() {
    let (api, storage, session, dispatcher) = setup(Duration::from_secs(5));
    session.select_answer("q1", Answer::Choice(1)).unwrap();

    let countdown = spawn_countdown(session.clone(), dispatcher);
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(session.phase(), AttemptPhase::Submitting);
    drop(countdown);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.submit_calls(), 1);
    assert_eq!(session.phase(), AttemptPhase::Completed);
    assert_eq!(session.result().map(|r| r.score), Some(1));
    assert!(storage.is_empty());
}

/// Storage that signals once the saved clock reaches zero.
struct ClockWatch {
    inner: MemoryStorage,
    expired: Arc<Notify>,
}

impl SessionStorage for ClockWatch {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let snapshot: serde_json::Value = serde_json::from_str(value).unwrap();
        if snapshot["timeLeft"] == 0 {
            self.expired.notify_one();
        }
        self.inner.set(key, value)
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        self.inner.clear(key)
    }
}

#[tokio::test(start_paused = true)]
async fn student_claim_at_expiry_supersedes_the_countdown() {
    let quiz = two_question_quiz();
    let api = FakeApi::new(quiz.clone(), Duration::from_millis(50));
    let expired = Arc::new(Notify::new());
    let storage = Arc::new(ClockWatch {
        inner: MemoryStorage::new(),
        expired: expired.clone(),
    });
    let session = Arc::new(QuizSession::open(Arc::new(quiz), storage.clone()));
    session.start().unwrap();
    let dispatcher = SubmissionDispatcher::new(Arc::new(api.clone()));

    let student = tokio::spawn({
        let session = session.clone();
        let dispatcher = dispatcher.clone();
        async move {
            expired.notified().await;
            dispatcher.submit(&session, SubmitTrigger::User).await
        }
    });
    let mut countdown = spawn_countdown(session.clone(), dispatcher);

    let exit = countdown.wait().await;
    assert!(matches!(exit, Some(CountdownExit::Superseded)), "{exit:?}");
    let result = student.await.unwrap().unwrap();
    assert_eq!(result.score, 0);
    assert_eq!(api.submit_calls(), 1);
    assert_eq!(session.phase(), AttemptPhase::Completed);
    assert!(storage.inner.is_empty());
}
