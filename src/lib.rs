pub mod api;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod session;
pub mod shuffle;
pub mod storage;
pub mod timer;

use std::sync::Arc;

use crate::api::QuizApi;
use crate::error::ClientError;
use crate::session::QuizSession;
use crate::storage::SessionStorage;

/// Fetches the quiz behind `code` and opens its attempt, resuming saved
/// progress from `storage` when there is any.
pub async fn open_attempt(
    api: &dyn QuizApi,
    storage: Arc<dyn SessionStorage>,
    code: &str,
) -> Result<Arc<QuizSession>, ClientError> {
    let quiz = api.fetch_quiz_by_code(code).await?;
    Ok(Arc::new(QuizSession::open(Arc::new(quiz), storage)))
}
