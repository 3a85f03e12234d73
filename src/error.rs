use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::models::ValidationIssue;
use crate::session::AttemptPhase;

/// Failures while locating a quiz. The student has to re-enter a code.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("`{0}` is not a valid quiz code")]
    InvalidCode(String),
    #[error("no quiz found for code `{0}`")]
    QuizNotFound(String),
    #[error("quiz has not started yet")]
    NotStarted { starts_at: Option<DateTime<Utc>> },
    #[error("quiz has ended")]
    Ended,
    #[error("quiz payload is invalid: {}", join_issues(.0))]
    Invalid(Vec<ValidationIssue>),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("attempt is {0:?}, not in progress")]
    NotInProgress(AttemptPhase),
    #[error("attempt has already been submitted")]
    Finalized,
    #[error("a submission for this attempt is already in flight")]
    AlreadyClaimed,
    #[error("{} question(s) still unanswered", .0.len())]
    Unanswered(Vec<String>),
    #[error("question `{0}` is not part of this quiz")]
    UnknownQuestion(String),
    #[error("answer does not fit question `{0}`")]
    InvalidAnswer(String),
    #[error("index {index} is out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("server rejected request ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected response body: {0}")]
    Decode(#[source] serde_json::Error),
}

impl ClientError {
    /// True when the attempt is still resumable and a retry makes sense.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(_) => true,
            ClientError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            ClientError::Decode(_) | ClientError::Load(_) | ClientError::Session(_) => false,
        }
    }
}

/// Error body returned by the backend, either `{ "message": .. }` or the
/// nested `{ "error": { "code": .., "message": .. } }` form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ApiErrorPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorPayload {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub fn code(&self) -> Option<String> {
        self.error.as_ref().and_then(|e| e.code.clone())
    }

    pub fn message_or(&self, fallback: &str) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.message.clone())
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}
