use chrono::Utc;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ApiErrorBody, ClientError, LoadError};
use crate::models::{
    validate_quiz, FlagRequest, LeaderboardEntry, Quiz, SubmissionPayload, SubmissionResponse,
    SubmissionResult,
};

static QUIZ_CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z0-9-]{3,32}$").unwrap_or_else(|e| panic!("quiz code pattern: {e}"))
});

/// Trims and upper-cases a student-entered code, rejecting anything that
/// could not be a quiz code before a request goes out.
pub fn normalize_quiz_code(raw: &str) -> Result<String, LoadError> {
    let code = raw.trim().to_uppercase();
    if QUIZ_CODE.is_match(&code) {
        Ok(code)
    } else {
        Err(LoadError::InvalidCode(raw.trim().to_string()))
    }
}

pub trait QuizApi: Send + Sync {
    fn fetch_quiz_by_code(&self, code: &str) -> BoxFuture<'static, Result<Quiz, ClientError>>;

    fn submit(
        &self,
        payload: SubmissionPayload,
    ) -> BoxFuture<'static, Result<SubmissionResult, ClientError>>;

    fn leaderboard(
        &self,
        quiz_id: &str,
    ) -> BoxFuture<'static, Result<Vec<LeaderboardEntry>, ClientError>>;

    fn flag_question(&self, request: FlagRequest) -> BoxFuture<'static, Result<(), ClientError>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuizEnvelope {
    Wrapped { quiz: Quiz },
    Bare(Quiz),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LeaderboardEnvelope {
    Wrapped { leaderboard: Vec<LeaderboardEntry> },
    Bare(Vec<LeaderboardEntry>),
}

#[derive(Clone)]
pub struct HttpQuizApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpQuizApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(path);
        debug!(%method, %url, %request_id, "api request");
        let builder = self
            .client
            .request(method, url)
            .header("x-request-id", request_id);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

async fn api_error(resp: Response) -> ClientError {
    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    let body = ApiErrorBody::parse(&raw);
    ClientError::Api {
        status: status.as_u16(),
        code: body.code(),
        message: body.message_or(status.canonical_reason().unwrap_or("request failed")),
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Decode)
}

/// Maps the backend's load-time refusals onto [`LoadError`].
fn classify_load_error(code: &str, err: ClientError) -> ClientError {
    match err {
        ClientError::Api { status: 404, .. } => LoadError::QuizNotFound(code.to_string()).into(),
        ClientError::Api { status: 400 | 403, ref message, .. } => {
            let lowered = message.to_lowercase();
            if lowered.contains("not started") || lowered.contains("not yet") {
                LoadError::NotStarted { starts_at: None }.into()
            } else if lowered.contains("ended") || lowered.contains("expired") || lowered.contains("closed") {
                LoadError::Ended.into()
            } else {
                err
            }
        }
        other => other,
    }
}

impl QuizApi for HttpQuizApi {
    fn fetch_quiz_by_code(&self, code: &str) -> BoxFuture<'static, Result<Quiz, ClientError>> {
        let normalized = normalize_quiz_code(code);
        let this = self.clone();
        Box::pin(async move {
            let code = normalized?;
            let resp = this.request(Method::GET, &format!("quiz/code/{code}")).send().await?;
            let quiz = match read_json::<QuizEnvelope>(resp).await {
                Ok(QuizEnvelope::Wrapped { quiz }) | Ok(QuizEnvelope::Bare(quiz)) => quiz,
                Err(err) => return Err(classify_load_error(&code, err)),
            };
            quiz.check_availability(Utc::now())?;
            validate_quiz(&quiz).map_err(LoadError::Invalid)?;
            Ok(quiz)
        })
    }

    fn submit(
        &self,
        payload: SubmissionPayload,
    ) -> BoxFuture<'static, Result<SubmissionResult, ClientError>> {
        let this = self.clone();
        Box::pin(async move {
            let resp = this
                .request(Method::POST, "submission")
                .json(&payload)
                .send()
                .await?;
            let status = resp.status();
            match read_json::<SubmissionResponse>(resp).await {
                Ok(body) => Ok(body.result),
                Err(err) => {
                    if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
                        warn!("submission for quiz {} rejected: {}", payload.quiz_id, err);
                    }
                    Err(err)
                }
            }
        })
    }

    fn leaderboard(
        &self,
        quiz_id: &str,
    ) -> BoxFuture<'static, Result<Vec<LeaderboardEntry>, ClientError>> {
        let this = self.clone();
        let path = format!("quiz/{quiz_id}/leaderboard");
        Box::pin(async move {
            let resp = this.request(Method::GET, &path).send().await?;
            Ok(match read_json::<LeaderboardEnvelope>(resp).await? {
                LeaderboardEnvelope::Wrapped { leaderboard } => leaderboard,
                LeaderboardEnvelope::Bare(entries) => entries,
            })
        })
    }

    fn flag_question(&self, request: FlagRequest) -> BoxFuture<'static, Result<(), ClientError>> {
        let this = self.clone();
        Box::pin(async move {
            let resp = this.request(Method::POST, "flag").json(&request).send().await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(api_error(resp).await)
            }
        })
    }
}
