use std::sync::Arc;
use tracing::{info, warn};

use crate::api::QuizApi;
use crate::error::ClientError;
use crate::models::SubmissionResult;
use crate::session::{QuizSession, SubmitTrigger};

/// The single path to the submit endpoint, shared by the countdown and the
/// student.
#[derive(Clone)]
pub struct SubmissionDispatcher {
    api: Arc<dyn QuizApi>,
}

impl SubmissionDispatcher {
    pub fn new(api: Arc<dyn QuizApi>) -> Self {
        Self { api }
    }

    pub async fn submit(
        &self,
        session: &QuizSession,
        trigger: SubmitTrigger,
    ) -> Result<SubmissionResult, ClientError> {
        let payload = session.claim_submission(trigger)?;
        let quiz_id = payload.quiz_id.clone();
        match self.api.submit(payload).await {
            Ok(result) => {
                session.complete(result.clone())?;
                info!(
                    %quiz_id,
                    score = result.score,
                    total = result.total_questions,
                    practice = result.is_practice,
                    "attempt submitted"
                );
                Ok(result)
            }
            Err(err) => {
                warn!("submission for quiz {} failed, attempt kept: {}", quiz_id, err);
                if let Err(release_err) = session.release() {
                    warn!("could not reopen attempt for quiz {}: {}", quiz_id, release_err);
                }
                Err(err)
            }
        }
    }
}
