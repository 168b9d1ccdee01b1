use serde::{Deserialize, Serialize};

use crate::services::submission_finalize::{FinalizeMode, SubmissionStatus};

/// `selectedAnswer` value for a question the student left blank.
pub(crate) const UNANSWERED_SENTINEL: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    pub(crate) selected_answer: i32,
}

/// Body of `POST /exam/submit` on the exam backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionRequest {
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) answers: Vec<SubmittedAnswer>,
}

impl SubmissionRequest {
    pub(crate) fn unanswered_count(&self) -> usize {
        self.answers.iter().filter(|answer| answer.selected_answer == UNANSWERED_SENTINEL).count()
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SubmitAttemptRequest {
    #[serde(default)]
    pub(crate) confirmed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionStatusResponse {
    pub(crate) status: SubmissionStatus,
    pub(crate) mode: Option<FinalizeMode>,
    pub(crate) submitted_at: Option<String>,
    pub(crate) last_error: Option<String>,
    pub(crate) retryable: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmissionOutcomeResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) mode: FinalizeMode,
    pub(crate) submitted_at: String,
    pub(crate) answered: usize,
    pub(crate) unanswered: usize,
    pub(crate) already_submitted: bool,
    pub(crate) message: String,
}
