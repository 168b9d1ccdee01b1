use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::schemas::exam::Question;
use crate::schemas::submission::SubmissionStatusResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AttemptPhase {
    Running,
    Expired,
    Submitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct AnswerStats {
    pub(crate) answered: usize,
    pub(crate) unanswered: usize,
    pub(crate) marked: usize,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptSnapshotResponse {
    pub(crate) attempt_id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) title: String,
    pub(crate) questions: Vec<Question>,
    pub(crate) started_at: String,
    pub(crate) deadline: String,
    pub(crate) remaining_seconds: u64,
    pub(crate) time_display: String,
    pub(crate) low_time_warning: bool,
    pub(crate) phase: AttemptPhase,
    pub(crate) answers: BTreeMap<String, u8>,
    pub(crate) marked_for_review: Vec<String>,
    pub(crate) stats: AnswerStats,
    pub(crate) submission: SubmissionStatusResponse,
    pub(crate) leave_warning: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct RecordAnswerRequest {
    #[validate(range(min = 0, max = 3, message = "option_index must be between 0 and 3"))]
    pub(crate) option_index: i64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerRecordedResponse {
    pub(crate) question_id: String,
    pub(crate) option_index: u8,
    pub(crate) stats: AnswerStats,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewToggledResponse {
    pub(crate) question_id: String,
    pub(crate) marked: bool,
    pub(crate) stats: AnswerStats,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptClosedResponse {
    pub(crate) closed: bool,
}
