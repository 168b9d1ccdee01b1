use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::core::metrics::ATTEMPT_SUBMISSIONS_TOTAL;
use crate::core::time::format_offset;
use crate::schemas::exam::ExamDetails;
use crate::schemas::submission::{
    SubmissionRequest, SubmissionStatusResponse, SubmittedAnswer, UNANSWERED_SENTINEL,
};
use crate::services::answer_store::AnswerMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum FinalizeMode {
    ManualSubmit,
    AutoDeadline,
}

impl FinalizeMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ManualSubmit => "manual_submit",
            Self::AutoDeadline => "auto_deadline",
        }
    }
}

/// How questions without an answer appear in the submission payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnansweredPolicy {
    /// Every question is sent; blanks carry `selectedAnswer = -1`.
    Sentinel,
    /// Only answered questions are sent.
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SubmissionStatus {
    NotSubmitted,
    InFlight,
    Submitted,
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SubmitRejection {
    #[error("attempt was already submitted")]
    AlreadySubmitted,
    #[error("a submission is already in flight")]
    InFlight,
    #[error("automatic submission already fired")]
    AutoAlreadyFired,
}

/// Builds the wire payload in exam question order.
pub(crate) fn build_submission(
    exam: &ExamDetails,
    student_id: &str,
    answers: &AnswerMap,
    policy: UnansweredPolicy,
) -> SubmissionRequest {
    let answers = exam
        .questions
        .iter()
        .filter_map(|question| match (answers.get(&question.id), policy) {
            (Some(option), _) => Some(SubmittedAnswer {
                question_id: question.id.clone(),
                selected_answer: i32::from(*option),
            }),
            (None, UnansweredPolicy::Sentinel) => Some(SubmittedAnswer {
                question_id: question.id.clone(),
                selected_answer: UNANSWERED_SENTINEL,
            }),
            (None, UnansweredPolicy::Omit) => None,
        })
        .collect();

    SubmissionRequest { exam_id: exam.id.clone(), student_id: student_id.to_string(), answers }
}

/// Submit-once bookkeeping for a single attempt view.
#[derive(Debug)]
pub(crate) struct SubmissionTracker {
    status: SubmissionStatus,
    mode: Option<FinalizeMode>,
    submitted_at: Option<OffsetDateTime>,
    last_error: Option<String>,
    auto_fired: bool,
}

impl Default for SubmissionTracker {
    fn default() -> Self {
        Self {
            status: SubmissionStatus::NotSubmitted,
            mode: None,
            submitted_at: None,
            last_error: None,
            auto_fired: false,
        }
    }
}

impl SubmissionTracker {
    pub(crate) fn mode(&self) -> Option<FinalizeMode> {
        self.mode
    }

    pub(crate) fn submitted_at(&self) -> Option<OffsetDateTime> {
        self.submitted_at
    }

    pub(crate) fn is_submitted(&self) -> bool {
        self.status == SubmissionStatus::Submitted
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.status == SubmissionStatus::InFlight
    }

    /// Claims the single submission slot. The automatic path may claim it at
    /// most once per view, even when that attempt failed.
    pub(crate) fn begin(&mut self, mode: FinalizeMode) -> Result<(), SubmitRejection> {
        match self.status {
            SubmissionStatus::Submitted => return Err(SubmitRejection::AlreadySubmitted),
            SubmissionStatus::InFlight => return Err(SubmitRejection::InFlight),
            SubmissionStatus::NotSubmitted | SubmissionStatus::Failed => {}
        }

        if mode == FinalizeMode::AutoDeadline {
            if self.auto_fired {
                return Err(SubmitRejection::AutoAlreadyFired);
            }
            self.auto_fired = true;
        }

        self.status = SubmissionStatus::InFlight;
        self.mode = Some(mode);
        Ok(())
    }

    pub(crate) fn succeed(&mut self, submitted_at: OffsetDateTime) {
        self.status = SubmissionStatus::Submitted;
        self.submitted_at = Some(submitted_at);
        self.last_error = None;
        self.record_outcome("success");
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.status = SubmissionStatus::Failed;
        self.last_error = Some(error.into());
        self.record_outcome("failure");
    }

    pub(crate) fn to_response(&self) -> SubmissionStatusResponse {
        SubmissionStatusResponse {
            status: self.status,
            mode: self.mode,
            submitted_at: self.submitted_at.map(format_offset),
            last_error: self.last_error.clone(),
            retryable: self.status == SubmissionStatus::Failed,
        }
    }

    fn record_outcome(&self, outcome: &'static str) {
        let mode = self.mode.map(FinalizeMode::as_str).unwrap_or("unknown");
        metrics::counter!(ATTEMPT_SUBMISSIONS_TOTAL, "mode" => mode, "outcome" => outcome)
            .increment(1);
    }
}
