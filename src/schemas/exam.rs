use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub(crate) const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExamStatus {
    Upcoming,
    Ongoing,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) text: String,
    pub(crate) options: [String; OPTIONS_PER_QUESTION],
}

#[derive(Debug, Clone)]
pub(crate) struct ExamDetails {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i64,
    pub(crate) scheduled_start: OffsetDateTime,
    pub(crate) scheduled_end: OffsetDateTime,
    pub(crate) questions: Vec<Question>,
}

impl ExamDetails {
    pub(crate) fn question_count(&self) -> usize {
        self.questions.len()
    }
}

/// Exam document as served by the exam backend.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpstreamExam {
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) scheduled_start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) scheduled_end_time: OffsetDateTime,
    #[serde(default)]
    pub(crate) questions: Vec<UpstreamQuestion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpstreamQuestion {
    pub(crate) id: String,
    pub(crate) question_text: String,
    pub(crate) option_a: String,
    pub(crate) option_b: String,
    pub(crate) option_c: String,
    pub(crate) option_d: String,
}

impl From<UpstreamExam> for ExamDetails {
    fn from(exam: UpstreamExam) -> Self {
        Self {
            id: exam.id,
            title: exam.title,
            description: exam.description,
            duration_minutes: exam.duration_minutes,
            scheduled_start: exam.scheduled_start_time,
            scheduled_end: exam.scheduled_end_time,
            questions: exam
                .questions
                .into_iter()
                .map(|question| Question {
                    id: question.id,
                    text: question.question_text,
                    options: [
                        question.option_a,
                        question.option_b,
                        question.option_c,
                        question.option_d,
                    ],
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamLobbyResponse {
    pub(crate) exam_id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i64,
    pub(crate) scheduled_start_time: String,
    pub(crate) scheduled_end_time: String,
    pub(crate) question_count: usize,
    pub(crate) status: ExamStatus,
    pub(crate) can_start: bool,
    pub(crate) attempt_in_progress: bool,
}
