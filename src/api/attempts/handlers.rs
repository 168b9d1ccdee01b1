use axum::extract::{Path, State};
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::repositories::attempt_state::AttemptKey;
use crate::schemas::attempt::{
    AnswerRecordedResponse, AttemptClosedResponse, AttemptSnapshotResponse, RecordAnswerRequest,
    ReviewToggledResponse,
};
use crate::schemas::exam::ExamLobbyResponse;
use crate::schemas::submission::{SubmissionOutcomeResponse, SubmitAttemptRequest};
use crate::services::submission_finalize::FinalizeMode;

pub(super) async fn lobby(
    Path((student_id, exam_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ExamLobbyResponse>, ApiError> {
    let lobby = state.attempts().lobby(&exam_id, &student_id).await?;
    Ok(Json(lobby))
}

pub(super) async fn open_attempt(
    Path((student_id, exam_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<AttemptSnapshotResponse>, ApiError> {
    let session = state.attempts().open(&exam_id, &student_id).await?;
    Ok(Json(session.snapshot().await))
}

pub(super) async fn get_attempt(
    Path((student_id, exam_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<AttemptSnapshotResponse>, ApiError> {
    let session = state.attempts().require(&AttemptKey::new(exam_id, student_id))?;
    Ok(Json(session.snapshot().await))
}

pub(super) async fn close_attempt(
    Path((student_id, exam_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Json<AttemptClosedResponse> {
    let closed = state.attempts().close(&AttemptKey::new(exam_id, student_id));
    Json(AttemptClosedResponse { closed })
}

pub(super) async fn record_answer(
    Path((student_id, exam_id, question_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
    Json(payload): Json<RecordAnswerRequest>,
) -> Result<Json<AnswerRecordedResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = state.attempts().require(&AttemptKey::new(exam_id, student_id))?;
    let (option_index, stats) = session.record_answer(&question_id, payload.option_index).await?;

    Ok(Json(AnswerRecordedResponse { question_id, option_index, stats }))
}

pub(super) async fn toggle_review(
    Path((student_id, exam_id, question_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<ReviewToggledResponse>, ApiError> {
    let session = state.attempts().require(&AttemptKey::new(exam_id, student_id))?;
    let (marked, stats) = session.toggle_review(&question_id).await?;

    Ok(Json(ReviewToggledResponse { question_id, marked, stats }))
}

pub(super) async fn submit_attempt(
    Path((student_id, exam_id)): Path<(String, String)>,
    State(state): State<AppState>,
    payload: Option<Json<SubmitAttemptRequest>>,
) -> Result<Json<SubmissionOutcomeResponse>, ApiError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    if !payload.confirmed {
        return Err(ApiError::BadRequest("Submission must be confirmed".to_string()));
    }

    let session = state.attempts().require(&AttemptKey::new(exam_id, student_id))?;
    let outcome = session.submit(FinalizeMode::ManualSubmit).await?;

    tracing::info!(
        attempt_id = %session.id(),
        already_submitted = outcome.already_submitted,
        answered = outcome.answered,
        unanswered = outcome.unanswered,
        "Manual submission finished"
    );
    Ok(Json(outcome))
}
