use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::answer_store::AnswerError;
use crate::services::attempt_registry::AttemptError;
use crate::services::exam_gateway::GatewayError;
use crate::services::submission_finalize::SubmitRejection;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    UnprocessableEntity(String),
    BadGateway(String),
    ServiceUnavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                message
            }
            ApiError::BadGateway(message) => {
                tracing::warn!(error = %message, "Upstream request failed");
                message
            }
            ApiError::BadRequest(message)
            | ApiError::NotFound(message)
            | ApiError::Conflict(message)
            | ApiError::UnprocessableEntity(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}

impl From<AttemptError> for ApiError {
    fn from(err: AttemptError) -> Self {
        match err {
            AttemptError::Exam(GatewayError::NotFound(_)) => {
                ApiError::NotFound("Exam not found".to_string())
            }
            AttemptError::Exam(err) => {
                tracing::warn!(error = %err, "Failed to load exam from backend");
                ApiError::BadGateway("Failed to load exam. Please try again.".to_string())
            }
            AttemptError::NoQuestions(_) => {
                ApiError::UnprocessableEntity("Exam has no questions".to_string())
            }
            AttemptError::NotStarted => {
                ApiError::BadRequest("Exam has not started yet".to_string())
            }
            AttemptError::Ended => ApiError::BadRequest("Exam has ended".to_string()),
            AttemptError::NotOpen => ApiError::NotFound("Attempt is not open".to_string()),
            AttemptError::Expired => ApiError::Conflict("Time is up for this attempt".to_string()),
            AttemptError::Answer(AnswerError::Store(err)) | AttemptError::Store(err) => {
                ApiError::ServiceUnavailable(format!("Attempt state unavailable: {err}"))
            }
            AttemptError::Answer(err) => ApiError::BadRequest(err.to_string()),
            AttemptError::Rejected(SubmitRejection::AlreadySubmitted) => {
                ApiError::Conflict("Attempt was already submitted".to_string())
            }
            AttemptError::Rejected(_) => {
                ApiError::Conflict("Submission is already in progress".to_string())
            }
            AttemptError::Submission(err) => {
                tracing::warn!(error = %err, "Submission rejected by exam backend");
                ApiError::BadGateway("Failed to submit exam. Please try again.".to_string())
            }
            AttemptError::Timing(err) => ApiError::UnprocessableEntity(err.to_string()),
        }
    }
}
