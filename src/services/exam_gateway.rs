use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::exam::{ExamDetails, UpstreamExam};
use crate::schemas::submission::SubmissionRequest;

#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("exam {0} not found")]
    NotFound(String),
    #[error("exam backend returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("exam backend unreachable: {0}")]
    Transport(String),
    #[error("exam backend returned an unreadable body: {0}")]
    InvalidBody(String),
}

/// Upstream exam backend: exam metadata and the submission endpoint.
#[async_trait]
pub(crate) trait ExamGateway: Send + Sync {
    async fn fetch_exam(&self, exam_id: &str) -> Result<ExamDetails, GatewayError>;

    async fn submit(&self, request: &SubmissionRequest) -> Result<(), GatewayError>;
}

pub(crate) type SharedExamGateway = Arc<dyn ExamGateway>;

#[derive(Debug, Clone)]
pub(crate) struct HttpExamGateway {
    client: Client,
    base_url: Url,
}

impl HttpExamGateway {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let exam_api = settings.exam_api();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(exam_api.connect_timeout_seconds))
            .timeout(Duration::from_secs(exam_api.timeout_seconds))
            .build()
            .context("Failed to build exam backend HTTP client")?;

        let base_url = Url::parse(&exam_api.base_url)
            .with_context(|| format!("Invalid exam backend URL {}", exam_api.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Exam backend URL {} cannot carry a path", exam_api.base_url);
        }

        Ok(Self { client, base_url })
    }

    /// Appends each segment percent-encoded, so an id can never leave `/exam/`.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn exam_url(&self, exam_id: &str) -> Result<Url, GatewayError> {
        if matches!(exam_id, "" | "." | "..") {
            return Err(GatewayError::NotFound(exam_id.to_string()));
        }
        self.endpoint(&["exam", exam_id])
    }

    fn submit_url(&self) -> Result<Url, GatewayError> {
        self.endpoint(&["exam", "submit"])
    }
}

#[async_trait]
impl ExamGateway for HttpExamGateway {
    async fn fetch_exam(&self, exam_id: &str) -> Result<ExamDetails, GatewayError> {
        let response = self
            .client
            .get(self.exam_url(exam_id)?)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(exam_id.to_string()));
        }
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        let exam = response
            .json::<UpstreamExam>()
            .await
            .map_err(|err| GatewayError::InvalidBody(err.to_string()))?;

        tracing::debug!(exam_id, questions = exam.questions.len(), "Fetched exam");
        Ok(exam.into())
    }

    async fn submit(&self, request: &SubmissionRequest) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.submit_url()?)
            .json(request)
            .send()
            .await
            .map_err(|err| GatewayError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, response).await);
        }

        tracing::info!(
            exam_id = %request.exam_id,
            student_id = %request.student_id,
            answers = request.answers.len(),
            "Submission accepted by exam backend"
        );
        Ok(())
    }
}

async fn status_error(status: StatusCode, response: reqwest::Response) -> GatewayError {
    let body = response.text().await.unwrap_or_default();
    let detail = extract_error_message(&body).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("unexpected status").to_string()
    });
    GatewayError::Status { status: status.as_u16(), detail }
}

fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => ["detail", "message", "title", "error"]
            .iter()
            .find_map(|field| value.get(field).and_then(|v| v.as_str()))
            .map(str::to_string),
        Err(_) => Some(trimmed.chars().take(200).collect()),
    }
}
