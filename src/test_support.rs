use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use time::macros::datetime;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, redis::RedisHandle, state::AppState, time::ManualClock};
use crate::repositories::attempt_state::{AttemptStateStore, MemoryStateStore, StoreError};
use crate::schemas::exam::{ExamDetails, Question};
use crate::schemas::submission::SubmissionRequest;
use crate::services::exam_gateway::{ExamGateway, GatewayError};

const TEST_REDIS_DB: &str = "1";

/// Instant the test clock starts at; inside the window of [`sample_exam`].
pub(crate) const TEST_NOW: OffsetDateTime = datetime!(2025-06-01 10:00 UTC);

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    pub(crate) gateway: Arc<FakeExamGateway>,
    pub(crate) store: Arc<MemoryStateStore>,
    pub(crate) clock: ManualClock,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    dotenvy::dotenv().ok();

    std::env::set_var("PICRETE_ENV", "test");
    std::env::set_var("PICRETE_STRICT_CONFIG", "0");
    std::env::set_var("REDIS_HOST", "127.0.0.1");
    std::env::set_var("REDIS_PORT", "6379");
    std::env::set_var("REDIS_DB", TEST_REDIS_DB);
    std::env::remove_var("REDIS_PASSWORD");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::remove_var("API_V1_STR");
    std::env::remove_var("BACKEND_CORS_ORIGINS");
    std::env::remove_var("ATTEMPT_STATE_BACKEND");
    std::env::remove_var("ATTEMPT_STATE_TTL_SECONDS");
    std::env::remove_var("EXAM_API_BASE_URL");
    std::env::remove_var("EXAM_API_TIMEOUT_SECONDS");
    std::env::remove_var("EXAM_API_CONNECT_TIMEOUT_SECONDS");
    std::env::remove_var("PICRETE_UNANSWERED_POLICY");
    std::env::remove_var("LOW_TIME_WARNING_SECONDS");
}

pub(crate) async fn setup_test_context(exam: ExamDetails) -> TestContext {
    let guard = env_lock().await;
    set_test_env();
    let settings = Settings::load().expect("settings");
    build_context(settings, exam, guard)
}

/// Same as [`setup_test_context`] but lets the caller adjust the environment
/// before settings are loaded. The env lock is held throughout.
pub(crate) async fn setup_test_context_with_env(
    exam: ExamDetails,
    configure: impl FnOnce(),
) -> TestContext {
    let guard = env_lock().await;
    set_test_env();
    configure();
    let settings = Settings::load().expect("settings");
    build_context(settings, exam, guard)
}

fn build_context(settings: Settings, exam: ExamDetails, guard: OwnedMutexGuard<()>) -> TestContext {
    let gateway = Arc::new(FakeExamGateway::with_exam(exam));
    let store = Arc::new(MemoryStateStore::default());
    let clock = ManualClock::new(TEST_NOW);

    let redis = RedisHandle::new(settings.redis().redis_url());
    let state = AppState::new(
        settings,
        redis,
        store.clone(),
        gateway.clone(),
        Arc::new(clock.clone()),
    );
    let app = api::router::router(state.clone());

    TestContext { state, app, gateway, store, clock, _guard: guard }
}

/// Exam with questions `q1..=qN`, open 09:00-12:00 UTC on 2025-06-01, 30 minutes long.
pub(crate) fn sample_exam(exam_id: &str, questions: usize) -> ExamDetails {
    ExamDetails {
        id: exam_id.to_string(),
        title: format!("Exam {exam_id}"),
        description: Some("Practice exam".to_string()),
        duration_minutes: 30,
        scheduled_start: datetime!(2025-06-01 09:00 UTC),
        scheduled_end: datetime!(2025-06-01 12:00 UTC),
        questions: (1..=questions)
            .map(|n| Question {
                id: format!("q{n}"),
                text: format!("Question {n}"),
                options: [
                    format!("{n}-A"),
                    format!("{n}-B"),
                    format!("{n}-C"),
                    format!("{n}-D"),
                ],
            })
            .collect(),
    }
}

/// Scripted exam backend. Records accepted submissions only.
#[derive(Default)]
pub(crate) struct FakeExamGateway {
    exams: StdMutex<HashMap<String, ExamDetails>>,
    submissions: StdMutex<Vec<SubmissionRequest>>,
    failures_left: AtomicUsize,
    submit_delay: StdMutex<Option<std::time::Duration>>,
    submit_calls: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeExamGateway {
    pub(crate) fn with_exam(exam: ExamDetails) -> Self {
        let gateway = Self::default();
        gateway.add_exam(exam);
        gateway
    }

    pub(crate) fn add_exam(&self, exam: ExamDetails) {
        self.exams.lock().unwrap().insert(exam.id.clone(), exam);
    }

    pub(crate) fn fail_next_submissions(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Every later `submit` waits this long before answering.
    pub(crate) fn delay_submissions(&self, delay: std::time::Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn submissions(&self) -> Vec<SubmissionRequest> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExamGateway for FakeExamGateway {
    async fn fetch_exam(&self, exam_id: &str) -> Result<ExamDetails, GatewayError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.exams
            .lock()
            .unwrap()
            .get(exam_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(exam_id.to_string()))
    }

    async fn submit(&self, request: &SubmissionRequest) -> Result<(), GatewayError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GatewayError::Status { status: 503, detail: "backend down".to_string() });
        }

        self.submissions.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStateStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("write rejected".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AttemptStateStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_if_absent(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.remove(key).await
    }

    fn backend(&self) -> &'static str {
        "flaky"
    }
}

/// A Redis URL whose port refuses connections.
pub(crate) async fn unreachable_redis_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("redis://127.0.0.1:{port}/{TEST_REDIS_DB}")
}

pub(crate) fn json_request(
    method: Method,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
