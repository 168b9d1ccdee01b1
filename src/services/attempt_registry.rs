//! Open attempt views and the resources they hold.
//!
//! A view owns a [`Countdown`] and a [`LeaveGuard`] from `open` until `close`
//! or a successful submission. The countdown's expiry callback only holds a
//! weak reference to its view and does nothing once the view is closed.
//!
//! Submissions are also tracked per attempt, outside any view: a view closed
//! mid-submission cannot be replaced until that submission resolves, and the
//! automatic submission fires at most once per attempt.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::metrics::ATTEMPT_OPEN_VIEWS;
use crate::core::time::{format_countdown, format_offset, Clock};
use crate::repositories::attempt_state::{AttemptKey, SharedStateStore, StoreError};
use crate::schemas::attempt::{AnswerStats, AttemptPhase, AttemptSnapshotResponse};
use crate::schemas::exam::{ExamDetails, ExamLobbyResponse, ExamStatus};
use crate::schemas::submission::SubmissionOutcomeResponse;
use crate::services::answer_store::{AnswerError, LocalAnswerStore};
use crate::services::attempt_timing::{
    compute_effective_deadline, derive_exam_status, remaining_seconds, TimingError,
};
use crate::services::countdown::Countdown;
use crate::services::exam_gateway::{GatewayError, SharedExamGateway};
use crate::services::submission_finalize::{
    build_submission, FinalizeMode, SubmissionTracker, SubmitRejection, UnansweredPolicy,
};

#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error("failed to load exam: {0}")]
    Exam(#[source] GatewayError),
    #[error("exam {0} has no questions")]
    NoQuestions(String),
    #[error("exam has not started yet")]
    NotStarted,
    #[error("exam has ended")]
    Ended,
    #[error("attempt is not open")]
    NotOpen,
    #[error("time is up for this attempt")]
    Expired,
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error(transparent)]
    Rejected(#[from] SubmitRejection),
    #[error("submission failed: {0}")]
    Submission(#[source] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Timing(#[from] TimingError),
}

/// Armed while a view is open and unsubmitted; leaving the page should warn.
#[derive(Debug)]
pub(crate) struct LeaveGuard {
    active: Arc<AtomicUsize>,
}

impl LeaveGuard {
    fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self { active: active.clone() }
    }
}

impl Drop for LeaveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct AttemptResources {
    countdown: Countdown,
    _leave_guard: LeaveGuard,
}

impl AttemptResources {
    fn new(countdown: Countdown, leave_guard: LeaveGuard) -> Self {
        metrics::gauge!(ATTEMPT_OPEN_VIEWS).increment(1.0);
        Self { countdown, _leave_guard: leave_guard }
    }
}

impl Drop for AttemptResources {
    fn drop(&mut self) {
        metrics::gauge!(ATTEMPT_OPEN_VIEWS).decrement(1.0);
    }
}

#[derive(Debug, Default)]
struct SubmissionLedger {
    in_flight: HashSet<AttemptKey>,
    auto_fired: HashSet<AttemptKey>,
}

type SharedLedger = Arc<StdMutex<SubmissionLedger>>;

fn lock_ledger(ledger: &SharedLedger) -> std::sync::MutexGuard<'_, SubmissionLedger> {
    ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks an attempt's submission as in flight until dropped.
struct SubmissionClaim {
    ledger: SharedLedger,
    key: AttemptKey,
}

impl SubmissionClaim {
    fn acquire(
        ledger: &SharedLedger,
        key: &AttemptKey,
        mode: FinalizeMode,
    ) -> Result<Self, SubmitRejection> {
        let mut entries = lock_ledger(ledger);
        if entries.in_flight.contains(key) {
            return Err(SubmitRejection::InFlight);
        }
        if mode == FinalizeMode::AutoDeadline && !entries.auto_fired.insert(key.clone()) {
            return Err(SubmitRejection::AutoAlreadyFired);
        }
        entries.in_flight.insert(key.clone());
        Ok(Self { ledger: ledger.clone(), key: key.clone() })
    }

    /// The attempt is finished; a later attempt under the same key starts clean.
    fn complete(&self) {
        lock_ledger(&self.ledger).auto_fired.remove(&self.key);
    }
}

impl Drop for SubmissionClaim {
    fn drop(&mut self) {
        lock_ledger(&self.ledger).in_flight.remove(&self.key);
    }
}

/// Collaborators shared by the registry and every view it opens.
struct AttemptContext {
    store: SharedStateStore,
    gateway: SharedExamGateway,
    clock: Arc<dyn Clock>,
    policy: UnansweredPolicy,
    low_time_threshold: u64,
    leave_guards: Arc<AtomicUsize>,
    submissions: SharedLedger,
}

impl AttemptContext {
    fn submission_in_flight(&self, key: &AttemptKey) -> bool {
        lock_ledger(&self.submissions).in_flight.contains(key)
    }
}

struct SessionInner {
    answers: LocalAnswerStore,
    tracker: SubmissionTracker,
}

pub(crate) struct AttemptSession {
    id: Uuid,
    key: AttemptKey,
    exam: Arc<ExamDetails>,
    started_at: OffsetDateTime,
    deadline: OffsetDateTime,
    context: Arc<AttemptContext>,
    inner: Mutex<SessionInner>,
    resources: StdMutex<Option<AttemptResources>>,
    closed: AtomicBool,
}

impl AttemptSession {
    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn is_submitted(&self) -> bool {
        self.inner.lock().await.tracker.is_submitted()
    }

    fn arm(self: &Arc<Self>, remaining: u64) {
        let weak = Arc::downgrade(self);
        let countdown = Countdown::start(remaining, move || on_countdown_expired(weak));
        let leave_guard = LeaveGuard::acquire(&self.context.leave_guards);

        let mut resources = self.resources.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *resources = Some(AttemptResources::new(countdown, leave_guard));
    }

    /// Drops the countdown and the leave guard. Safe to call repeatedly.
    fn release(&self) {
        let released = self
            .resources
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(resources) = released {
            resources.countdown.cancel();
            tracing::debug!(
                attempt_id = %self.id,
                attempt = %self.key,
                "Attempt resources released"
            );
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.release();
    }

    /// Remaining seconds as reported by the live countdown, or from the clock
    /// once the countdown has been released.
    fn remaining(&self) -> (u64, bool) {
        let resources = self.resources.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match resources.as_ref() {
            Some(resources) => {
                let state = resources.countdown.state();
                (state.remaining_seconds(), true)
            }
            None => (remaining_seconds(self.deadline, self.context.clock.now()), false),
        }
    }

    fn is_expired(&self) -> bool {
        self.remaining().0 == 0
    }

    pub(crate) async fn snapshot(&self) -> AttemptSnapshotResponse {
        let inner = self.inner.lock().await;
        let (remaining, armed) = self.remaining();
        let submitted = inner.tracker.is_submitted();
        let phase = if submitted {
            AttemptPhase::Submitted
        } else if remaining == 0 {
            AttemptPhase::Expired
        } else {
            AttemptPhase::Running
        };

        let progress = inner.answers.progress();
        AttemptSnapshotResponse {
            attempt_id: self.id.to_string(),
            exam_id: self.key.exam_id.clone(),
            student_id: self.key.student_id.clone(),
            title: self.exam.title.clone(),
            questions: self.exam.questions.clone(),
            started_at: format_offset(self.started_at),
            deadline: format_offset(self.deadline),
            remaining_seconds: remaining,
            time_display: format_countdown(remaining),
            low_time_warning: phase == AttemptPhase::Running
                && remaining < self.context.low_time_threshold,
            phase,
            answers: progress.answers.clone(),
            marked_for_review: progress.review.iter().cloned().collect(),
            stats: inner.answers.stats(),
            submission: inner.tracker.to_response(),
            leave_warning: armed && !submitted,
        }
    }

    pub(crate) async fn record_answer(
        &self,
        question_id: &str,
        option_index: i64,
    ) -> Result<(u8, AnswerStats), AttemptError> {
        let mut inner = self.inner.lock().await;
        self.ensure_editable(&inner)?;

        let option = inner.answers.record_answer(question_id, option_index).await?;
        tracing::debug!(attempt_id = %self.id, question_id, option, "Answer recorded");
        Ok((option, inner.answers.stats()))
    }

    pub(crate) async fn toggle_review(
        &self,
        question_id: &str,
    ) -> Result<(bool, AnswerStats), AttemptError> {
        let mut inner = self.inner.lock().await;
        self.ensure_editable(&inner)?;

        let marked = inner.answers.toggle_review(question_id).await?;
        Ok((marked, inner.answers.stats()))
    }

    fn ensure_editable(&self, inner: &SessionInner) -> Result<(), AttemptError> {
        if self.is_closed() {
            return Err(AttemptError::NotOpen);
        }
        if inner.tracker.is_submitted() {
            return Err(SubmitRejection::AlreadySubmitted.into());
        }
        if inner.tracker.is_in_flight() {
            return Err(SubmitRejection::InFlight.into());
        }
        if self.is_expired() {
            return Err(AttemptError::Expired);
        }
        Ok(())
    }

    /// Finalizes the attempt. The gateway is called without holding the view
    /// lock; the view's [`SubmissionTracker`] slot and the attempt-wide
    /// [`SubmissionClaim`] keep concurrent callers out.
    pub(crate) async fn submit(
        &self,
        mode: FinalizeMode,
    ) -> Result<SubmissionOutcomeResponse, AttemptError> {
        let (claim, request) = {
            let mut inner = self.inner.lock().await;
            if inner.tracker.is_submitted() {
                return Ok(self.outcome(&inner, true));
            }
            if self.is_closed() {
                return Err(AttemptError::NotOpen);
            }
            let claim = SubmissionClaim::acquire(&self.context.submissions, &self.key, mode)?;
            inner.tracker.begin(mode)?;
            let request = build_submission(
                &self.exam,
                &self.key.student_id,
                &inner.answers.progress().answers,
                self.context.policy,
            );
            (claim, request)
        };

        tracing::info!(
            attempt_id = %self.id,
            exam_id = %self.key.exam_id,
            student_id = %self.key.student_id,
            mode = mode.as_str(),
            answers = request.answers.len(),
            unanswered = request.unanswered_count(),
            "Submitting attempt"
        );
        let result = self.context.gateway.submit(&request).await;

        let mut inner = self.inner.lock().await;
        match result {
            Ok(()) => {
                inner.tracker.succeed(self.context.clock.now());
                claim.complete();
                if let Err(err) = inner.answers.clear().await {
                    tracing::error!(
                        attempt_id = %self.id,
                        error = %err,
                        "Submitted attempt left persisted state behind"
                    );
                }
                let outcome = self.outcome(&inner, false);
                drop(inner);
                drop(claim);
                self.release();
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(
                    attempt_id = %self.id,
                    mode = mode.as_str(),
                    error = %err,
                    "Submission failed; local state kept for retry"
                );
                inner.tracker.fail(err.to_string());
                drop(claim);
                Err(AttemptError::Submission(err))
            }
        }
    }

    fn outcome(&self, inner: &SessionInner, already_submitted: bool) -> SubmissionOutcomeResponse {
        let stats = inner.answers.stats();
        let mode = inner.tracker.mode().unwrap_or(FinalizeMode::ManualSubmit);
        SubmissionOutcomeResponse {
            attempt_id: self.id.to_string(),
            exam_id: self.key.exam_id.clone(),
            student_id: self.key.student_id.clone(),
            mode,
            submitted_at: inner
                .tracker
                .submitted_at()
                .map(format_offset)
                .unwrap_or_default(),
            answered: stats.answered,
            unanswered: stats.unanswered,
            already_submitted,
            message: match mode {
                FinalizeMode::ManualSubmit => "Exam submitted successfully".to_string(),
                FinalizeMode::AutoDeadline => {
                    "Time is up. Your answers were submitted automatically".to_string()
                }
            },
        }
    }
}

fn on_countdown_expired(weak: Weak<AttemptSession>) {
    let Some(session) = weak.upgrade() else {
        return;
    };
    if session.is_closed() {
        return;
    }

    tracing::info!(attempt_id = %session.id, attempt = %session.key, "Attempt time is up");
    tokio::spawn(async move {
        match session.submit(FinalizeMode::AutoDeadline).await {
            Ok(_) => {}
            Err(AttemptError::Rejected(reason)) => {
                tracing::debug!(
                    attempt_id = %session.id,
                    reason = %reason,
                    "Automatic submission skipped"
                );
            }
            Err(err) => {
                tracing::warn!(
                    attempt_id = %session.id,
                    error = %err,
                    "Automatic submission failed"
                );
            }
        }
    });
}

pub(crate) struct AttemptRegistry {
    sessions: StdMutex<HashMap<AttemptKey, Arc<AttemptSession>>>,
    context: Arc<AttemptContext>,
}

impl AttemptRegistry {
    pub(crate) fn new(
        store: SharedStateStore,
        gateway: SharedExamGateway,
        clock: Arc<dyn Clock>,
        policy: UnansweredPolicy,
        low_time_threshold: u64,
    ) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            context: Arc::new(AttemptContext {
                store,
                gateway,
                clock,
                policy,
                low_time_threshold,
                leave_guards: Arc::new(AtomicUsize::new(0)),
                submissions: SharedLedger::default(),
            }),
        }
    }

    pub(crate) fn store_backend(&self) -> &'static str {
        self.context.store.backend()
    }

    pub(crate) async fn lobby(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<ExamLobbyResponse, AttemptError> {
        let exam = self.context.gateway.fetch_exam(exam_id).await.map_err(AttemptError::Exam)?;
        let key = AttemptKey::new(exam_id, student_id);
        let status =
            derive_exam_status(exam.scheduled_start, exam.scheduled_end, self.context.clock.now());

        let open_view = match self.get(&key) {
            Some(session) => !session.is_submitted().await,
            None => false,
        };
        let attempt_in_progress =
            open_view || self.context.store.get(&key.start_key()).await?.is_some();

        Ok(ExamLobbyResponse {
            exam_id: exam.id.clone(),
            title: exam.title.clone(),
            description: exam.description.clone(),
            duration_minutes: exam.duration_minutes,
            scheduled_start_time: format_offset(exam.scheduled_start),
            scheduled_end_time: format_offset(exam.scheduled_end),
            question_count: exam.question_count(),
            status,
            can_start: status == ExamStatus::Ongoing && exam.question_count() > 0,
            attempt_in_progress,
        })
    }

    /// Opens the attempt view, or returns the one already open and unsubmitted.
    /// Refused while a submission for the attempt is still in flight, even one
    /// started by a view that has since been closed.
    pub(crate) async fn open(
        &self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Arc<AttemptSession>, AttemptError> {
        let key = AttemptKey::new(exam_id, student_id);
        if let Some(existing) = self.get(&key) {
            if !existing.is_submitted().await {
                return Ok(existing);
            }
        }
        if self.context.submission_in_flight(&key) {
            return Err(SubmitRejection::InFlight.into());
        }

        let exam = self.context.gateway.fetch_exam(exam_id).await.map_err(AttemptError::Exam)?;
        if exam.questions.is_empty() {
            return Err(AttemptError::NoQuestions(exam.id));
        }

        let now = self.context.clock.now();
        let answers =
            LocalAnswerStore::load_state(self.context.store.clone(), key.clone(), &exam).await;
        match derive_exam_status(exam.scheduled_start, exam.scheduled_end, now) {
            ExamStatus::Upcoming => return Err(AttemptError::NotStarted),
            // A started attempt may still be reopened after the window closes so
            // that its expiry submission can run.
            ExamStatus::Completed => {
                if !answers.has_attempt_start().await? {
                    return Err(AttemptError::Ended);
                }
            }
            ExamStatus::Ongoing => {}
        }

        let started_at = answers.ensure_attempt_start(now).await?;
        let deadline =
            compute_effective_deadline(started_at, exam.duration_minutes, exam.scheduled_end)?;
        let remaining = remaining_seconds(deadline, now);

        let session = Arc::new(AttemptSession {
            id: Uuid::new_v4(),
            key: key.clone(),
            exam: Arc::new(exam),
            started_at,
            deadline,
            context: self.context.clone(),
            inner: Mutex::new(SessionInner { answers, tracker: SubmissionTracker::default() }),
            resources: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });

        let replaced = {
            let mut sessions = self.lock_sessions();
            if let Some(existing) = sessions.get(&key) {
                if !existing.resources_released() {
                    return Ok(existing.clone());
                }
            }
            if self.context.submission_in_flight(&key) {
                return Err(SubmitRejection::InFlight.into());
            }
            session.arm(remaining);
            sessions.insert(key.clone(), session.clone())
        };
        if let Some(previous) = replaced {
            previous.close();
        }

        tracing::info!(
            attempt_id = %session.id,
            exam_id = %key.exam_id,
            student_id = %key.student_id,
            started_at = %format_offset(started_at),
            deadline = %format_offset(deadline),
            remaining_seconds = remaining,
            "Attempt view opened"
        );
        Ok(session)
    }

    pub(crate) fn get(&self, key: &AttemptKey) -> Option<Arc<AttemptSession>> {
        self.lock_sessions().get(key).cloned()
    }

    pub(crate) fn require(&self, key: &AttemptKey) -> Result<Arc<AttemptSession>, AttemptError> {
        self.get(key).ok_or(AttemptError::NotOpen)
    }

    /// Releases the view and its resources. Returns whether a view was open.
    pub(crate) fn close(&self, key: &AttemptKey) -> bool {
        let removed = self.lock_sessions().remove(key);
        match removed {
            Some(session) => {
                session.close();
                tracing::info!(attempt_id = %session.id, attempt = %key, "Attempt view closed");
                true
            }
            None => false,
        }
    }

    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock_sessions().drain().map(|(_, session)| session).collect();
        for session in &drained {
            session.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "Closed open attempt views");
        }
        drained.len()
    }

    pub(crate) fn open_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub(crate) fn leave_guards_active(&self) -> usize {
        self.context.leave_guards.load(Ordering::SeqCst)
    }

    fn lock_sessions(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<AttemptKey, Arc<AttemptSession>>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AttemptSession {
    fn resources_released(&self) -> bool {
        self.resources.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).is_none()
    }
}
