use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use time::OffsetDateTime;

use crate::core::time::{from_unix_millis, to_unix_millis};
use crate::repositories::attempt_state::{AttemptKey, SharedStateStore, StoreError};
use crate::schemas::attempt::AnswerStats;
use crate::schemas::exam::{ExamDetails, OPTIONS_PER_QUESTION};

pub(crate) type AnswerMap = BTreeMap<String, u8>;
pub(crate) type ReviewSet = BTreeSet<String>;

#[derive(Debug, Error)]
pub(crate) enum AnswerError {
    #[error("question {0} is not part of this exam")]
    UnknownQuestion(String),
    #[error("option index {0} is out of range")]
    OptionOutOfRange(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AttemptProgress {
    pub(crate) answers: AnswerMap,
    pub(crate) review: ReviewSet,
}

/// Answers and review flags of one attempt, written through to the state store
/// on every change.
pub(crate) struct LocalAnswerStore {
    store: SharedStateStore,
    key: AttemptKey,
    question_ids: BTreeSet<String>,
    progress: AttemptProgress,
}

impl LocalAnswerStore {
    /// Restores persisted progress. Missing, unreadable or corrupt entries yield
    /// empty progress; entries for unknown questions are dropped.
    pub(crate) async fn load_state(
        store: SharedStateStore,
        key: AttemptKey,
        exam: &ExamDetails,
    ) -> Self {
        let question_ids: BTreeSet<String> =
            exam.questions.iter().map(|question| question.id.clone()).collect();

        let answers = match read_json::<BTreeMap<String, i64>>(&store, &key.answers_key()).await {
            Some(raw) => raw
                .into_iter()
                .filter_map(|(question_id, option)| {
                    let known = question_ids.contains(&question_id);
                    match validate_option(option) {
                        Ok(option) if known => Some((question_id, option)),
                        _ => {
                            tracing::warn!(
                                attempt = %key,
                                question_id = %question_id,
                                option,
                                "Dropping persisted answer that does not fit the exam"
                            );
                            None
                        }
                    }
                })
                .collect(),
            None => AnswerMap::new(),
        };

        let review = match read_json::<Vec<String>>(&store, &key.review_key()).await {
            Some(raw) => {
                raw.into_iter().filter(|question_id| question_ids.contains(question_id)).collect()
            }
            None => ReviewSet::new(),
        };

        Self { store, key, question_ids, progress: AttemptProgress { answers, review } }
    }

    /// Returns the recorded attempt start, writing `now` when none is on record.
    /// The first writer wins when several openers race for the same attempt.
    pub(crate) async fn ensure_attempt_start(
        &self,
        now: OffsetDateTime,
    ) -> Result<OffsetDateTime, StoreError> {
        let start_key = self.key.start_key();
        if let Some(started_at) = self.read_attempt_start(&start_key).await? {
            return Ok(started_at);
        }

        let value = to_unix_millis(now).to_string();
        if self.store.set_if_absent(&start_key, &value).await? {
            tracing::info!(attempt = %self.key, "Attempt clock started");
            return Ok(now);
        }

        // Someone else recorded a start between the read and the write.
        match self.read_attempt_start(&start_key).await? {
            Some(started_at) => Ok(started_at),
            None => {
                tracing::warn!(
                    attempt = %self.key,
                    "Persisted attempt start is unreadable; restarting the clock"
                );
                self.store.set(&start_key, &value).await?;
                Ok(now)
            }
        }
    }

    async fn read_attempt_start(
        &self,
        start_key: &str,
    ) -> Result<Option<OffsetDateTime>, StoreError> {
        let Some(raw) = self.store.get(start_key).await? else {
            return Ok(None);
        };
        let started_at = raw.trim().parse::<i64>().ok().and_then(from_unix_millis);
        if started_at.is_none() {
            tracing::debug!(attempt = %self.key, value = %raw, "Unreadable attempt start");
        }
        Ok(started_at)
    }

    pub(crate) async fn has_attempt_start(&self) -> Result<bool, StoreError> {
        Ok(self.store.get(&self.key.start_key()).await?.is_some())
    }

    pub(crate) async fn record_answer(
        &mut self,
        question_id: &str,
        option_index: i64,
    ) -> Result<u8, AnswerError> {
        self.ensure_known(question_id)?;
        let option = validate_option(option_index)?;

        let mut answers = self.progress.answers.clone();
        answers.insert(question_id.to_string(), option);
        self.persist_answers(&answers).await?;
        self.progress.answers = answers;

        Ok(option)
    }

    /// Flips the review flag and returns whether the question is now marked.
    pub(crate) async fn toggle_review(&mut self, question_id: &str) -> Result<bool, AnswerError> {
        self.ensure_known(question_id)?;

        let mut review = self.progress.review.clone();
        let marked = if review.remove(question_id) {
            false
        } else {
            review.insert(question_id.to_string());
            true
        };
        self.persist_review(&review).await?;
        self.progress.review = review;

        Ok(marked)
    }

    /// Removes every key of the attempt. Each key is attempted even when an
    /// earlier removal fails; the first error is returned.
    pub(crate) async fn clear(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for key in [self.key.start_key(), self.key.answers_key(), self.key.review_key()] {
            if let Err(err) = self.store.remove(&key).await {
                tracing::error!(
                    attempt = %self.key,
                    key = %key,
                    error = %err,
                    "Failed to clear attempt key"
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn progress(&self) -> &AttemptProgress {
        &self.progress
    }

    pub(crate) fn stats(&self) -> AnswerStats {
        let answered = self.progress.answers.len();
        AnswerStats {
            answered,
            unanswered: self.question_ids.len().saturating_sub(answered),
            marked: self.progress.review.len(),
        }
    }

    fn ensure_known(&self, question_id: &str) -> Result<(), AnswerError> {
        if self.question_ids.contains(question_id) {
            Ok(())
        } else {
            Err(AnswerError::UnknownQuestion(question_id.to_string()))
        }
    }

    async fn persist_answers(&self, answers: &AnswerMap) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_string(answers).map_err(|err| StoreError::Backend(err.to_string()))?;
        self.store.set(&self.key.answers_key(), &encoded).await
    }

    async fn persist_review(&self, review: &ReviewSet) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_string(review).map_err(|err| StoreError::Backend(err.to_string()))?;
        self.store.set(&self.key.review_key(), &encoded).await
    }
}

fn validate_option(option_index: i64) -> Result<u8, AnswerError> {
    if (0..OPTIONS_PER_QUESTION as i64).contains(&option_index) {
        Ok(option_index as u8)
    } else {
        Err(AnswerError::OptionOutOfRange(option_index))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    store: &SharedStateStore,
    key: &str,
) -> Option<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "Failed to read persisted attempt state");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "Ignoring corrupt persisted attempt state");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::repositories::attempt_state::{AttemptStateStore, MemoryStateStore};
    use crate::test_support;

    fn setup() -> (Arc<MemoryStateStore>, AttemptKey, ExamDetails) {
        let store = Arc::new(MemoryStateStore::default());
        let key = AttemptKey::new("exam-1", "student-1");
        let exam = test_support::sample_exam("exam-1", 5);
        (store, key, exam)
    }

    #[tokio::test]
    async fn reload_restores_answers_and_review() {
        let (store, key, exam) = setup();

        let mut first = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;
        first.record_answer("q1", 2).await.unwrap();
        first.record_answer("q3", 0).await.unwrap();
        assert!(first.toggle_review("q3").await.unwrap());

        let reloaded = LocalAnswerStore::load_state(store.clone(), key, &exam).await;
        let expected_answers: AnswerMap =
            [("q1".to_string(), 2), ("q3".to_string(), 0)].into_iter().collect();
        assert_eq!(reloaded.progress().answers, expected_answers);
        assert_eq!(reloaded.progress().review, ReviewSet::from(["q3".to_string()]));
        assert_eq!(reloaded.progress(), first.progress());
    }

    #[tokio::test]
    async fn record_answer_is_idempotent() {
        let (store, key, exam) = setup();
        let mut answers = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;

        answers.record_answer("q2", 1).await.unwrap();
        let once = store.get(&key.answers_key()).await.unwrap();
        answers.record_answer("q2", 1).await.unwrap();
        let twice = store.get(&key.answers_key()).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.as_deref(), Some(r#"{"q2":1}"#));
    }

    #[tokio::test]
    async fn overwrite_replaces_previous_choice() {
        let (store, key, exam) = setup();
        let mut answers = LocalAnswerStore::load_state(store, key, &exam).await;

        answers.record_answer("q4", 0).await.unwrap();
        answers.record_answer("q4", 3).await.unwrap();

        assert_eq!(answers.progress().answers.get("q4"), Some(&3));
        assert_eq!(answers.stats(), AnswerStats { answered: 1, unanswered: 4, marked: 0 });
    }

    #[tokio::test]
    async fn rejects_unknown_questions_and_bad_options() {
        let (store, key, exam) = setup();
        let mut answers = LocalAnswerStore::load_state(store, key, &exam).await;

        assert!(matches!(
            answers.record_answer("q99", 0).await,
            Err(AnswerError::UnknownQuestion(id)) if id == "q99"
        ));
        assert!(matches!(
            answers.record_answer("q1", 4).await,
            Err(AnswerError::OptionOutOfRange(4))
        ));
        assert!(matches!(
            answers.record_answer("q1", -1).await,
            Err(AnswerError::OptionOutOfRange(-1))
        ));
        assert!(matches!(
            answers.toggle_review("nope").await,
            Err(AnswerError::UnknownQuestion(_))
        ));
        assert!(answers.progress().answers.is_empty());
    }

    #[tokio::test]
    async fn toggle_review_twice_unmarks_and_persists_empty_set() {
        let (store, key, exam) = setup();
        let mut answers = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;

        assert!(answers.toggle_review("q5").await.unwrap());
        assert!(!answers.toggle_review("q5").await.unwrap());

        assert_eq!(store.get(&key.review_key()).await.unwrap().as_deref(), Some("[]"));
        assert!(answers.progress().review.is_empty());
    }

    #[tokio::test]
    async fn corrupt_state_loads_as_empty() {
        let (store, key, exam) = setup();
        store.set(&key.answers_key(), "{not json").await.unwrap();
        store.set(&key.review_key(), r#"{"q1":true}"#).await.unwrap();

        let answers = LocalAnswerStore::load_state(store, key, &exam).await;

        assert_eq!(answers.progress(), &AttemptProgress::default());
    }

    #[tokio::test]
    async fn load_drops_entries_that_do_not_fit_the_exam() {
        let (store, key, exam) = setup();
        store.set(&key.answers_key(), r#"{"q1":1,"q2":7,"zz":0}"#).await.unwrap();
        store.set(&key.review_key(), r#"["q2","zz"]"#).await.unwrap();

        let answers = LocalAnswerStore::load_state(store, key, &exam).await;

        assert_eq!(answers.progress().answers, AnswerMap::from([("q1".to_string(), 1)]));
        assert_eq!(answers.progress().review, ReviewSet::from(["q2".to_string()]));
    }

    #[tokio::test]
    async fn attempt_start_is_written_once() {
        let (store, key, exam) = setup();
        let answers = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;
        let t0 = datetime!(2025-06-01 10:00 UTC);

        assert!(!answers.has_attempt_start().await.unwrap());
        assert_eq!(answers.ensure_attempt_start(t0).await.unwrap(), t0);
        let later = t0 + time::Duration::minutes(5);
        assert_eq!(answers.ensure_attempt_start(later).await.unwrap(), t0);
        assert_eq!(
            store.get(&key.start_key()).await.unwrap(),
            Some(to_unix_millis(t0).to_string())
        );
    }

    /// Reports every key as missing once, as if another opener wrote it
    /// right after this one looked.
    #[derive(Default)]
    struct LateWriterStore {
        inner: MemoryStateStore,
        stale_reads_left: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AttemptStateStore for LateWriterStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            use std::sync::atomic::Ordering;
            let stale = self
                .stale_reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if stale {
                return Ok(None);
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.set(key, value).await
        }

        async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
            self.inner.set_if_absent(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }

        fn backend(&self) -> &'static str {
            "late-writer"
        }
    }

    #[tokio::test]
    async fn racing_opener_keeps_the_first_recorded_start() {
        let (_, key, exam) = setup();
        let store = Arc::new(LateWriterStore::default());
        let first_start = datetime!(2025-06-01 09:55 UTC);
        let recorded = to_unix_millis(first_start).to_string();
        store.inner.set(&key.start_key(), &recorded).await.unwrap();
        let answers = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;
        store.stale_reads_left.store(1, std::sync::atomic::Ordering::SeqCst);

        let now = datetime!(2025-06-01 10:00 UTC);
        let started_at = answers.ensure_attempt_start(now).await.unwrap();

        assert_eq!(started_at, first_start);
        assert_eq!(store.inner.get(&key.start_key()).await.unwrap(), Some(recorded));
    }

    #[tokio::test]
    async fn unreadable_attempt_start_is_replaced() {
        let (store, key, exam) = setup();
        store.set(&key.start_key(), "yesterday").await.unwrap();
        let answers = LocalAnswerStore::load_state(store, key, &exam).await;
        let now = datetime!(2025-06-01 10:00 UTC);

        assert_eq!(answers.ensure_attempt_start(now).await.unwrap(), now);
    }

    #[tokio::test]
    async fn failed_write_leaves_progress_unchanged() {
        let (_, key, exam) = setup();
        let store = Arc::new(test_support::FlakyStore::default());
        let mut answers = LocalAnswerStore::load_state(store.clone(), key, &exam).await;

        answers.record_answer("q1", 1).await.unwrap();
        store.fail_writes(true);
        assert!(matches!(answers.record_answer("q1", 2).await, Err(AnswerError::Store(_))));
        assert!(matches!(answers.toggle_review("q1").await, Err(AnswerError::Store(_))));

        assert_eq!(answers.progress().answers.get("q1"), Some(&1));
        assert!(answers.progress().review.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_all_attempt_keys() {
        let (store, key, exam) = setup();
        let mut answers = LocalAnswerStore::load_state(store.clone(), key.clone(), &exam).await;
        answers.ensure_attempt_start(datetime!(2025-06-01 10:00 UTC)).await.unwrap();
        answers.record_answer("q1", 0).await.unwrap();
        answers.toggle_review("q1").await.unwrap();
        assert_eq!(store.len(), 3);

        answers.clear().await.unwrap();

        assert_eq!(store.len(), 0);
    }
}
