//! Key-value persistence for in-progress attempts.
//!
//! Values are plain strings so any browser-like or network store can back an
//! attempt. Keys are derived from [`AttemptKey`] and kept compatible with the
//! `exam_start_*`, `exam_answers_*` and `exam_review_*` names clients already
//! write.

mod memory;
mod redis_store;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::{Settings, StateBackend};
use crate::core::redis::RedisHandle;

pub(crate) use memory::MemoryStateStore;
pub(crate) use redis_store::RedisStateStore;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("attempt state backend unavailable: {0}")]
    Unavailable(String),
    #[error("attempt state backend failed: {0}")]
    Backend(String),
}

#[async_trait]
pub(crate) trait AttemptStateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Writes `value` only when `key` is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

pub(crate) type SharedStateStore = Arc<dyn AttemptStateStore>;

/// One student's attempt at one exam.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AttemptKey {
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
}

impl AttemptKey {
    pub(crate) fn new(exam_id: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self { exam_id: exam_id.into(), student_id: student_id.into() }
    }

    pub(crate) fn start_key(&self) -> String {
        format!("exam_start_{}_{}", self.exam_id, self.student_id)
    }

    pub(crate) fn answers_key(&self) -> String {
        format!("exam_answers_{}_{}", self.exam_id, self.student_id)
    }

    pub(crate) fn review_key(&self) -> String {
        format!("exam_review_{}_{}", self.exam_id, self.student_id)
    }
}

impl fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.exam_id, self.student_id)
    }
}

pub(crate) fn store_from_settings(settings: &Settings, redis: &RedisHandle) -> SharedStateStore {
    match settings.state().backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::default()),
        StateBackend::Redis => {
            Arc::new(RedisStateStore::new(redis.clone(), settings.state().ttl_seconds))
        }
    }
}
