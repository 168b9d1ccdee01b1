use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle, time::Clock};
use crate::repositories::attempt_state::SharedStateStore;
use crate::services::attempt_registry::AttemptRegistry;
use crate::services::exam_gateway::SharedExamGateway;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    redis: RedisHandle,
    registry: AttemptRegistry,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        redis: RedisHandle,
        store: SharedStateStore,
        gateway: SharedExamGateway,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = AttemptRegistry::new(
            store,
            gateway,
            clock,
            settings.attempt().unanswered_policy,
            settings.attempt().low_time_warning_seconds,
        );
        Self { inner: Arc::new(InnerState { settings, redis, registry }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn attempts(&self) -> &AttemptRegistry {
        &self.inner.registry
    }
}
