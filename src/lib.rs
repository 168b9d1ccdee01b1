pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::config::StateBackend;
use crate::core::{
    config::Settings, redis::RedisHandle, state::AppState, telemetry, time::SystemClock,
};
use crate::repositories::attempt_state;
use crate::services::exam_gateway::HttpExamGateway;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if settings.state().backend == StateBackend::Redis {
        if let Err(err) = redis.connect().await {
            tracing::error!(
                error = %err,
                "Failed to connect to Redis; retrying on first attempt-state access"
            );
        } else {
            tracing::info!("Redis connected successfully");
        }
    }

    let store = attempt_state::store_from_settings(&settings, &redis);
    let gateway = Arc::new(HttpExamGateway::from_settings(&settings)?);
    tracing::info!(
        state_backend = store.backend(),
        exam_api = %settings.exam_api().base_url,
        "Attempt agent configured"
    );

    let state = AppState::new(settings, redis.clone(), store, gateway, Arc::new(SystemClock));
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Picrete attempt agent listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    state.attempts().close_all();
    if redis.is_connected().await {
        redis.disconnect().await;
        tracing::info!("Redis disconnected");
    }

    result?;

    Ok(())
}
