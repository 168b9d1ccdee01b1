use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

pub(crate) const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub(crate) const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub(crate) const ATTEMPT_SUBMISSIONS_TOTAL: &str = "attempt_submissions_total";
pub(crate) const ATTEMPT_OPEN_VIEWS: &str = "attempt_open_views";
pub(crate) const ATTEMPT_COUNTDOWNS_ACTIVE: &str = "attempt_countdowns_active";

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "HTTP responses by status code");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request latency");
    describe_counter!(ATTEMPT_SUBMISSIONS_TOTAL, "Attempt submissions by mode and outcome");
    describe_gauge!(ATTEMPT_OPEN_VIEWS, "Attempt views currently holding resources");
    describe_gauge!(ATTEMPT_COUNTDOWNS_ACTIVE, "Countdown tasks currently ticking");
}
