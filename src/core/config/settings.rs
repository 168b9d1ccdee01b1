use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_state_backend, parse_u16, parse_u64, parse_unanswered_policy,
};
use super::types::{
    ApiSettings, AttemptSettings, ConfigError, CorsSettings, ExamApiSettings, RedisSettings,
    RuntimeSettings, ServerHost, ServerPort, ServerSettings, Settings, StateBackend,
    StateSettings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("PICRETE_HOST", "0.0.0.0");
        let port = env_or_default("PICRETE_PORT", "8010");

        let environment =
            parse_environment(env_optional("PICRETE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("PICRETE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Picrete Attempt Agent");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let state_backend = parse_state_backend(env_optional("ATTEMPT_STATE_BACKEND"))?;
        let state_ttl_seconds = parse_u64(
            "ATTEMPT_STATE_TTL_SECONDS",
            env_or_default("ATTEMPT_STATE_TTL_SECONDS", "0"),
        )?;

        let exam_api_base_url = env_or_default("EXAM_API_BASE_URL", "http://localhost:5115/api");
        let exam_api_timeout_seconds = parse_u64(
            "EXAM_API_TIMEOUT_SECONDS",
            env_or_default("EXAM_API_TIMEOUT_SECONDS", "30"),
        )?;
        let exam_api_connect_timeout_seconds = parse_u64(
            "EXAM_API_CONNECT_TIMEOUT_SECONDS",
            env_or_default("EXAM_API_CONNECT_TIMEOUT_SECONDS", "10"),
        )?;

        let unanswered_policy = parse_unanswered_policy(env_optional("PICRETE_UNANSWERED_POLICY"))?;
        let low_time_warning_seconds = parse_u64(
            "LOW_TIME_WARNING_SECONDS",
            env_or_default("LOW_TIME_WARNING_SECONDS", "300"),
        )?;

        let log_level = env_or_default("PICRETE_LOG_LEVEL", "info");
        let json =
            env_optional("PICRETE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            state: StateSettings { backend: state_backend, ttl_seconds: state_ttl_seconds },
            exam_api: ExamApiSettings {
                base_url: exam_api_base_url,
                timeout_seconds: exam_api_timeout_seconds,
                connect_timeout_seconds: exam_api_connect_timeout_seconds,
            },
            attempt: AttemptSettings { unanswered_policy, low_time_warning_seconds },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn state(&self) -> &StateSettings {
        &self.state
    }

    pub(crate) fn exam_api(&self) -> &ExamApiSettings {
        &self.exam_api
    }

    pub(crate) fn attempt(&self) -> &AttemptSettings {
        &self.attempt
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.exam_api.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_API_TIMEOUT_SECONDS",
                value: "0".to_string(),
            });
        }

        if !self.exam_api.base_url.starts_with("http://")
            && !self.exam_api.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "EXAM_API_BASE_URL",
                value: self.exam_api.base_url.clone(),
            });
        }

        if self.state.backend == StateBackend::Memory && self.state.ttl_seconds > 0 {
            tracing::warn!("ATTEMPT_STATE_TTL_SECONDS is ignored by the memory state backend");
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if env_optional("EXAM_API_BASE_URL").is_none() {
            return Err(ConfigError::MissingValue("EXAM_API_BASE_URL"));
        }
        if self.state.backend == StateBackend::Memory {
            return Err(ConfigError::InvalidValue {
                field: "ATTEMPT_STATE_BACKEND",
                value: self.state.backend.as_str().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::{ConfigError, Settings, StateBackend};
    use crate::services::submission_finalize::UnansweredPolicy;
    use crate::test_support;

    #[tokio::test]
    async fn defaults_load_in_test_environment() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.state().backend, StateBackend::Memory);
        assert_eq!(settings.attempt().unanswered_policy, UnansweredPolicy::Sentinel);
        assert_eq!(settings.attempt().low_time_warning_seconds, 300);
        assert_eq!(settings.api().api_v1_str, "/api/v1");
    }

    #[tokio::test]
    async fn strict_mode_rejects_memory_backend() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("PICRETE_STRICT_CONFIG", "1");
        std::env::set_var("EXAM_API_BASE_URL", "https://exams.example.test/api");

        let result = Settings::load();
        std::env::set_var("PICRETE_STRICT_CONFIG", "0");

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "ATTEMPT_STATE_BACKEND", .. })
        ));
    }

    #[tokio::test]
    async fn rejects_non_http_exam_api_url() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("EXAM_API_BASE_URL", "ftp://exams");

        let result = Settings::load();

        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "EXAM_API_BASE_URL", .. })
        ));
    }
}
