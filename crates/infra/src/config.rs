use karyera_domain::creation::DEFAULT_MAX_ACTIVE_STORIES;
use karyera_domain::engine::EngineConfig;
use karyera_domain::playback::{
    DEFAULT_FIXED_VIEW_WINDOW_MS, DEFAULT_TERMINAL_GRACE_MS, DEFAULT_TICK_INTERVAL_MS,
    PacingPolicy, PlaybackConfig,
};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBackend {
    Http,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub data_backend: String,
    pub api_base_url: String,
    pub access_token: String,
    pub request_timeout_ms: u64,
    pub read_retry_max_attempts: u32,
    pub read_retry_backoff_base_ms: u64,
    pub read_retry_backoff_max_ms: u64,
    pub tick_interval_ms: u64,
    pub pacing_policy: String,
    pub fixed_view_window_ms: u64,
    pub terminal_grace_ms: u64,
    pub max_active_stories: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("api_base_url", "https://karyeraweb.pythonanywhere.com/api")?
            .set_default("access_token", "")?
            .set_default("request_timeout_ms", 10_000)?
            .set_default("read_retry_max_attempts", 3)?
            .set_default("read_retry_backoff_base_ms", 200)?
            .set_default("read_retry_backoff_max_ms", 2_000)?
            .set_default("tick_interval_ms", DEFAULT_TICK_INTERVAL_MS as i64)?
            .set_default("pacing_policy", "scaled")?
            .set_default("fixed_view_window_ms", DEFAULT_FIXED_VIEW_WINDOW_MS as i64)?
            .set_default("terminal_grace_ms", DEFAULT_TERMINAL_GRACE_MS as i64)?
            .set_default("max_active_stories", DEFAULT_MAX_ACTIVE_STORIES as i64)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn backend(&self) -> Result<DataBackend, config::ConfigError> {
        match self.data_backend.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(DataBackend::Http),
            "memory" => Ok(DataBackend::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown data_backend: {other}"
            ))),
        }
    }

    pub fn pacing(&self) -> Result<PacingPolicy, config::ConfigError> {
        match self.pacing_policy.trim().to_ascii_lowercase().as_str() {
            "scaled" => Ok(PacingPolicy::Scaled),
            "fixed" => Ok(PacingPolicy::FixedWindow {
                window_ms: self.fixed_view_window_ms.max(1),
            }),
            other => Err(config::ConfigError::Message(format!(
                "unknown pacing_policy: {other}"
            ))),
        }
    }

    pub fn engine_config(&self) -> Result<EngineConfig, config::ConfigError> {
        if self.max_active_stories == 0 {
            return Err(config::ConfigError::Message(
                "max_active_stories must be at least 1".into(),
            ));
        }
        Ok(EngineConfig {
            playback: PlaybackConfig {
                tick_interval_ms: self.tick_interval_ms.max(1),
                pacing: self.pacing()?,
                terminal_grace_ms: self.terminal_grace_ms,
            },
            max_active_stories: self.max_active_stories,
        })
    }

    /// Bearer token, `None` when unset.
    pub fn token(&self) -> Option<&str> {
        Some(self.access_token.trim()).filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        app_env: "test".into(),
        log_level: "debug".into(),
        data_backend: "memory".into(),
        api_base_url: "http://127.0.0.1:9/api/".into(),
        access_token: " token-123 ".into(),
        request_timeout_ms: 1_000,
        read_retry_max_attempts: 2,
        read_retry_backoff_base_ms: 10,
        read_retry_backoff_max_ms: 50,
        tick_interval_ms: 100,
        pacing_policy: "scaled".into(),
        fixed_view_window_ms: 5_000,
        terminal_grace_ms: 5_000,
        max_active_stories: 3,
    }
}
