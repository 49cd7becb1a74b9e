use serde::{Deserialize, Serialize};

use conductor_errors::ConductorResult;

use super::logging::{LogConfig, LogLevel};
use crate::env_source::{EnvSource, ProcessEnv};
use crate::validation::{ConfigValidator, ValidationUtils};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Conductor 服务端连接配置
///
/// `host()` 是所有 REST 调用的前缀：显式设置 `server_api_url` 时直接使用，
/// 否则为 `base_url + "/api"`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    pub base_url: String,
    pub server_api_url: Option<String>,
    pub debug: bool,
    pub http_timeout_seconds: u64,
    pub log: LogConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            server_api_url: None,
            debug: false,
            http_timeout_seconds: 30,
            log: LogConfig::default(),
        }
    }
}

impl Configuration {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_server_api_url<S: Into<String>>(server_api_url: S) -> Self {
        Self {
            server_api_url: Some(server_api_url.into()),
            ..Self::default()
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn from_env() -> Self {
        Self::from_env_source(&ProcessEnv)
    }

    /// `CONDUCTOR_SERVER_URL` 指向完整的 API 前缀（例如 `http://host:8080/api`）
    pub fn from_env_source(env: &dyn EnvSource) -> Self {
        let mut config = Self {
            log: LogConfig::from_env_source(env),
            ..Self::default()
        };
        if let Some(url) = env.var("CONDUCTOR_SERVER_URL").filter(|v| !v.is_empty()) {
            config.server_api_url = Some(url);
        }
        if let Some(debug) = env.var("CONDUCTOR_DEBUG") {
            config.debug = matches!(debug.to_lowercase().as_str(), "true" | "1");
        }
        if let Some(timeout) = env.var("CONDUCTOR_HTTP_TIMEOUT_SECONDS") {
            if let Ok(timeout) = timeout.parse() {
                config.http_timeout_seconds = timeout;
            }
        }
        config
    }

    pub fn host(&self) -> String {
        match &self.server_api_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/api", self.base_url.trim_end_matches('/')),
        }
    }

    /// debug 开关会把默认日志级别提升到 debug
    pub fn effective_log_config(&self) -> LogConfig {
        let mut log = self.log.clone();
        if self.debug {
            log.level = LogLevel::Debug;
        }
        log
    }
}

impl ConfigValidator for Configuration {
    fn validate(&self) -> ConductorResult<()> {
        match &self.server_api_url {
            Some(url) => ValidationUtils::validate_http_url(url, "server_api_url")?,
            None => ValidationUtils::validate_http_url(&self.base_url, "base_url")?,
        }
        ValidationUtils::validate_timeout_seconds(self.http_timeout_seconds)
    }
}
