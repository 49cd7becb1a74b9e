use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use conductor_errors::{ConductorError, ConductorResult};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 指标采集设置
///
/// 每个 Worker 进程把自己的指标写入 `directory` 下的分片文件，
/// 指标进程每隔 `update_interval` 把所有分片合并写入 `file_name`，
/// 设置了 `listen_address` 时同时通过 HTTP 暴露 `/metrics`。
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSettings {
    pub directory: PathBuf,
    pub file_name: String,
    pub update_interval: Duration,
    pub listen_address: Option<SocketAddr>,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir().join("conductor-metrics"),
            file_name: "metrics.log".to_string(),
            update_interval: Duration::from_millis(100),
            listen_address: None,
        }
    }
}

impl MetricsSettings {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    pub fn file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn update_interval(mut self, update_interval: Duration) -> Self {
        self.update_interval = update_interval;
        self
    }

    pub fn listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = Some(listen_address);
        self
    }

    pub fn output_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

impl ConfigValidator for MetricsSettings {
    fn validate(&self) -> ConductorResult<()> {
        ValidationUtils::validate_not_empty(&self.file_name, "metrics file_name")?;
        if self.update_interval.is_zero() {
            return Err(ConductorError::config_error(
                "metrics update_interval must be greater than 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_settings_defaults() {
        let settings = MetricsSettings::default();
        assert_eq!(settings.file_name, "metrics.log");
        assert_eq!(settings.update_interval, Duration::from_millis(100));
        assert!(settings.listen_address.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_output_path() {
        let settings = MetricsSettings::new("/tmp/metrics").file_name("worker.prom");
        assert_eq!(settings.output_path(), PathBuf::from("/tmp/metrics/worker.prom"));
    }

    #[test]
    fn test_zero_update_interval_rejected() {
        let settings = MetricsSettings::default().update_interval(Duration::ZERO);
        assert!(settings.validate().is_err());
    }
}
