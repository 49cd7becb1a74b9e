use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conductor_config::MetricsSettings;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{debug, info, warn};

use crate::metrics_provider::shard_path;

const TASK_TYPE_LABEL: &str = "taskType";
const EXCEPTION_LABEL: &str = "exception";

/// Worker 侧上报的指标名称
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    TaskPoll,
    TaskPollError,
    TaskPollTime,
    TaskExecuteTime,
    TaskResultSize,
    TaskExecuteError,
    TaskUpdateError,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::TaskPoll => "task_poll_total",
            MetricName::TaskPollError => "task_poll_error_total",
            MetricName::TaskPollTime => "task_poll_time_seconds",
            MetricName::TaskExecuteTime => "task_execute_time_seconds",
            MetricName::TaskResultSize => "task_result_size_bytes",
            MetricName::TaskExecuteError => "task_execute_error_total",
            MetricName::TaskUpdateError => "task_update_error_total",
        }
    }
}

/// 轮询循环调用的指标钩子
///
/// 所有方法都是 fire-and-forget，实现不得 panic，也不得阻塞轮询循环。
pub trait MetricsCollector: Send + Sync {
    fn increment_task_poll(&self, task_type: &str);
    fn increment_task_poll_error(&self, task_type: &str, error_kind: &str);
    fn record_task_poll_time(&self, task_type: &str, seconds: f64);
    fn record_task_execute_time(&self, task_type: &str, seconds: f64);
    fn record_task_result_payload_size(&self, task_type: &str, bytes: usize);
    fn increment_task_execution_error(&self, task_type: &str, error_kind: &str);
    fn increment_task_update_error(&self, task_type: &str, error_kind: &str);
}

/// 基于 `metrics` 宏的实现，数据由 Prometheus recorder 汇总
///
/// `install` 会安装进程级全局 recorder，并启动一个后台线程，
/// 每隔 `update_interval` 把当前进程的指标写入分片文件，供指标进程合并。
pub struct PrometheusMetricsCollector {
    handle: Option<PrometheusHandle>,
    shard_path: Option<PathBuf>,
}

impl PrometheusMetricsCollector {
    /// 只负责打点，不安装 recorder，也不写分片
    pub fn new() -> Self {
        Self {
            handle: None,
            shard_path: None,
        }
    }

    pub fn install(settings: &MetricsSettings) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&settings.directory).with_context(|| {
            format!("创建指标目录失败: {}", settings.directory.display())
        })?;

        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("安装Prometheus recorder失败")?;

        let collector = Arc::new(Self {
            handle: Some(handle),
            shard_path: Some(shard_path(&settings.directory, std::process::id())),
        });

        let writer = Arc::clone(&collector);
        let interval = settings.update_interval;
        std::thread::Builder::new()
            .name("metrics-shard-writer".to_string())
            .spawn(move || writer.write_shards_forever(interval))
            .context("启动指标分片写入线程失败")?;

        info!(
            directory = %settings.directory.display(),
            "Prometheus metrics collector installed"
        );
        Ok(collector)
    }

    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(|handle| {
            handle.run_upkeep();
            handle.render()
        })
    }

    pub fn write_shard(&self) -> Result<()> {
        let (Some(path), Some(text)) = (&self.shard_path, self.render()) else {
            return Ok(());
        };
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_shards_forever(&self, interval: Duration) {
        loop {
            if let Err(e) = self.write_shard() {
                warn!("写入指标分片失败: {}", e);
            }
            std::thread::sleep(interval);
        }
    }
}

impl Default for PrometheusMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for PrometheusMetricsCollector {
    fn increment_task_poll(&self, task_type: &str) {
        counter!(MetricName::TaskPoll.as_str(), TASK_TYPE_LABEL => task_type.to_string())
            .increment(1);
    }

    fn increment_task_poll_error(&self, task_type: &str, error_kind: &str) {
        counter!(
            MetricName::TaskPollError.as_str(),
            TASK_TYPE_LABEL => task_type.to_string(),
            EXCEPTION_LABEL => error_kind.to_string()
        )
        .increment(1);
        debug!(task_type, error_kind, "Task poll error recorded");
    }

    fn record_task_poll_time(&self, task_type: &str, seconds: f64) {
        histogram!(MetricName::TaskPollTime.as_str(), TASK_TYPE_LABEL => task_type.to_string())
            .record(seconds);
    }

    fn record_task_execute_time(&self, task_type: &str, seconds: f64) {
        histogram!(MetricName::TaskExecuteTime.as_str(), TASK_TYPE_LABEL => task_type.to_string())
            .record(seconds);
    }

    fn record_task_result_payload_size(&self, task_type: &str, bytes: usize) {
        gauge!(MetricName::TaskResultSize.as_str(), TASK_TYPE_LABEL => task_type.to_string())
            .set(bytes as f64);
    }

    fn increment_task_execution_error(&self, task_type: &str, error_kind: &str) {
        counter!(
            MetricName::TaskExecuteError.as_str(),
            TASK_TYPE_LABEL => task_type.to_string(),
            EXCEPTION_LABEL => error_kind.to_string()
        )
        .increment(1);
        debug!(task_type, error_kind, "Task execution error recorded");
    }

    fn increment_task_update_error(&self, task_type: &str, error_kind: &str) {
        counter!(
            MetricName::TaskUpdateError.as_str(),
            TASK_TYPE_LABEL => task_type.to_string(),
            EXCEPTION_LABEL => error_kind.to_string()
        )
        .increment(1);
        debug!(task_type, error_kind, "Task update error recorded");
    }
}
