use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use conductor_client::TaskApi;
use conductor_config::WorkerRuntimeConfig;
use conductor_domain::{Task, TaskExecLog, TaskResult};
use conductor_errors::{ConductorError, ConductorResult};
use conductor_observability::MetricsCollector;
use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::worker::Worker;

/// 上报结果的最大尝试次数
pub const UPDATE_RETRY_ATTEMPTS: u32 = 4;
/// 第 n 次重试前休眠 n 倍的步长
pub const UPDATE_RETRY_BACKOFF_STEP: Duration = Duration::from_secs(10);

/// 单个 worker 的轮询循环
///
/// 每一轮依次执行：轮询、执行、上报、按间隔休眠。
/// 任何一步失败都只记录日志和指标，循环本身永不退出。
pub struct TaskRunner {
    worker: Arc<dyn Worker>,
    task_api: Arc<dyn TaskApi>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    runtime_config: WorkerRuntimeConfig,
    identity: String,
    configured_poll_interval: Duration,
}

impl TaskRunner {
    pub fn new(
        worker: Arc<dyn Worker>,
        task_api: Arc<dyn TaskApi>,
        metrics: Option<Arc<dyn MetricsCollector>>,
        runtime_config: WorkerRuntimeConfig,
    ) -> Self {
        let identity = worker.identity();
        worker.set_poll_interval(runtime_config.poll_interval);
        let configured_poll_interval = worker.poll_interval();
        Self {
            worker,
            task_api,
            metrics,
            runtime_config,
            identity,
            configured_poll_interval,
        }
    }

    pub fn runtime_config(&self) -> &WorkerRuntimeConfig {
        &self.runtime_config
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// 无限循环，永不返回
    pub async fn run(&self) {
        let span = info_span!(
            "task_runner",
            pid = std::process::id(),
            task_type = %self.runtime_config.task_type
        );
        async {
            info!(
                domain = ?self.runtime_config.domain,
                poll_interval_ms = self.current_poll_interval().as_millis() as u64,
                "Polling task {}",
                self.runtime_config.task_type
            );
            loop {
                self.run_once().await;
            }
        }
        .instrument(span)
        .await
    }

    /// 在当前线程上建立 tokio 运行时并执行 [`run`](Self::run)
    pub fn run_blocking(&self) -> ConductorResult<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConductorError::process_error(format!("创建tokio运行时失败: {e}")))?;
        runtime.block_on(self.run());
        Ok(())
    }

    /// 执行一轮：轮询、执行、上报、休眠
    pub async fn run_once(&self) {
        if let Some(task) = self.poll_task().await {
            if task.has_id() {
                let result = self.execute_task(&task).await;
                self.update_task(&result).await;
            } else {
                debug!("轮询到没有任务ID的任务，跳过");
            }
        }
        self.wait_for_polling_interval().await;
        self.worker.clear_task_definition_name_cache();
    }

    /// 轮询一个任务；暂停、队列为空或轮询失败时返回 `None`
    pub async fn poll_task(&self) -> Option<Task> {
        let task_type = self.worker.task_definition_name();
        if self.worker.paused() {
            debug!(task_type, "Stop polling task");
            return None;
        }

        self.with_metrics(|m| m.increment_task_poll(task_type));
        debug!(task_type, "Polling task");
        let started = Instant::now();
        let polled = self
            .task_api
            .poll(
                task_type,
                Some(&self.identity),
                self.runtime_config.domain.as_deref(),
            )
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match polled {
            Ok(task) => {
                self.with_metrics(|m| m.record_task_poll_time(task_type, elapsed));
                if let Some(task) = &task {
                    debug!(task_type, task_id = %task.task_id, "Polled task");
                }
                task
            }
            Err(e) => {
                self.with_metrics(|m| m.increment_task_poll_error(task_type, e.kind()));
                error!(task_type, "轮询任务失败: {}", e);
                None
            }
        }
    }

    /// 执行任务并总是返回一个结果
    ///
    /// 错误和 panic 转换为 FAILED 结果：原因是错误的文本，
    /// 并附带一条包含堆栈的执行日志。
    pub async fn execute_task(&self, task: &Task) -> TaskResult {
        let task_type = self.worker.task_definition_name();
        debug!(task_type, task_id = %task.task_id, "Executing task");
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.worker.execute(task))
            .catch_unwind()
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(result)) => {
                let result = self.bind_result(result, task);
                self.with_metrics(|m| {
                    m.record_task_execute_time(task_type, elapsed);
                    m.record_task_result_payload_size(task_type, payload_size(&result));
                });
                debug!(
                    task_type,
                    task_id = %task.task_id,
                    status = %result.status,
                    "Executed task"
                );
                result
            }
            Ok(Err(e)) => {
                let kind = e
                    .downcast_ref::<ConductorError>()
                    .map(ConductorError::kind)
                    .unwrap_or("error");
                self.with_metrics(|m| m.increment_task_execution_error(task_type, kind));
                error!(task_type, task_id = %task.task_id, "任务执行失败: {:#}", e);
                self.failed_result(task, e.to_string(), error_trace(&e))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                self.with_metrics(|m| m.increment_task_execution_error(task_type, "panic"));
                error!(task_type, task_id = %task.task_id, "任务执行panic: {}", message);
                let trace = format!("panic: {message}\n\nstack backtrace:\n{}", Backtrace::force_capture());
                self.failed_result(task, message, trace)
            }
        }
    }

    /// 上报结果，失败时线性退避重试；用尽次数后放弃并返回 `None`
    pub async fn update_task(&self, result: &TaskResult) -> Option<String> {
        let task_type = self.worker.task_definition_name();
        for attempt in 0..UPDATE_RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(UPDATE_RETRY_BACKOFF_STEP * attempt).await;
            }
            match self.task_api.update_task(result).await {
                Ok(response) => {
                    debug!(
                        task_type,
                        task_id = %result.task_id,
                        status = %result.status,
                        "Updated task"
                    );
                    return Some(response);
                }
                Err(e) => {
                    self.with_metrics(|m| m.increment_task_update_error(task_type, e.kind()));
                    error!(
                        task_type,
                        task_id = %result.task_id,
                        attempt = attempt + 1,
                        "上报任务结果失败: {}",
                        e
                    );
                }
            }
        }
        warn!(
            task_type,
            task_id = %result.task_id,
            "上报任务结果重试{}次后放弃",
            UPDATE_RETRY_ATTEMPTS
        );
        None
    }

    /// worker 在运行时改过间隔就用 worker 的，否则用解析出的配置
    pub fn current_poll_interval(&self) -> Duration {
        let current = self.worker.poll_interval();
        if current != self.configured_poll_interval {
            current
        } else {
            self.runtime_config.poll_interval
        }
    }

    pub async fn wait_for_polling_interval(&self) {
        tokio::time::sleep(self.current_poll_interval()).await;
    }

    fn with_metrics(&self, f: impl FnOnce(&dyn MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics.as_ref());
        }
    }

    /// worker 没有填写时补上任务和 worker 标识
    fn bind_result(&self, mut result: TaskResult, task: &Task) -> TaskResult {
        if result.task_id.is_empty() {
            result.task_id = task.task_id.clone();
        }
        if result.workflow_instance_id.is_empty() {
            result.workflow_instance_id = task.workflow_instance_id.clone();
        }
        if result.worker_id.is_empty() {
            result.worker_id = self.identity.clone();
        }
        result
    }

    fn failed_result(&self, task: &Task, reason: String, trace: String) -> TaskResult {
        let mut result = TaskResult::new_for(task, self.identity.clone()).failed(reason);
        result.logs = vec![TaskExecLog::new(trace, task.task_id.clone())];
        result
    }
}

fn payload_size(result: &TaskResult) -> usize {
    serde_json::to_vec(result).map(|bytes| bytes.len()).unwrap_or(0)
}

fn error_trace(error: &anyhow::Error) -> String {
    if error.backtrace().status() == BacktraceStatus::Captured {
        format!("{error:?}")
    } else {
        format!("{error:?}\n\nstack backtrace:\n{}", Backtrace::force_capture())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
