use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conductor_client::TaskApi;
use conductor_config::WorkerRuntimeConfig;
use conductor_domain::{Task, TaskExecLog, TaskResult, TaskResultStatus};
use conductor_errors::{ConductorError, ConductorResult};
use conductor_observability::MetricsCollector;
use conductor_worker::{FunctionWorker, TaskRunner, Worker, WorkerFunction, UPDATE_RETRY_ATTEMPTS};
use serde_json::json;
use tokio::time::Instant;

// Mock任务接口：按顺序返回预设的轮询结果，并记录所有调用
#[derive(Default)]
struct MockTaskApi {
    poll_results: Mutex<VecDeque<ConductorResult<Option<Task>>>>,
    update_failures: AtomicUsize,
    polls: Mutex<Vec<(String, Option<String>, Option<String>)>>,
    updates: Mutex<Vec<(TaskResult, Instant)>>,
}

impl MockTaskApi {
    fn with_polls(results: Vec<ConductorResult<Option<Task>>>) -> Self {
        Self {
            poll_results: Mutex::new(results.into()),
            ..Default::default()
        }
    }

    fn failing_updates(self, count: usize) -> Self {
        self.update_failures.store(count, Ordering::SeqCst);
        self
    }

    fn poll_count(&self) -> usize {
        self.polls.lock().unwrap().len()
    }

    fn updates(&self) -> Vec<(TaskResult, Instant)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskApi for MockTaskApi {
    async fn poll(
        &self,
        task_type: &str,
        worker_id: Option<&str>,
        domain: Option<&str>,
    ) -> ConductorResult<Option<Task>> {
        self.polls.lock().unwrap().push((
            task_type.to_string(),
            worker_id.map(str::to_string),
            domain.map(str::to_string),
        ));
        self.poll_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(None))
    }

    async fn batch_poll(
        &self,
        _task_type: &str,
        _worker_id: Option<&str>,
        _count: Option<u32>,
        _timeout_ms: Option<u64>,
        _domain: Option<&str>,
    ) -> ConductorResult<Vec<Task>> {
        Ok(Vec::new())
    }

    async fn get_task(&self, task_id: &str) -> ConductorResult<Task> {
        Err(ConductorError::http_status(404, task_id))
    }

    async fn update_task(&self, result: &TaskResult) -> ConductorResult<String> {
        self.updates
            .lock()
            .unwrap()
            .push((result.clone(), Instant::now()));
        let remaining = self.update_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.update_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ConductorError::Network("connection refused".to_string()));
        }
        Ok(result.task_id.clone())
    }

    async fn append_log(&self, _task_id: &str, _message: &str) -> ConductorResult<()> {
        Ok(())
    }

    async fn get_logs(&self, _task_id: &str) -> ConductorResult<Vec<TaskExecLog>> {
        Ok(Vec::new())
    }

    async fn queue_size(&self, _task_type: &str) -> ConductorResult<i64> {
        Ok(0)
    }
}

// 记录每个指标钩子被调用的次数
#[derive(Default)]
struct RecordingMetrics {
    calls: Mutex<HashMap<&'static str, usize>>,
    payload_sizes: Mutex<Vec<usize>>,
}

impl RecordingMetrics {
    fn record(&self, name: &'static str) {
        *self.calls.lock().unwrap().entry(name).or_default() += 1;
    }

    fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().get(name).copied().unwrap_or(0)
    }
}

impl MetricsCollector for RecordingMetrics {
    fn increment_task_poll(&self, _task_type: &str) {
        self.record("poll");
    }

    fn increment_task_poll_error(&self, _task_type: &str, _error_kind: &str) {
        self.record("poll_error");
    }

    fn record_task_poll_time(&self, _task_type: &str, _seconds: f64) {
        self.record("poll_time");
    }

    fn record_task_execute_time(&self, _task_type: &str, _seconds: f64) {
        self.record("execute_time");
    }

    fn record_task_result_payload_size(&self, _task_type: &str, bytes: usize) {
        self.payload_sizes.lock().unwrap().push(bytes);
    }

    fn increment_task_execution_error(&self, _task_type: &str, _error_kind: &str) {
        self.record("execution_error");
    }

    fn increment_task_update_error(&self, _task_type: &str, _error_kind: &str) {
        self.record("update_error");
    }
}

enum Behavior {
    Complete,
    Fail(&'static str),
    Panic(&'static str),
    Bare,
}

struct MockWorker {
    name: String,
    behavior: Behavior,
    paused: bool,
    executions: AtomicUsize,
    cache_clears: AtomicUsize,
}

impl MockWorker {
    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            paused: false,
            executions: AtomicUsize::new(0),
            cache_clears: AtomicUsize::new(0),
        }
    }

    fn pausing(mut self) -> Self {
        self.paused = true;
        self
    }

    fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for MockWorker {
    fn task_definition_name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> String {
        "worker-1".to_string()
    }

    fn paused(&self) -> bool {
        self.paused
    }

    async fn execute(&self, task: &Task) -> anyhow::Result<TaskResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Complete => {
                let mut result = TaskResult::new_for(task, self.identity()).completed();
                result.add_output("worker_style", json!("class"));
                Ok(result)
            }
            Behavior::Fail(message) => Err(anyhow::anyhow!(message)),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::Bare => Ok(TaskResult::default().completed()),
        }
    }

    fn clear_task_definition_name_cache(&self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn runner(
    worker: &Arc<MockWorker>,
    api: &Arc<MockTaskApi>,
    metrics: Option<&Arc<RecordingMetrics>>,
) -> TaskRunner {
    let runtime_config = WorkerRuntimeConfig {
        task_type: worker.name.clone(),
        domain: Some("blue".to_string()),
        poll_interval: POLL_INTERVAL,
    };
    TaskRunner::new(
        Arc::clone(worker) as Arc<dyn Worker>,
        Arc::clone(api) as Arc<dyn TaskApi>,
        metrics.map(|m| Arc::clone(m) as Arc<dyn MetricsCollector>),
        runtime_config,
    )
}

fn task(task_id: &str) -> Task {
    Task::new(task_id, "t2", "wf-1")
}

#[tokio::test(start_paused = true)]
async fn test_empty_poll_skips_execute_and_update() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(None)]));
    let metrics = Arc::new(RecordingMetrics::default());

    runner(&worker, &api, Some(&metrics)).run_once().await;

    assert_eq!(api.poll_count(), 1);
    assert_eq!(worker.executions(), 0);
    assert!(api.updates().is_empty());
    assert_eq!(metrics.count("poll"), 1);
    assert_eq!(metrics.count("poll_time"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_task_without_id_is_skipped() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("")))]));

    runner(&worker, &api, None).run_once().await;

    assert_eq!(worker.executions(), 0);
    assert!(api.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_completed_task_is_updated_once() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Complete));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("abc")))]));
    let metrics = Arc::new(RecordingMetrics::default());

    runner(&worker, &api, Some(&metrics)).run_once().await;

    let polls = api.polls.lock().unwrap().clone();
    assert_eq!(
        polls,
        vec![(
            "t2".to_string(),
            Some("worker-1".to_string()),
            Some("blue".to_string())
        )]
    );

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    let result = &updates[0].0;
    assert_eq!(result.task_id, "abc");
    assert_eq!(result.status, TaskResultStatus::Completed);
    assert_eq!(result.output_data["worker_style"], json!("class"));

    assert_eq!(metrics.count("execute_time"), 1);
    assert_eq!(
        *metrics.payload_sizes.lock().unwrap(),
        vec![serde_json::to_vec(result).unwrap().len()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_execution_error_becomes_failed_result() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Fail("boom")));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("abc")))]));
    let metrics = Arc::new(RecordingMetrics::default());

    runner(&worker, &api, Some(&metrics)).run_once().await;

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    let result = &updates[0].0;
    assert_eq!(result.task_id, "abc");
    assert_eq!(result.workflow_instance_id, "wf-1");
    assert_eq!(result.worker_id, "worker-1");
    assert_eq!(result.status, TaskResultStatus::Failed);
    assert_eq!(result.reason_for_incompletion.as_deref(), Some("boom"));
    assert_eq!(result.logs.len(), 1);
    assert_eq!(result.logs[0].task_id, "abc");
    assert!(result.logs[0].log.to_lowercase().contains("stack backtrace"));
    assert_eq!(metrics.count("execution_error"), 1);
    assert_eq!(metrics.count("execute_time"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_panic_becomes_failed_result() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Panic("kaboom")));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("abc")))]));
    let metrics = Arc::new(RecordingMetrics::default());
    let runner = runner(&worker, &api, Some(&metrics));

    runner.run_once().await;

    let updates = api.updates();
    assert_eq!(updates.len(), 1);
    let result = &updates[0].0;
    assert_eq!(result.status, TaskResultStatus::Failed);
    assert_eq!(result.reason_for_incompletion.as_deref(), Some("kaboom"));
    assert_eq!(result.logs.len(), 1);
    assert_eq!(metrics.count("execution_error"), 1);

    // panic 之后循环仍然可用
    runner.run_once().await;
    assert_eq!(api.poll_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_result_identity_is_filled_in() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Bare));
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("abc")))]));

    runner(&worker, &api, None).run_once().await;

    let result = &api.updates()[0].0;
    assert_eq!(result.task_id, "abc");
    assert_eq!(result.workflow_instance_id, "wf-1");
    assert_eq!(result.worker_id, "worker-1");
}

#[tokio::test(start_paused = true)]
async fn test_update_gives_up_after_four_attempts_with_linear_backoff() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Complete));
    let api = Arc::new(MockTaskApi::default().failing_updates(usize::MAX));
    let metrics = Arc::new(RecordingMetrics::default());
    let runner = runner(&worker, &api, Some(&metrics));
    let result = TaskResult::new_for(&task("abc"), "worker-1").completed();

    let response = runner.update_task(&result).await;

    assert_eq!(response, None);
    let updates = api.updates();
    assert_eq!(updates.len(), UPDATE_RETRY_ATTEMPTS as usize);
    for (index, expected) in [10u64, 20, 30].into_iter().enumerate() {
        let gap = updates[index + 1].1 - updates[index].1;
        let expected = Duration::from_secs(expected);
        assert!(
            gap >= expected && gap < expected + Duration::from_secs(1),
            "attempt {} waited {:?}",
            index + 2,
            gap
        );
    }
    assert_eq!(metrics.count("update_error"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_update_succeeds_after_retries() {
    let worker = Arc::new(MockWorker::new("t2", Behavior::Complete));
    let api = Arc::new(MockTaskApi::default().failing_updates(2));
    let runner = runner(&worker, &api, None);
    let result = TaskResult::new_for(&task("abc"), "worker-1").completed();

    let response = runner.update_task(&result).await;

    assert_eq!(response.as_deref(), Some("abc"));
    assert_eq!(api.updates().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_paused_worker_sleeps_without_polling() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete).pausing());
    let api = Arc::new(MockTaskApi::with_polls(vec![Ok(Some(task("abc")))]));
    let metrics = Arc::new(RecordingMetrics::default());

    let started = Instant::now();
    runner(&worker, &api, Some(&metrics)).run_once().await;

    assert!(started.elapsed() >= POLL_INTERVAL);
    assert_eq!(api.poll_count(), 0);
    assert_eq!(worker.executions(), 0);
    assert_eq!(metrics.count("poll"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_errors_do_not_stop_the_loop() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::with_polls(vec![
        Err(ConductorError::Network("connection refused".to_string())),
        Err(ConductorError::http_status(503, "unavailable")),
        Err(ConductorError::Network("connection reset".to_string())),
    ]));
    let metrics = Arc::new(RecordingMetrics::default());
    let runner = runner(&worker, &api, Some(&metrics));

    let outcome = tokio::time::timeout(Duration::from_secs(10), runner.run()).await;

    assert!(outcome.is_err(), "run loop returned");
    assert!(api.poll_count() > 3);
    assert_eq!(metrics.count("poll_error"), 3);
    assert_eq!(worker.executions(), 0);
    assert!(api.updates().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cache_is_cleared_every_iteration() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::default());
    let runner = runner(&worker, &api, None);

    runner.run_once().await;
    runner.run_once().await;

    assert_eq!(worker.cache_clears.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_runner_exposes_resolved_config() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::default());
    let runner = runner(&worker, &api, None);

    assert_eq!(runner.identity(), "worker-1");
    assert_eq!(runner.runtime_config().domain.as_deref(), Some("blue"));
    assert_eq!(runner.runtime_config().poll_interval, POLL_INTERVAL);
}

fn assert_slept(started: Instant, expected: Duration) {
    let elapsed = started.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(10),
        "slept {elapsed:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_fixed_interval_worker_sleeps_for_resolved_interval() {
    let worker = Arc::new(MockWorker::new("t1", Behavior::Complete));
    let api = Arc::new(MockTaskApi::default());
    let runner = runner(&worker, &api, None);

    // MockWorker 固定返回默认间隔，配置里的 1s 生效
    assert_ne!(worker.poll_interval(), POLL_INTERVAL);
    assert_eq!(runner.current_poll_interval(), POLL_INTERVAL);

    let started = Instant::now();
    runner.run_once().await;
    assert_slept(started, POLL_INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_poll_interval_changed_at_runtime_applies_next_iteration() {
    let worker = Arc::new(
        FunctionWorker::new("t1", WorkerFunction::input_to_output(|_: serde_json::Value| Ok(json!({}))))
            .with_poll_interval(Duration::from_millis(100)),
    );
    let api = Arc::new(MockTaskApi::default());
    let runtime_config = WorkerRuntimeConfig {
        task_type: "t1".to_string(),
        domain: None,
        poll_interval: POLL_INTERVAL,
    };
    let runner = TaskRunner::new(
        Arc::clone(&worker) as Arc<dyn Worker>,
        Arc::clone(&api) as Arc<dyn TaskApi>,
        None,
        runtime_config,
    );

    // 启动时下发解析后的间隔
    assert_eq!(worker.poll_interval(), POLL_INTERVAL);

    let started = Instant::now();
    runner.run_once().await;
    assert_slept(started, POLL_INTERVAL);

    worker.set_poll_interval(Duration::from_secs(3));
    let started = Instant::now();
    runner.run_once().await;
    assert_slept(started, Duration::from_secs(3));

    worker.set_poll_interval(Duration::ZERO);
    let started = Instant::now();
    runner.run_once().await;
    assert_slept(started, Duration::ZERO);
    assert_eq!(api.poll_count(), 3);
}
